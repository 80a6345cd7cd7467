//! Outbound application events.
//!
//! The [`Dispenser`](super::service::Dispenser) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Reports and credit updates
//! double as payloads for the remote-sync boundary.

use chrono::{DateTime, Utc};

use crate::fsm::StateId;

use super::players::TagUid;

/// Structured events emitted by the dispenser core.
#[derive(Debug, Clone, PartialEq)]
pub enum DispenserEvent {
    /// The service announced itself and initialised its outputs.
    Started { version: &'static str },

    /// The rotor lifecycle moved between states.
    StateChanged { from: StateId, to: StateId },

    /// The IR sensor saw an alignment marker.
    HalfRotation { has_coin: bool },

    /// A dispense began.
    DispenseStarted { amount: u32, uid: Option<TagUid> },

    /// A dispense finished (fully or on an empty hopper).
    DispenseCompleted(DispenseReport),

    /// No progress within the jam timeout; recovery started.
    JamDetected { dispensed: u32 },

    /// An authorized tag checked in.
    CheckedIn(TagUid),

    /// A tag checked out with the given credit.
    CheckedOut { uid: TagUid, credit: i64 },

    /// A tag not present in the player directory was read.
    UnknownTag(TagUid),

    /// A tag was read again inside its grace period and ignored.
    GraceRead(TagUid),

    /// A credit round changed this many players.
    CreditAccrued { players: usize },

    /// The remote store no longer lists this player.
    PlayerRemoved(TagUid),

    /// The close path ran.
    Closed,
}

/// Outcome of one dispense, handed to the remote-sync boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispenseReport {
    /// Tokens actually released.
    pub paid_amount: u32,
    /// Tokens asked for.
    pub requested: u32,
    /// Aborted on the empty-streak ceiling.
    pub is_empty: bool,
    /// Player whose checkout started the dispense.
    pub uid: Option<TagUid>,
}

impl DispenseReport {
    /// Tokens still owed to the player.
    pub fn shortfall(&self) -> u32 {
        self.requested.saturating_sub(self.paid_amount)
    }
}

/// One player's credit change from a credit round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditUpdate {
    pub uid: TagUid,
    /// Net change applied this round (after clamping).
    pub delta: i64,
    /// Resulting credit.
    pub credit: i64,
    /// New accrual checkpoint.
    pub tick: DateTime<Utc>,
}
