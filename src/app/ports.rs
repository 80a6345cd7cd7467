//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Dispenser (domain)
//! ```
//!
//! Driven adapters (pins, RFID reader, remote store, event sinks) implement
//! these traits.  The [`Dispenser`](super::service::Dispenser) consumes them
//! via generics, so the domain core never touches hardware directly.

use core::fmt;

use chrono::{DateTime, Utc};

use crate::error::Result;

use super::commands::ControlFlag;
use super::events::{CreditUpdate, DispenseReport, DispenserEvent};
use super::players::TagUid;

// ───────────────────────────────────────────────────────────────
// Digital level
// ───────────────────────────────────────────────────────────────

/// Logic level of a digital pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn toggled(self) -> Self {
        match self {
            Self::Low => Self::High,
            Self::High => Self::Low,
        }
    }

    pub fn is_high(self) -> bool {
        self == Self::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Self::High } else { Self::Low }
    }
}

// ───────────────────────────────────────────────────────────────
// Hardware port (driven adapter: domain ↔ pins)
// ───────────────────────────────────────────────────────────────

/// Narrow capability interface over the dispenser board.
pub trait HardwarePort {
    /// Sample a digital input.  Must be cheap enough to call at
    /// microsecond cadence.
    fn read_digital(&mut self, pin: u8) -> Result<Level>;

    /// Set the motor PWM duty (`0..=range`).
    fn write_pwm(&mut self, duty: u16) -> Result<()>;

    /// Drive a digital output (LEDs).
    fn write_digital(&mut self, pin: u8, level: Level) -> Result<()>;

    /// Non-blocking RFID poll; `None` when no tag is on the reader.
    fn read_tag_uid(&mut self) -> Option<u64>;

    /// Busy-wait between debounce samples.
    fn delay_us(&mut self, us: u32);

    /// Release pins and the reader.  Called once from the close path.
    fn release(&mut self);
}

/// RFID reader as seen by the hardware adapter.
pub trait TagReader {
    /// Raw UID of the tag currently on the reader, if any.
    fn read_uid(&mut self) -> Option<u64>;

    /// Release the reader's bus.
    fn cleanup(&mut self) {}
}

// ───────────────────────────────────────────────────────────────
// Remote sync port (driven adapter: domain → cloud store)
// ───────────────────────────────────────────────────────────────

/// Outbound half of the remote store.  The inbound half (area snapshots and
/// player changes) arrives through the [`RemoteInbox`](super::inbox::RemoteInbox).
pub trait RemoteSync {
    /// Publish the running version and reset `is_update` / `is_align`.
    fn announce(&mut self, version: &str) -> core::result::Result<(), RemoteError>;

    /// Reset a one-shot control flag on the area document.
    fn clear_flag(&mut self, flag: ControlFlag) -> core::result::Result<(), RemoteError>;

    /// Remove the player from another area it is still checked into.
    fn check_out_elsewhere(
        &mut self,
        area: &str,
        uid: &TagUid,
    ) -> core::result::Result<(), RemoteError>;

    /// Mark the player present here, with a fresh credit checkpoint.
    fn check_in(&mut self, uid: &TagUid, at: DateTime<Utc>) -> core::result::Result<(), RemoteError>;

    /// Clear presence of a player that left without credit.
    fn check_out(&mut self, uid: &TagUid) -> core::result::Result<(), RemoteError>;

    /// Push every changed credit/checkpoint in one write.
    fn push_credit(&mut self, updates: &[CreditUpdate]) -> core::result::Result<(), RemoteError>;

    /// Reconcile a finished dispense.
    fn report_dispense(&mut self, report: &DispenseReport) -> core::result::Result<(), RemoteError>;

    /// Re-open any subscription the store closed.
    fn ensure_subscribed(&mut self) -> core::result::Result<(), RemoteError>;
}

/// Errors from [`RemoteSync`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The store could not be reached.
    Unavailable,
    /// The store refused the write.
    Rejected(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "remote store unavailable"),
            Self::Rejected(why) => write!(f, "rejected: {why}"),
        }
    }
}

impl std::error::Error for RemoteError {}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`DispenserEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &DispenserEvent);
}
