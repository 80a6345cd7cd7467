//! Inbound updates from the remote store.
//!
//! The remote-sync adapter decodes watch callbacks into these values and
//! posts them to the [`RemoteInbox`](super::inbox::RemoteInbox); the
//! [`Dispenser`](super::service::Dispenser) applies them on the tick thread.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AreaConfig;

/// Anything the remote side can push into the core.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteUpdate {
    /// Full snapshot of this dispenser's area document.
    Area(AreaSnapshot),
    /// A change to the player directory.
    Player(PlayerChange),
}

/// The area document: game rules, players checked in here, control flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AreaSnapshot {
    #[serde(flatten)]
    pub config: AreaConfig,
    #[serde(default)]
    pub players: BTreeMap<String, RemotePlayer>,
    #[serde(default)]
    pub is_align: bool,
    #[serde(default)]
    pub is_shutdown: bool,
    #[serde(default)]
    pub is_update: bool,
}

impl AreaSnapshot {
    /// Raised control flags, in processing order.
    pub fn flags(&self) -> impl Iterator<Item = ControlFlag> + '_ {
        [
            (self.is_align, ControlFlag::Align),
            (self.is_shutdown, ControlFlag::Shutdown),
            (self.is_update, ControlFlag::Update),
        ]
        .into_iter()
        .filter_map(|(set, flag)| set.then_some(flag))
    }
}

/// A player entry inside the area document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemotePlayer {
    pub present: bool,
    pub credit: i64,
    pub tick: Option<DateTime<Utc>>,
}

/// Directory record of a registered player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerDetails {
    pub name: String,
    /// Area the player is currently checked into, if any.
    pub area: Option<String>,
}

/// One change from the player directory watch.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerChange {
    Added(String, PlayerDetails),
    Modified(String, PlayerDetails),
    Removed(String),
}

/// One-shot triggers carried by the area document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlag {
    /// Re-run rotor calibration.
    Align,
    /// Close the dispenser and stop.
    Shutdown,
    /// Stop so the supervisor can update and restart.
    Update,
}

impl ControlFlag {
    /// Field name on the area document.
    pub fn field(self) -> &'static str {
        match self {
            Self::Align => "is_align",
            Self::Shutdown => "is_shutdown",
            Self::Update => "is_update",
        }
    }
}
