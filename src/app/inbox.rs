//! Single-writer inbox for remote updates.
//!
//! Watch callbacks of the remote store fire on foreign threads.  They only
//! ever post into this bounded channel; the tick thread drains it once per
//! polling period and is the only code that mutates dispenser state.
//!
//! ```text
//! ┌──────────────┐ RemoteUpdate ┌──────────────┐
//! │ Watch thread │─────────────▶│  Tick loop   │
//! │ (any thread) │  try_send    │ try_receive  │
//! └──────────────┘              └──────────────┘
//! ```

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use super::commands::RemoteUpdate;

/// Channel depth for inbound remote updates.
pub const INBOX_DEPTH: usize = 16;

type UpdateChannel = Channel<CriticalSectionRawMutex, RemoteUpdate, INBOX_DEPTH>;

/// Receiving end, owned by the tick thread.
pub struct RemoteInbox {
    channel: Arc<UpdateChannel>,
}

/// Posting end, cloned into remote watch callbacks.
#[derive(Clone)]
pub struct InboxSender {
    channel: Arc<UpdateChannel>,
}

impl Default for RemoteInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteInbox {
    pub fn new() -> Self {
        Self {
            channel: Arc::new(Channel::new()),
        }
    }

    pub fn sender(&self) -> InboxSender {
        InboxSender {
            channel: Arc::clone(&self.channel),
        }
    }

    /// Next pending update, if any.
    pub fn try_next(&self) -> Option<RemoteUpdate> {
        self.channel.try_receive().ok()
    }

    /// Take everything currently queued.
    pub fn drain(&self) -> impl Iterator<Item = RemoteUpdate> + '_ {
        core::iter::from_fn(|| self.try_next())
    }
}

impl InboxSender {
    /// Queue an update.  Returns `false` (and logs) when the inbox is full.
    pub fn post(&self, update: RemoteUpdate) -> bool {
        if self.channel.try_send(update).is_err() {
            warn!("Remote inbox full, update dropped");
            return false;
        }
        true
    }
}
