//! Local player ledger.
//!
//! Two maps, both keyed by [`TagUid`]:
//!
//! - **sessions** mirror the `players` map of the area document (presence,
//!   credit, accrual checkpoint) plus the local `last_read_at` used for the
//!   read grace period.  The remote side is authoritative for which
//!   sessions exist.
//! - **directory** caches the player collection (name, current area).  A
//!   tag is authorized only when its UID is in the directory.

use core::fmt::{self, Write as _};
use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};

use crate::config::AreaConfig;

use super::commands::{PlayerChange, PlayerDetails, RemotePlayer};
use super::events::CreditUpdate;

// ───────────────────────────────────────────────────────────────
// Tag identity
// ───────────────────────────────────────────────────────────────

/// Hex digits in a rendered UID.
pub const UID_DIGITS: usize = 14;

/// RFID tag identifier: 14 upper-case hex digits, zero padded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagUid(heapless::String<UID_DIGITS>);

impl TagUid {
    /// Largest raw UID that renders in [`UID_DIGITS`] digits (7 bytes).
    pub const MAX_RAW: u64 = 0x00FF_FFFF_FFFF_FFFF;

    /// Render a raw reader UID, or `None` if it is wider than 7 bytes.
    pub fn try_from_raw(raw: u64) -> Option<Self> {
        (raw <= Self::MAX_RAW).then(|| Self::from_raw(raw))
    }

    /// Render a raw UID known to fit in 7 bytes; higher bits are dropped.
    pub fn from_raw(raw: u64) -> Self {
        let mut s = heapless::String::new();
        // 56 bits always fit in 14 hex digits.
        let _ = write!(s, "{:014X}", raw & Self::MAX_RAW);
        Self(s)
    }

    /// Accept a UID key coming from the remote store.
    pub fn parse(key: &str) -> Option<Self> {
        let ok = key.len() == UID_DIGITS
            && key.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b));
        if !ok {
            return None;
        }
        heapless::String::try_from(key).ok().map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for TagUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ───────────────────────────────────────────────────────────────
// Sessions
// ───────────────────────────────────────────────────────────────

/// Local state of one player in this area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSession {
    /// Last accepted tag read.
    pub last_read_at: DateTime<Utc>,
    /// Credit accrual checkpoint.
    pub tick_at: DateTime<Utc>,
    pub credit: i64,
    pub present: bool,
}

impl PlayerSession {
    /// A session for a tag seen for the first time: the first read is
    /// outside the grace period.
    pub fn first_seen(now: DateTime<Utc>, grace: TimeDelta) -> Self {
        Self {
            last_read_at: now - grace,
            tick_at: now,
            credit: 0,
            present: false,
        }
    }
}

/// Sessions plus the player directory.
#[derive(Debug, Default)]
pub struct PlayerBook {
    sessions: BTreeMap<TagUid, PlayerSession>,
    directory: BTreeMap<TagUid, PlayerDetails>,
}

impl PlayerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uid: &TagUid) -> Option<&PlayerSession> {
        self.sessions.get(uid)
    }

    pub fn get_mut(&mut self, uid: &TagUid) -> Option<&mut PlayerSession> {
        self.sessions.get_mut(uid)
    }

    pub fn insert(&mut self, uid: TagUid, session: PlayerSession) {
        self.sessions.insert(uid, session);
    }

    pub fn remove(&mut self, uid: &TagUid) -> Option<PlayerSession> {
        self.sessions.remove(uid)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    // ── Directory ─────────────────────────────────────────────

    pub fn is_authorized(&self, uid: &TagUid) -> bool {
        self.directory.contains_key(uid)
    }

    pub fn details(&self, uid: &TagUid) -> Option<&PlayerDetails> {
        self.directory.get(uid)
    }

    /// Apply one change from the player collection watch.
    pub fn apply_directory_change(&mut self, change: PlayerChange) {
        match change {
            PlayerChange::Added(key, details) | PlayerChange::Modified(key, details) => {
                match TagUid::parse(&key) {
                    Some(uid) => {
                        debug!("Player {} ({}) updated", uid, details.name);
                        self.directory.insert(uid, details);
                    }
                    None => warn!("Ignoring player with malformed UID '{}'", key),
                }
            }
            PlayerChange::Removed(key) => {
                if let Some(uid) = TagUid::parse(&key) {
                    debug!("Player {} removed from directory", uid);
                    self.directory.remove(&uid);
                }
            }
        }
    }

    // ── Area sync ─────────────────────────────────────────────

    /// Merge the `players` map of an area snapshot.  Local sessions the
    /// remote no longer lists are dropped and returned.
    pub fn sync_area(
        &mut self,
        remote: &BTreeMap<String, RemotePlayer>,
        now: DateTime<Utc>,
    ) -> Vec<TagUid> {
        let mut seen = Vec::with_capacity(remote.len());
        for (key, player) in remote {
            let Some(uid) = TagUid::parse(key) else {
                warn!("Ignoring area player with malformed UID '{}'", key);
                continue;
            };
            let session = self.sessions.entry(uid.clone()).or_insert(PlayerSession {
                last_read_at: now,
                tick_at: now,
                credit: 0,
                present: false,
            });
            session.present = player.present;
            session.credit = player.credit;
            if let Some(tick) = player.tick {
                session.tick_at = tick;
            }
            seen.push(uid);
        }

        let stale: Vec<TagUid> = self
            .sessions
            .keys()
            .filter(|uid| !seen.contains(uid))
            .cloned()
            .collect();
        for uid in &stale {
            info!("Removing local {}", uid);
            self.sessions.remove(uid);
        }
        stale
    }

    // ── Tag reads ─────────────────────────────────────────────

    /// Register a read of `uid`.  Toggles presence when the grace period
    /// since the last accepted read has elapsed; returns the new presence,
    /// or `None` when the read was debounced.
    pub fn register_read(
        &mut self,
        uid: &TagUid,
        now: DateTime<Utc>,
        grace: TimeDelta,
    ) -> Option<bool> {
        let session = self
            .sessions
            .entry(uid.clone())
            .or_insert_with(|| PlayerSession::first_seen(now, grace));
        if now < session.last_read_at + grace {
            return None;
        }
        session.last_read_at = now;
        session.present = !session.present;
        Some(session.present)
    }

    // ── Credit ────────────────────────────────────────────────

    /// One credit round.  Every present player gets `tick_amount` per whole
    /// `tick_seconds` elapsed since their checkpoint; the checkpoint moves
    /// by exactly that many intervals.
    pub fn accrue(&mut self, now: DateTime<Utc>, rules: &AreaConfig) -> Vec<CreditUpdate> {
        let interval = rules.tick_interval();
        let step = interval.num_microseconds().unwrap_or(i64::MAX).max(1);
        let limit = rules.limit.max(0);
        let amount = rules.tick_amount;

        let mut updates = Vec::new();
        for (uid, session) in self.sessions.iter_mut() {
            if !session.present {
                continue;
            }
            let saturated = (amount > 0 && session.credit >= limit)
                || (amount < 0 && session.credit <= 0);
            if saturated {
                continue;
            }

            let elapsed = (now - session.tick_at).num_microseconds().unwrap_or(i64::MAX);
            let intervals = elapsed / step;
            if intervals < 1 {
                continue;
            }

            let before = session.credit;
            let mut credit = before;
            for _ in 0..intervals {
                let next = credit.saturating_add(amount).clamp(0, limit);
                if next == credit {
                    break;
                }
                credit = next;
            }
            session.credit = credit;
            session.tick_at += TimeDelta::microseconds(step.saturating_mul(intervals));

            debug!("Give {} credit to {} ({} -> {})", credit - before, uid, before, credit);
            updates.push(CreditUpdate {
                uid: uid.clone(),
                delta: credit - before,
                credit,
                tick: session.tick_at,
            });
        }
        updates
    }
}
