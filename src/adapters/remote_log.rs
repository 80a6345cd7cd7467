//! Offline remote-store adapter.
//!
//! Implements [`RemoteSync`] by logging each write as the JSON document the
//! store would receive.  Used by the binary when no store is configured and
//! as the reference shape for a networked adapter.

use chrono::{DateTime, Utc};
use log::info;
use serde_json::json;

use crate::app::commands::ControlFlag;
use crate::app::events::{CreditUpdate, DispenseReport};
use crate::app::players::TagUid;
use crate::app::ports::{RemoteError, RemoteSync};

type RemoteResult = core::result::Result<(), RemoteError>;

/// Presence cleared, credit and checkpoint untouched.
fn checkout_document() -> serde_json::Value {
    json!({ "present": false })
}

/// Batched credit increments keyed by UID.
fn credit_document(updates: &[CreditUpdate]) -> serde_json::Value {
    let players: serde_json::Map<String, serde_json::Value> = updates
        .iter()
        .map(|u| {
            (
                u.uid.to_string(),
                json!({ "credit": { "increment": u.delta }, "tick": u.tick.to_rfc3339() }),
            )
        })
        .collect();
    serde_json::Value::Object(players)
}

/// Logs writes addressed to one area document.
#[derive(Debug)]
pub struct LogRemote {
    area: String,
    writes: u64,
}

impl LogRemote {
    pub fn new(area: impl Into<String>) -> Self {
        Self {
            area: area.into(),
            writes: 0,
        }
    }

    /// Number of writes issued so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    fn write(&mut self, path: &str, doc: serde_json::Value) -> RemoteResult {
        self.writes += 1;
        info!("REMOTE | {} | {}", path, doc);
        Ok(())
    }
}

impl RemoteSync for LogRemote {
    fn announce(&mut self, version: &str) -> RemoteResult {
        let path = format!("areas/{}", self.area);
        self.write(
            &path,
            json!({ "version": version, "is_update": false, "is_align": false }),
        )
    }

    fn clear_flag(&mut self, flag: ControlFlag) -> RemoteResult {
        let path = format!("areas/{}", self.area);
        self.write(&path, json!({ (flag.field()): false }))
    }

    fn check_out_elsewhere(&mut self, area: &str, uid: &TagUid) -> RemoteResult {
        self.write(&format!("areas/{area}/players/{uid}"), checkout_document())
    }

    fn check_in(&mut self, uid: &TagUid, at: DateTime<Utc>) -> RemoteResult {
        let path = format!("areas/{}/players/{}", self.area, uid);
        self.write(&path, json!({ "present": true, "tick": at.to_rfc3339() }))?;
        self.write(&format!("players/{uid}"), json!({ "area": self.area }))
    }

    fn check_out(&mut self, uid: &TagUid) -> RemoteResult {
        let path = format!("areas/{}/players/{}", self.area, uid);
        self.write(&path, checkout_document())
    }

    fn push_credit(&mut self, updates: &[CreditUpdate]) -> RemoteResult {
        if updates.is_empty() {
            return Ok(());
        }
        let path = format!("areas/{}/players", self.area);
        self.write(&path, credit_document(updates))
    }

    fn report_dispense(&mut self, report: &DispenseReport) -> RemoteResult {
        let area_path = format!("areas/{}", self.area);
        self.write(
            &area_path,
            json!({ "paid": { "increment": report.paid_amount }, "is_empty": report.is_empty }),
        )?;

        let Some(uid) = report.uid.as_ref() else {
            return Ok(());
        };
        let path = format!("areas/{}/players/{}", self.area, uid);
        if report.is_empty {
            self.write(
                &path,
                json!({
                    "present": false,
                    "credit": { "increment": -i64::from(report.paid_amount) },
                    "shortfall": report.shortfall(),
                }),
            )?;
        } else {
            self.write(&path, serde_json::Value::Null)?;
        }
        self.write(
            &format!("players/{uid}"),
            json!({ "area": null, "paid": { (self.area.as_str()): { "increment": report.paid_amount } } }),
        )
    }

    fn ensure_subscribed(&mut self) -> RemoteResult {
        Ok(())
    }
}
