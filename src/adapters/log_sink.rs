//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured dispenser events to the
//! `log` facade (env_logger on the host).  A telemetry adapter would
//! implement the same trait.

use log::{info, warn};

use crate::app::events::DispenserEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`DispenserEvent`] as one line.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &DispenserEvent) {
        match event {
            DispenserEvent::Started { version } => {
                info!("START | version={}", version);
            }
            DispenserEvent::StateChanged { from, to } => {
                info!("ROTOR | {:?} -> {:?}", from, to);
            }
            DispenserEvent::HalfRotation { has_coin } => {
                info!("ROTOR | half rotation | coin={}", has_coin);
            }
            DispenserEvent::DispenseStarted { amount, uid } => {
                info!(
                    "DISPENSE | start | amount={} | uid={}",
                    amount,
                    uid.as_ref().map_or("-", |u| u.as_str())
                );
            }
            DispenserEvent::DispenseCompleted(r) => {
                info!(
                    "DISPENSE | done | paid={}/{} | empty={} | uid={}",
                    r.paid_amount,
                    r.requested,
                    r.is_empty,
                    r.uid.as_ref().map_or("-", |u| u.as_str())
                );
            }
            DispenserEvent::JamDetected { dispensed } => {
                warn!("ROTOR | jam | dispensed={}", dispensed);
            }
            DispenserEvent::CheckedIn(uid) => {
                info!("PLAYER | checkin | uid={}", uid);
            }
            DispenserEvent::CheckedOut { uid, credit } => {
                info!("PLAYER | checkout | uid={} | credit={}", uid, credit);
            }
            DispenserEvent::UnknownTag(uid) => {
                warn!("PLAYER | unknown tag | uid={}", uid);
            }
            DispenserEvent::GraceRead(uid) => {
                info!("PLAYER | grace period | uid={}", uid);
            }
            DispenserEvent::CreditAccrued { players } => {
                info!("PLAYER | credit round | players={}", players);
            }
            DispenserEvent::PlayerRemoved(uid) => {
                info!("PLAYER | removed remotely | uid={}", uid);
            }
            DispenserEvent::Closed => {
                info!("STOP | closed");
            }
        }
    }
}
