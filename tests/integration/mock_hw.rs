//! Mock adapters for integration tests.
//!
//! Records every port call so tests can assert on the full command history
//! without touching real GPIO/PWM registers or a remote store.

use chrono::{DateTime, TimeDelta, Utc};
use dispenser::app::commands::ControlFlag;
use dispenser::app::events::{CreditUpdate, DispenseReport, DispenserEvent};
use dispenser::app::players::TagUid;
use dispenser::app::ports::{EventSink, HardwarePort, Level, RemoteError, RemoteSync};
use dispenser::app::service::Dispenser;
use dispenser::config::DispenserConfig;
use dispenser::error::{ActuatorError, Result, SensorError};
use dispenser::pins;

// ── Hardware call record ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum HwCall {
    Pwm(u16),
    Digital(u8, Level),
    Release,
}

// ── MockHardware ──────────────────────────────────────────────

pub struct MockHardware {
    pub calls: Vec<HwCall>,
    /// Level every IR read returns.
    pub ir: Level,
    /// Tag currently on the reader.
    pub tag: Option<u64>,
    pub ir_reads: usize,
}

#[allow(dead_code)]
impl MockHardware {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            ir: Level::Low,
            tag: None,
            ir_reads: 0,
        }
    }

    pub fn last_duty(&self) -> Option<u16> {
        self.calls.iter().rev().find_map(|c| match c {
            HwCall::Pwm(duty) => Some(*duty),
            _ => None,
        })
    }

    pub fn pin_level(&self, pin: u8) -> Option<Level> {
        self.calls.iter().rev().find_map(|c| match c {
            HwCall::Digital(p, level) if *p == pin => Some(*level),
            _ => None,
        })
    }

    pub fn releases(&self) -> usize {
        self.calls.iter().filter(|c| **c == HwCall::Release).count()
    }
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwarePort for MockHardware {
    fn read_digital(&mut self, pin: u8) -> Result<Level> {
        if pin != pins::IR_RX_GPIO {
            return Err(SensorError::NoSuchPin(pin).into());
        }
        self.ir_reads += 1;
        Ok(self.ir)
    }

    fn write_pwm(&mut self, duty: u16) -> Result<()> {
        if duty > pins::PWM_RANGE {
            return Err(ActuatorError::DutyOutOfRange(duty).into());
        }
        self.calls.push(HwCall::Pwm(duty));
        Ok(())
    }

    fn write_digital(&mut self, pin: u8, level: Level) -> Result<()> {
        self.calls.push(HwCall::Digital(pin, level));
        Ok(())
    }

    fn read_tag_uid(&mut self) -> Option<u64> {
        self.tag
    }

    fn delay_us(&mut self, _us: u32) {}

    fn release(&mut self) {
        self.calls.push(HwCall::Release);
    }
}

// ── Remote store ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Announce(String),
    ClearFlag(ControlFlag),
    CheckOutElsewhere(String, TagUid),
    CheckIn(TagUid),
    CheckOut(TagUid),
    PushCredit(Vec<CreditUpdate>),
    Report(DispenseReport),
    EnsureSubscribed,
}

#[derive(Default)]
pub struct RecordingRemote {
    pub calls: Vec<RemoteCall>,
    /// Every call fails with `Unavailable` while set.
    pub offline: bool,
}

#[allow(dead_code)]
impl RecordingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<&DispenseReport> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                RemoteCall::Report(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&RemoteCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn record(&mut self, call: RemoteCall) -> core::result::Result<(), RemoteError> {
        self.calls.push(call);
        if self.offline {
            Err(RemoteError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl RemoteSync for RecordingRemote {
    fn announce(&mut self, version: &str) -> core::result::Result<(), RemoteError> {
        self.record(RemoteCall::Announce(version.to_string()))
    }

    fn clear_flag(&mut self, flag: ControlFlag) -> core::result::Result<(), RemoteError> {
        self.record(RemoteCall::ClearFlag(flag))
    }

    fn check_out_elsewhere(
        &mut self,
        area: &str,
        uid: &TagUid,
    ) -> core::result::Result<(), RemoteError> {
        self.record(RemoteCall::CheckOutElsewhere(area.to_string(), uid.clone()))
    }

    fn check_in(&mut self, uid: &TagUid, _at: DateTime<Utc>) -> core::result::Result<(), RemoteError> {
        self.record(RemoteCall::CheckIn(uid.clone()))
    }

    fn check_out(&mut self, uid: &TagUid) -> core::result::Result<(), RemoteError> {
        self.record(RemoteCall::CheckOut(uid.clone()))
    }

    fn push_credit(&mut self, updates: &[CreditUpdate]) -> core::result::Result<(), RemoteError> {
        self.record(RemoteCall::PushCredit(updates.to_vec()))
    }

    fn report_dispense(&mut self, report: &DispenseReport) -> core::result::Result<(), RemoteError> {
        self.record(RemoteCall::Report(report.clone()))
    }

    fn ensure_subscribed(&mut self) -> core::result::Result<(), RemoteError> {
        self.record(RemoteCall::EnsureSubscribed)
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct LogSink {
    pub events: Vec<DispenserEvent>,
}

#[allow(dead_code)]
impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&DispenserEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for LogSink {
    fn emit(&mut self, event: &DispenserEvent) {
        self.events.push(event.clone());
    }
}

// ── Fixtures ──────────────────────────────────────────────────

pub type TestDispenser = Dispenser<MockHardware, RecordingRemote, LogSink>;

pub const AREA: &str = "arcade";

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn ms(n: i64) -> TimeDelta {
    TimeDelta::milliseconds(n)
}

#[allow(dead_code)]
pub fn make_dispenser(now: DateTime<Utc>) -> TestDispenser {
    Dispenser::new(
        DispenserConfig::default(),
        AREA.to_string(),
        MockHardware::new(),
        RecordingRemote::new(),
        LogSink::new(),
        now,
    )
}

/// Feed one debounced IR level to the rotor job at `at`.
pub fn feed(d: &mut TestDispenser, at: DateTime<Utc>, level: Level) {
    d.hardware_mut().ir = level;
    d.poll_rotor(at).unwrap();
}

/// One half rotation from `*t`: the marker's rising edge 250 ms later, then
/// the slot's falling edge.  A slow falling edge (`next_has_coin == false`)
/// makes the following marker report an empty slot.
#[allow(dead_code)]
pub fn half_turn(d: &mut TestDispenser, t: &mut DateTime<Utc>, next_has_coin: bool) {
    *t += ms(250);
    feed(d, *t, Level::High);
    *t += if next_has_coin { ms(30) } else { ms(150) };
    feed(d, *t, Level::Low);
}

/// Start the dispenser at `*t` and complete the initial calibration.
#[allow(dead_code)]
pub fn started(t: &mut DateTime<Utc>) -> TestDispenser {
    let mut d = make_dispenser(*t);
    d.start(*t);
    feed(&mut d, *t, Level::Low);
    half_turn(&mut d, t, true);
    d
}

/// Request `n` tokens and feed the rotor's first falling edge.
#[allow(dead_code)]
pub fn begin_dispense(d: &mut TestDispenser, t: &mut DateTime<Utc>, n: i64) {
    d.dispense(n, *t);
    *t += ms(20);
    feed(d, *t, Level::Low);
}
