//! Application service: the hexagonal core.
//!
//! [`Dispenser`] owns the rotor FSM, the IR sensor, the actuator drivers and
//! the player ledger.  Every method takes the current time from its caller
//! (the job layer passes the scheduler's clock), so the whole service is
//! testable with mock adapters and a manual clock.
//!
//! ```text
//!  HardwarePort ◀─▶ ┌──────────────────────────┐ ──▶ EventSink
//!                   │        Dispenser         │
//!  RemoteInbox ───▶ │ FSM · IR · Players · LED │ ──▶ RemoteSync
//!                   └──────────────────────────┘
//! ```

use core::mem;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, error, info, warn};

use crate::config::{AreaConfig, DispenserConfig};
use crate::drivers::motor::MotorDriver;
use crate::drivers::status_led::{FlashNext, Led, LedFlash, StatusLeds};
use crate::error::Result;
use crate::fsm::context::{Deferred, PendingAction, RotorContext};
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, RotorEvent, StateId};
use crate::pins;
use crate::sensors::{HalfRotation, IrRotorSensor};

use super::commands::{AreaSnapshot, ControlFlag, RemoteUpdate};
use super::events::{DispenseReport, DispenserEvent};
use super::inbox::{InboxSender, RemoteInbox};
use super::players::{PlayerBook, TagUid};
use super::ports::{EventSink, HardwarePort, Level, RemoteSync};

/// Version announced to the remote store.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Why the run loop should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Remote asked for a shutdown.
    Shutdown,
    /// Remote asked for an update; the supervisor restarts us.
    Update,
}

/// Credit job cadence for a given accrual interval: a quarter of it,
/// within 1–15 s.
pub fn credit_cadence(tick_seconds: u32) -> TimeDelta {
    TimeDelta::seconds(i64::from(tick_seconds / 4)).clamp(TimeDelta::seconds(1), TimeDelta::seconds(15))
}

// ───────────────────────────────────────────────────────────────
// Dispenser
// ───────────────────────────────────────────────────────────────

pub struct Dispenser<H, R, S> {
    hw: H,
    remote: R,
    sink: S,

    area: String,
    fsm: Fsm,
    ctx: RotorContext,
    ir: IrRotorSensor,
    motor: MotorDriver,
    leds: StatusLeds,

    players: PlayerBook,
    rules: AreaConfig,
    /// Player whose checkout started the running dispense.
    active_uid: Option<TagUid>,
    last_report: Option<DispenseReport>,

    inbox: RemoteInbox,
    /// Flags already acted on and not yet seen cleared remotely.
    consumed_flags: Vec<ControlFlag>,
    /// Realign requested while the rotor was busy; runs once it is idle.
    realign_pending: bool,
    pending_cadence: Option<TimeDelta>,
    deferred: Vec<Deferred>,

    exit_reason: Option<ExitReason>,
    closed: bool,
}

impl<H, R, S> Dispenser<H, R, S>
where
    H: HardwarePort,
    R: RemoteSync,
    S: EventSink,
{
    /// Construct the service.  Does **not** touch the hardware; call
    /// [`start`](Self::start) next.
    pub fn new(
        config: DispenserConfig,
        area: String,
        hw: H,
        remote: R,
        sink: S,
        now: DateTime<Utc>,
    ) -> Self {
        let ir = IrRotorSensor::new(pins::IR_RX_GPIO, &config, now);
        let motor = MotorDriver::new(config.pwm_range);
        Self {
            hw,
            remote,
            sink,
            area,
            fsm: Fsm::new(build_state_table(), StateId::Idle),
            ctx: RotorContext::new(config, now),
            ir,
            motor,
            leds: StatusLeds::new(),
            players: PlayerBook::new(),
            rules: AreaConfig::default(),
            active_uid: None,
            last_report: None,
            inbox: RemoteInbox::new(),
            consumed_flags: Vec::new(),
            realign_pending: false,
            pending_cadence: None,
            deferred: Vec::new(),
            exit_reason: None,
            closed: false,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Announce, initialise outputs, then calibrate the rotor.
    pub fn start(&mut self, now: DateTime<Utc>) {
        if let Err(e) = self.remote.announce(VERSION) {
            warn!("Announcing version failed: {}", e);
        }

        if let Err(e) = self.leds.all_off(&mut self.hw) {
            error!("LED init failed: {}", e);
        }
        self.set_led(Led::Ir, Level::High);
        self.set_led(Led::Reader, Level::High);

        self.ctx.now = now;
        self.fsm.start(&mut self.ctx);
        self.apply_outputs();
        self.sink.emit(&DispenserEvent::Started { version: VERSION });
        info!("Dispenser {} started for area {}", VERSION, self.area);

        self.align(now);
    }

    /// Run calibration until the next alignment marker.  A request that
    /// arrives mid-dispense is held until the rotor is idle again.
    pub fn align(&mut self, now: DateTime<Utc>) {
        if self.closed {
            return;
        }
        match self.fsm.current_state() {
            StateId::Idle => {
                self.ir.reset(now);
                self.handle(RotorEvent::Align, now);
            }
            StateId::Calibrating => debug!("Already calibrating"),
            state => {
                info!("Realign deferred until idle (rotor is {:?})", state);
                self.realign_pending = true;
            }
        }
    }

    /// Release `amount` tokens.  Non-positive amounts are a logged no-op.
    pub fn dispense(&mut self, amount: i64, now: DateTime<Utc>) {
        if amount <= 0 {
            info!("Dispensing {}", amount);
            return;
        }
        let amount = u32::try_from(amount).unwrap_or(u32::MAX);
        if self.fsm.current_state() == StateId::Idle {
            self.ir.reset(now);
        }
        self.handle(RotorEvent::Dispense(amount), now);
        if self.fsm.current_state() == StateId::Dispensing {
            self.sink.emit(&DispenserEvent::DispenseStarted {
                amount,
                uid: self.active_uid.clone(),
            });
        } else {
            self.active_uid = None;
        }
    }

    /// Single close path: LEDs low, motor off, hardware released.
    /// Repeated calls are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.leds.all_off(&mut self.hw) {
            error!("Close: LEDs: {}", e);
        }
        if let Err(e) = self.motor.stop(&self.ctx.config, &mut self.hw) {
            error!("Close: motor: {}", e);
        }
        self.hw.release();
        self.deferred.clear();
        self.sink.emit(&DispenserEvent::Closed);
        info!("Dispenser closed");
    }

    // ── Periodic work ─────────────────────────────────────────

    /// Sample the IR sensor while the rotor turns.
    pub fn poll_rotor(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.closed || !self.rotor_active() {
            return Ok(());
        }
        if let Some(half) = self.ir.poll(&mut self.hw, now)? {
            self.on_half_rotation(half, now);
        }
        Ok(())
    }

    /// Jam watchdog: no half rotation within the timeout while dispensing.
    pub fn check_jam(&mut self, now: DateTime<Utc>) {
        if self.closed || self.fsm.current_state() != StateId::Dispensing {
            return;
        }
        if now - self.ctx.last_progress_at > self.ctx.config.jam_timeout() {
            self.sink.emit(&DispenserEvent::JamDetected {
                dispensed: self.ctx.dispensed,
            });
            self.handle(RotorEvent::Jam, now);
        }
    }

    /// Poll the RFID reader and toggle the player's presence.
    pub fn read_tag(&mut self, now: DateTime<Utc>) {
        if self.closed || self.motor.is_running() {
            return;
        }
        let Some(raw) = self.hw.read_tag_uid() else {
            return;
        };
        let Some(uid) = TagUid::try_from_raw(raw) else {
            warn!("Tag UID {:#X} wider than 7 bytes, ignored", raw);
            self.flash(LedFlash::unknown_tag());
            return;
        };

        if !self.players.is_authorized(&uid) {
            error!("Unknown tag checking in for {}", uid);
            self.sink.emit(&DispenserEvent::UnknownTag(uid));
            self.flash(LedFlash::unknown_tag());
            return;
        }

        match self.players.register_read(&uid, now, self.ctx.config.read_grace()) {
            Some(true) => self.check_in(uid, now),
            Some(false) => self.check_out(uid, now),
            None => {
                info!("User {} still in grace period", uid);
                self.sink.emit(&DispenserEvent::GraceRead(uid));
            }
        }
    }

    /// One credit accrual round, pushed in a single batch.
    pub fn credit_tick(&mut self, now: DateTime<Utc>) {
        if self.closed {
            return;
        }
        let updates = self.players.accrue(now, &self.rules);
        if updates.is_empty() {
            return;
        }
        if let Err(e) = self.remote.push_credit(&updates) {
            warn!("Credit push failed: {}", e);
        }
        self.sink.emit(&DispenserEvent::CreditAccrued {
            players: updates.len(),
        });
    }

    /// Re-open closed remote subscriptions.
    pub fn check_watch(&mut self) -> core::result::Result<(), super::ports::RemoteError> {
        self.remote.ensure_subscribed()
    }

    // ── Remote updates ────────────────────────────────────────

    pub fn inbox_sender(&self) -> InboxSender {
        self.inbox.sender()
    }

    /// Apply every queued remote update.
    pub fn drain_inbox(&mut self, now: DateTime<Utc>) {
        let pending: Vec<_> = self.inbox.drain().collect();
        for update in pending {
            self.apply_remote(update, now);
        }
    }

    pub fn apply_remote(&mut self, update: RemoteUpdate, now: DateTime<Utc>) {
        match update {
            RemoteUpdate::Area(snapshot) => self.apply_area(snapshot, now),
            RemoteUpdate::Player(change) => self.players.apply_directory_change(change),
        }
    }

    fn apply_area(&mut self, snapshot: AreaSnapshot, now: DateTime<Utc>) {
        debug!("Updating from area snapshot");
        let raised: Vec<ControlFlag> = snapshot.flags().collect();
        self.consumed_flags.retain(|f| raised.contains(f));
        for flag in raised {
            if self.consumed_flags.contains(&flag) {
                continue;
            }
            self.consumed_flags.push(flag);
            if let Err(e) = self.remote.clear_flag(flag) {
                warn!("Clearing {} failed: {}", flag.field(), e);
            }
            self.apply_flag(flag, now);
        }
        if self.exit_reason.is_some() {
            return;
        }

        if snapshot.config.tick_seconds != self.rules.tick_seconds {
            self.pending_cadence = Some(credit_cadence(snapshot.config.tick_seconds));
        }
        self.rules = snapshot.config;

        for uid in self.players.sync_area(&snapshot.players, now) {
            self.sink.emit(&DispenserEvent::PlayerRemoved(uid));
        }
    }

    fn apply_flag(&mut self, flag: ControlFlag, now: DateTime<Utc>) {
        match flag {
            ControlFlag::Align => {
                info!("Remote realign requested");
                self.align(now);
            }
            ControlFlag::Shutdown => {
                info!("Shutting down");
                self.exit_reason = Some(ExitReason::Shutdown);
                self.close();
            }
            ControlFlag::Update => {
                info!("Update requested, stopping for the supervisor");
                self.exit_reason.get_or_insert(ExitReason::Update);
            }
        }
    }

    // ── Continuations ─────────────────────────────────────────

    /// Run a continuation that came due.
    pub fn perform(&mut self, action: PendingAction, now: DateTime<Utc>) {
        if self.closed {
            return;
        }
        match action {
            PendingAction::SetLed(led, level) => self.set_led(led, level),
            PendingAction::Flash(step) => self.flash(step),
            PendingAction::ResumeAfterJam { jam } => {
                self.handle(RotorEvent::RecoveryElapsed { jam }, now);
            }
        }
    }

    /// Continuations produced since the last call.
    pub fn take_deferred(&mut self) -> Vec<Deferred> {
        mem::take(&mut self.deferred)
    }

    /// New credit job cadence after a `tick_seconds` change.
    pub fn take_credit_cadence(&mut self) -> Option<TimeDelta> {
        self.pending_cadence.take()
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    pub fn requested(&self) -> u32 {
        self.ctx.requested
    }

    pub fn dispensed(&self) -> u32 {
        self.ctx.dispensed
    }

    pub fn jam_count(&self) -> u32 {
        self.ctx.jam_count
    }

    pub fn is_calibrating(&self) -> bool {
        self.state() == StateId::Calibrating
    }

    pub fn is_realign_pending(&self) -> bool {
        self.realign_pending
    }

    pub fn is_recovering(&self) -> bool {
        self.state() == StateId::Recovering
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit_reason
    }

    pub fn motor_duty(&self) -> Option<u16> {
        self.motor.current_duty()
    }

    pub fn led(&self, led: Led) -> Level {
        self.leds.level(led)
    }

    pub fn players(&self) -> &PlayerBook {
        &self.players
    }

    pub fn rules(&self) -> &AreaConfig {
        &self.rules
    }

    pub fn active_uid(&self) -> Option<&TagUid> {
        self.active_uid.as_ref()
    }

    pub fn last_report(&self) -> Option<&DispenseReport> {
        self.last_report.as_ref()
    }

    pub fn config(&self) -> &DispenserConfig {
        &self.ctx.config
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    // ── Internal ──────────────────────────────────────────────

    fn rotor_active(&self) -> bool {
        matches!(
            self.fsm.current_state(),
            StateId::Calibrating | StateId::Dispensing | StateId::Recovering
        )
    }

    fn on_half_rotation(&mut self, half: HalfRotation, now: DateTime<Utc>) {
        info!("Half rotation and coin presence is {}", half.has_coin);
        self.ctx.last_progress_at = now;
        self.sink.emit(&DispenserEvent::HalfRotation {
            has_coin: half.has_coin,
        });
        self.handle(
            RotorEvent::HalfRotation {
                has_coin: half.has_coin,
            },
            now,
        );
    }

    fn check_in(&mut self, uid: TagUid, now: DateTime<Utc>) {
        info!("Checkin for {}", uid);
        self.flash(LedFlash::checkin());

        let elsewhere = self
            .players
            .details(&uid)
            .and_then(|d| d.area.clone())
            .filter(|area| *area != self.area);
        if let Some(other) = elsewhere {
            info!("Checking player out at {}", other);
            if let Err(e) = self.remote.check_out_elsewhere(&other, &uid) {
                warn!("Checkout at {} failed: {}", other, e);
            }
        }

        if let Some(session) = self.players.get_mut(&uid) {
            session.tick_at = now;
        }
        if let Err(e) = self.remote.check_in(&uid, now) {
            warn!("Checkin push for {} failed: {}", uid, e);
        }
        self.sink.emit(&DispenserEvent::CheckedIn(uid));
    }

    fn check_out(&mut self, uid: TagUid, now: DateTime<Utc>) {
        let credit = self.players.get(&uid).map_or(0, |s| s.credit);
        info!("Checkout for {} with credit {}", uid, credit);
        self.sink.emit(&DispenserEvent::CheckedOut {
            uid: uid.clone(),
            credit,
        });

        if credit <= 0 {
            self.flash(LedFlash::zero_credit());
            if let Err(e) = self.remote.check_out(&uid) {
                warn!("Checkout push for {} failed: {}", uid, e);
            }
            return;
        }
        self.active_uid = Some(uid);
        self.dispense(credit, now);
    }

    /// Hand an event to the FSM and apply whatever it asked for.
    fn handle(&mut self, event: RotorEvent, now: DateTime<Utc>) {
        if self.closed {
            return;
        }
        self.ctx.now = now;
        let before = self.fsm.current_state();
        self.fsm.handle(&event, &mut self.ctx);
        self.apply_outputs();

        let after = self.fsm.current_state();
        if after != before {
            self.sink.emit(&DispenserEvent::StateChanged {
                from: before,
                to: after,
            });
        }
        if let Some(report) = self.ctx.report.take() {
            self.complete(report);
        }
        if self.realign_pending && self.fsm.current_state() == StateId::Idle {
            self.realign_pending = false;
            self.align(now);
        }
    }

    /// Translate FSM commands into port calls.
    fn apply_outputs(&mut self) {
        if let Err(e) = self.motor.apply(self.ctx.commands.motor, &self.ctx.config, &mut self.hw) {
            error!("Motor command failed: {}", e);
        }
        for (led, level) in mem::take(&mut self.ctx.commands.leds) {
            self.set_led(led, level);
        }
        self.deferred.append(&mut self.ctx.deferred);
    }

    /// Reconcile a finished dispense locally and remotely.
    fn complete(&mut self, mut report: DispenseReport) {
        report.uid = self.active_uid.take();

        if let Some(uid) = &report.uid {
            if report.is_empty {
                info!("We are empty, we only dispensed {} coins", report.paid_amount);
                if let Some(session) = self.players.get_mut(uid) {
                    session.credit -= i64::from(report.paid_amount);
                    session.present = false;
                }
            } else {
                info!("Dispense done, gave {} coins", report.paid_amount);
                self.players.remove(uid);
            }
        }

        if let Err(e) = self.remote.report_dispense(&report) {
            warn!("Dispense report failed: {}", e);
        }
        self.sink.emit(&DispenserEvent::DispenseCompleted(report.clone()));
        self.last_report = Some(report);
    }

    fn set_led(&mut self, led: Led, level: Level) {
        if let Err(e) = self.leds.set(led, level, &mut self.hw) {
            error!("LED {}: {}", led.name(), e);
        }
    }

    /// Write one flash step now and defer the rest.
    fn flash(&mut self, step: LedFlash) {
        let (level, next) = step.step();
        self.set_led(step.led, level);
        let action = match next {
            FlashNext::Continue(n) => PendingAction::Flash(n),
            FlashNext::Settle(led, end) => PendingAction::SetLed(led, end),
        };
        self.deferred.push(Deferred {
            delay: step.period,
            action,
        });
    }
}
