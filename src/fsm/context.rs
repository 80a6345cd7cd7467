//! Shared mutable context threaded through every FSM handler.
//!
//! `RotorContext` is the single struct that state handlers read from and
//! write to: dispense counters, timing stamps, the commands the service
//! applies to the hardware after each transition, and continuations to be
//! registered with the scheduler.  Think of it as the "blackboard" in a
//! blackboard architecture.

use chrono::{DateTime, TimeDelta, Utc};

use crate::app::events::DispenseReport;
use crate::app::ports::Level;
use crate::config::DispenserConfig;
use crate::drivers::motor::MotorCommand;
use crate::drivers::status_led::{Led, LedFlash};

use super::StateId;

// ---------------------------------------------------------------------------
// Continuations
// ---------------------------------------------------------------------------

/// Work to run later on the tick thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    /// Drive one LED.
    SetLed(Led, Level),
    /// Next step of a flash sequence.
    Flash(LedFlash),
    /// End of the reverse phase of jam recovery number `jam`.
    ResumeAfterJam { jam: u32 },
}

/// A continuation plus the delay it waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferred {
    pub delay: TimeDelta,
    pub action: PendingAction,
}

// ---------------------------------------------------------------------------
// Actuator commands (written by state handlers; applied by the service)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RotorCommands {
    /// Desired motor operating point.
    pub motor: MotorCommand,
    /// LED writes requested since the last apply.
    pub leds: Vec<(Led, Level)>,
}

// ---------------------------------------------------------------------------
// RotorContext
// ---------------------------------------------------------------------------

/// The shared context passed to every state handler function.
pub struct RotorContext {
    pub config: DispenserConfig,

    // -- Timing --
    /// Time of the event being handled.  Set by the service.
    pub now: DateTime<Utc>,
    /// Last confirmed half rotation; the jam watchdog's liveness signal.
    pub last_progress_at: DateTime<Utc>,

    // -- Dispense session --
    /// Tokens requested (0 = idle).
    pub requested: u32,
    /// Tokens confirmed so far.
    pub dispensed: u32,
    /// Consecutive half rotations without a token.
    pub empty_streak: u8,
    /// Jam recoveries started since boot.
    pub jam_count: u32,

    // -- Outputs --
    pub commands: RotorCommands,
    pub deferred: Vec<Deferred>,
    /// Set by `Completing`; taken by the service.
    pub report: Option<DispenseReport>,
    /// Transition to run right after the current `on_enter`.
    pub follow_up: Option<StateId>,
}

impl RotorContext {
    pub fn new(config: DispenserConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            now,
            last_progress_at: now,
            requested: 0,
            dispensed: 0,
            empty_streak: 0,
            jam_count: 0,
            commands: RotorCommands::default(),
            deferred: Vec::new(),
            report: None,
            follow_up: None,
        }
    }

    pub fn set_led(&mut self, led: Led, level: Level) {
        self.commands.leds.push((led, level));
    }

    pub fn defer(&mut self, delay: TimeDelta, action: PendingAction) {
        self.deferred.push(Deferred { delay, action });
    }

    /// Tokens still owed in the current dispense.
    pub fn remaining(&self) -> u32 {
        self.requested.saturating_sub(self.dispensed)
    }
}
