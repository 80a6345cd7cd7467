//! Concrete state handler functions and table builder.
//!
//! Each state is defined by plain `fn` pointers: no closures, no dynamic
//! dispatch.
//!
//! ```text
//!  IDLE ──[align]──▶ CALIBRATING ──[first marker]──▶ IDLE
//!    │
//!  [dispense n>0]
//!    ▼
//!  DISPENSING ──[jam]──▶ RECOVERING ──[reverse elapsed]──▶ DISPENSING
//!    │                      │
//!  [count reached / empty streak ceiling]
//!    ▼                      ▼
//!  COMPLETING ──[immediately]──▶ IDLE
//! ```

use log::{debug, error, info, warn};

use super::context::{PendingAction, RotorContext};
use super::{RotorEvent, StateDescriptor, StateId};
use crate::app::events::DispenseReport;
use crate::app::ports::Level;
use crate::drivers::motor::MotorCommand;
use crate::drivers::status_led::Led;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once at startup.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        // Index 0: Idle
        StateDescriptor {
            id: StateId::Idle,
            name: "Idle",
            on_enter: Some(idle_enter),
            on_exit: None,
            on_event: idle_event,
        },
        // Index 1: Calibrating
        StateDescriptor {
            id: StateId::Calibrating,
            name: "Calibrating",
            on_enter: Some(calibrating_enter),
            on_exit: None,
            on_event: calibrating_event,
        },
        // Index 2: Dispensing
        StateDescriptor {
            id: StateId::Dispensing,
            name: "Dispensing",
            on_enter: Some(dispensing_enter),
            on_exit: None,
            on_event: dispensing_event,
        },
        // Index 3: Recovering
        StateDescriptor {
            id: StateId::Recovering,
            name: "Recovering",
            on_enter: Some(recovering_enter),
            on_exit: Some(recovering_exit),
            on_event: recovering_event,
        },
        // Index 4: Completing
        StateDescriptor {
            id: StateId::Completing,
            name: "Completing",
            on_enter: Some(completing_enter),
            on_exit: None,
            on_event: completing_event,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  Shared
// ═══════════════════════════════════════════════════════════════════════════

/// Count one half rotation of an active dispense.
fn count_half_rotation(ctx: &mut RotorContext, has_coin: bool) -> Option<StateId> {
    if has_coin {
        ctx.empty_streak = 0;
        ctx.dispensed += 1;
        debug!("Dispensed {}/{}", ctx.dispensed, ctx.requested);
    } else {
        ctx.empty_streak = ctx.empty_streak.saturating_add(1);
        debug!("Empty slot ({} in a row)", ctx.empty_streak);
    }

    if ctx.dispensed >= ctx.requested || ctx.empty_streak >= ctx.config.empty_streak_limit {
        Some(StateId::Completing)
    } else {
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  IDLE state
// ═══════════════════════════════════════════════════════════════════════════

fn idle_enter(ctx: &mut RotorContext) {
    ctx.commands.motor = MotorCommand::Off;
}

fn idle_event(ctx: &mut RotorContext, event: &RotorEvent) -> Option<StateId> {
    match *event {
        RotorEvent::Align => Some(StateId::Calibrating),
        RotorEvent::Dispense(0) => {
            info!("Dispensing 0");
            None
        }
        RotorEvent::Dispense(amount) => {
            info!("Dispensing {}", amount);
            ctx.requested = amount;
            ctx.dispensed = 0;
            ctx.empty_streak = 0;
            Some(StateId::Dispensing)
        }
        RotorEvent::HalfRotation { .. } | RotorEvent::Jam | RotorEvent::RecoveryElapsed { .. } => {
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  CALIBRATING state: run until the first alignment marker
// ═══════════════════════════════════════════════════════════════════════════

fn calibrating_enter(ctx: &mut RotorContext) {
    ctx.commands.motor = MotorCommand::Forward;
    ctx.last_progress_at = ctx.now;
    info!("CALIBRATING: turning rotor to the alignment marker");
}

fn calibrating_event(_ctx: &mut RotorContext, event: &RotorEvent) -> Option<StateId> {
    match event {
        RotorEvent::HalfRotation { .. } => {
            info!("Rotor aligned");
            Some(StateId::Idle)
        }
        RotorEvent::Dispense(amount) => {
            warn!("Dispense of {} refused while calibrating", amount);
            None
        }
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  DISPENSING state
// ═══════════════════════════════════════════════════════════════════════════

fn dispensing_enter(ctx: &mut RotorContext) {
    ctx.commands.motor = MotorCommand::Forward;
    ctx.last_progress_at = ctx.now;
    ctx.set_led(Led::Reader, Level::Low);
    ctx.set_led(Led::Holder, Level::High);
}

fn dispensing_event(ctx: &mut RotorContext, event: &RotorEvent) -> Option<StateId> {
    match *event {
        RotorEvent::HalfRotation { has_coin } => count_half_rotation(ctx, has_coin),
        RotorEvent::Jam => Some(StateId::Recovering),
        RotorEvent::Dispense(amount) => {
            warn!("Dispense of {} refused, {} still pending", amount, ctx.remaining());
            None
        }
        RotorEvent::Align | RotorEvent::RecoveryElapsed { .. } => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  RECOVERING state: reverse, then resume for the remaining tokens
// ═══════════════════════════════════════════════════════════════════════════

fn recovering_enter(ctx: &mut RotorContext) {
    ctx.jam_count += 1;
    ctx.commands.motor = MotorCommand::Reverse;
    error!("Jam after {} coins, recovering...", ctx.dispensed);
    let delay = ctx.config.jam_reverse();
    ctx.defer(delay, PendingAction::ResumeAfterJam { jam: ctx.jam_count });
}

fn recovering_exit(ctx: &mut RotorContext) {
    info!("Recovery done, {} coins remaining", ctx.remaining());
}

fn recovering_event(ctx: &mut RotorContext, event: &RotorEvent) -> Option<StateId> {
    match *event {
        RotorEvent::HalfRotation { has_coin } => count_half_rotation(ctx, has_coin),
        RotorEvent::RecoveryElapsed { jam } if jam == ctx.jam_count => Some(StateId::Dispensing),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  COMPLETING state: terminal step, hands off to Idle immediately
// ═══════════════════════════════════════════════════════════════════════════

fn completing_enter(ctx: &mut RotorContext) {
    ctx.commands.motor = MotorCommand::Off;

    let restore = ctx.config.led_restore();
    ctx.defer(restore, PendingAction::SetLed(Led::Holder, Level::Low));
    ctx.defer(restore, PendingAction::SetLed(Led::Reader, Level::High));

    let is_empty = ctx.empty_streak >= ctx.config.empty_streak_limit;
    if is_empty {
        warn!(
            "Hopper empty: paid {} of {} coins",
            ctx.dispensed, ctx.requested
        );
    }
    ctx.report = Some(DispenseReport {
        paid_amount: ctx.dispensed,
        requested: ctx.requested,
        is_empty,
        uid: None,
    });
    ctx.requested = 0;
    ctx.follow_up = Some(StateId::Idle);
}

fn completing_event(_ctx: &mut RotorContext, _event: &RotorEvent) -> Option<StateId> {
    None
}
