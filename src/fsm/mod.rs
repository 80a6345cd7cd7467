//! Function-pointer finite state machine engine for the rotor lifecycle.
//!
//! Classic embedded FSM pattern ported to Rust:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  StateTable                                                      │
//! │  ┌─────────────┬──────────┬──────────┬────────────────────────┐  │
//! │  │ StateId     │ on_enter │ on_exit  │ on_event               │  │
//! │  ├─────────────┼──────────┼──────────┼────────────────────────┤  │
//! │  │ Idle        │ fn(ctx)  │    -     │ fn(ctx, ev)->Option<>  │  │
//! │  │ Calibrating │ fn(ctx)  │    -     │ fn(ctx, ev)->Option<>  │  │
//! │  │ Dispensing  │ fn(ctx)  │    -     │ fn(ctx, ev)->Option<>  │  │
//! │  │ Recovering  │ fn(ctx)  │ fn(ctx)  │ fn(ctx, ev)->Option<>  │  │
//! │  │ Completing  │ fn(ctx)  │    -     │ fn(ctx, ev)->Option<>  │  │
//! │  └─────────────┴──────────┴──────────┴────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine hands each [`RotorEvent`] to `on_event` of the **current**
//! state.  If it returns `Some(next_id)`, the engine runs `on_exit` for the
//! current state, then `on_enter` for the next.  A state whose `on_enter`
//! leaves a `follow_up` in the context (the terminal `Completing` step)
//! transitions again immediately.

pub mod context;
pub mod states;

use context::RotorContext;
use log::info;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Enumeration of all rotor states.
/// Must stay in sync with the state table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateId {
    Idle = 0,
    Calibrating = 1,
    Dispensing = 2,
    Recovering = 3,
    Completing = 4,
}

impl StateId {
    /// Total number of states, used to size the table array.
    pub const COUNT: usize = 5;

    /// Convert a `usize` index back to `StateId`.  Panics on out-of-range in
    /// debug builds; returns `Idle` in release.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Idle,
            1 => Self::Calibrating,
            2 => Self::Dispensing,
            3 => Self::Recovering,
            4 => Self::Completing,
            _ => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Idle
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Inputs of the rotor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotorEvent {
    /// Startup or remote realign request.
    Align,
    /// Release this many tokens.
    Dispense(u32),
    /// The IR classifier saw an alignment marker.
    HalfRotation { has_coin: bool },
    /// The jam watchdog saw no progress within the timeout.
    Jam,
    /// The reverse phase of recovery `jam` is over.
    RecoveryElapsed { jam: u32 },
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn = fn(&mut RotorContext);

/// Signature for the event handler.
/// Returns `Some(next)` to trigger a transition, or `None` to stay.
pub type StateEventFn = fn(&mut RotorContext, &RotorEvent) -> Option<StateId>;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

/// Static descriptor for a single FSM state.
pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_event: StateEventFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

/// The finite state machine engine.
pub struct Fsm {
    /// Fixed-size table indexed by `StateId as usize`.
    table: [StateDescriptor; StateId::COUNT],
    /// Index of the currently active state.
    current: usize,
}

impl Fsm {
    /// Construct a new FSM with the given state table, starting in `initial`.
    pub fn new(table: [StateDescriptor; StateId::COUNT], initial: StateId) -> Self {
        Self {
            table,
            current: initial as usize,
        }
    }

    /// Run the initial `on_enter` for the starting state.
    pub fn start(&mut self, ctx: &mut RotorContext) {
        info!("FSM starting in state: {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
        self.run_follow_ups(ctx);
    }

    /// Deliver one event.  Returns `true` if the state changed.
    pub fn handle(&mut self, event: &RotorEvent, ctx: &mut RotorContext) -> bool {
        let before = self.current;
        if let Some(next_id) = (self.table[self.current].on_event)(ctx, event) {
            self.transition(next_id, ctx);
            self.run_follow_ups(ctx);
        }
        self.current != before
    }

    /// The current state's identity.
    pub fn current_state(&self) -> StateId {
        StateId::from_index(self.current)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn run_follow_ups(&mut self, ctx: &mut RotorContext) {
        // A follow-up can chain at most once per state.
        for _ in 0..StateId::COUNT {
            match ctx.follow_up.take() {
                Some(next) => self.transition(next, ctx),
                None => break,
            }
        }
    }

    fn transition(&mut self, next_id: StateId, ctx: &mut RotorContext) {
        let next_idx = next_id as usize;

        info!(
            "FSM transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
