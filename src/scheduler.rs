//! Cooperative job scheduler.
//!
//! A single-threaded, tick-driven executor of periodic and delayed jobs.
//! Every job callback runs on the thread that calls [`Scheduler::tick`]
//! (or [`Scheduler::run_forever`]), so callbacks never need locks.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Job registry                          │
//! │                                                              │
//! │  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌──────────┐   │
//! │  │ Periodic  │  │ Aligned   │  │ One-shot  │  │ Bound to │   │
//! │  │ (jitter)  │  │ (wall     │  │ (delay)   │  │ instance │   │
//! │  │           │  │  clock)   │  │           │  │ type T   │   │
//! │  └─────┬─────┘  └─────┬─────┘  └─────┬─────┘  └─────┬────┘   │
//! │        ▼              ▼              ▼              ▼        │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ tick(): due? → advance next_due past now → call once   │  │
//! │  └───────────────────────┬────────────────────────────────┘  │
//! │                          ▼                                   │
//! │             sweep disabled jobs, sleep to next ms            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling rules
//!
//! - A non-aligned periodic job gets its first due time on the first sweep
//!   that sees it: `now + interval × U`, `U ∈ [0, 1)`.  That sweep does not
//!   run it.
//! - An aligned job is due at the next wall-clock multiple of its interval,
//!   so aligned jobs sharing an interval fire on the same tick.
//! - When a job is due, `next_due` jumps forward by whole intervals until it
//!   is past `now`, then the callback runs exactly once.  A stalled loop
//!   never replays a backlog.
//! - One-shot jobs are disabled after their single call; disabled jobs are
//!   dropped at the end of the sweep.

use core::any::{Any, type_name};
use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ═══════════════════════════════════════════════════════════════
//  Clock
// ═══════════════════════════════════════════════════════════════

/// Wall-clock source for the scheduler and everything it drives.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

// ═══════════════════════════════════════════════════════════════
//  Job types
// ═══════════════════════════════════════════════════════════════

/// Stable identity of a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(u64);

/// How a job should be scheduled.
#[derive(Debug, Clone, Copy)]
pub struct JobSpec {
    /// Human-readable label, used in logs.
    pub label: &'static str,
    /// Period for repeating jobs, delay for one-shots.
    pub interval: TimeDelta,
    /// Snap due times to wall-clock multiples of `interval`.
    pub aligned: bool,
    /// Run once, then drop.
    pub once: bool,
}

impl JobSpec {
    /// A periodic job with jittered phase.
    pub fn every(label: &'static str, interval: TimeDelta) -> Self {
        Self {
            label,
            interval,
            aligned: false,
            once: false,
        }
    }

    /// A single execution `delay` from now.
    pub fn once(label: &'static str, delay: TimeDelta) -> Self {
        Self {
            label,
            interval: delay,
            aligned: false,
            once: true,
        }
    }

    /// Snap to wall-clock multiples of the interval.
    pub fn aligned(mut self) -> Self {
        self.aligned = true;
        self
    }
}

type StandaloneFn = Box<dyn FnMut() -> anyhow::Result<()>>;
type BoundFn = Box<dyn FnMut(&mut dyn Any, &mut Scheduler) -> anyhow::Result<()>>;

/// The work a job performs, tagged by who owns it.
enum Callback {
    /// Free closure, fires unconditionally.
    Standalone(StandaloneFn),
    /// Fires only while the scheduler runs an instance of the owner type.
    Bound {
        owner: &'static str,
        matches: fn(&dyn Any) -> bool,
        call: BoundFn,
    },
}

impl Callback {
    fn matches(&self, instance: &dyn Any) -> bool {
        match self {
            Self::Standalone(_) => true,
            Self::Bound { matches, .. } => matches(instance),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone(_) => write!(f, "Standalone"),
            Self::Bound { owner, .. } => write!(f, "Bound({owner})"),
        }
    }
}

fn is_instance_of<T: Any>(instance: &dyn Any) -> bool {
    instance.is::<T>()
}

/// Internal bookkeeping for a live job.
#[derive(Debug)]
struct JobEntry {
    handle: JobHandle,
    label: &'static str,
    /// `None` marks a one-shot.
    interval: Option<TimeDelta>,
    next_due: Option<DateTime<Utc>>,
    aligned: bool,
    enabled: bool,
    /// Taken out while the callback runs.
    callback: Option<Callback>,
}

/// Cooperative stop request, observed once per polling period.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// The scheduler engine.
///
/// Owns its job registry exclusively; several independent schedulers can
/// coexist (one per test, for instance).
pub struct Scheduler {
    jobs: Vec<JobEntry>,
    next_handle: u64,
    clock: Box<dyn Clock>,
    rng: StdRng,
    poll_period: TimeDelta,
    stop: StopHandle,
}

/// Default polling period of [`Scheduler::run_forever`].
pub const DEFAULT_POLL_PERIOD: TimeDelta = TimeDelta::milliseconds(1);

impl Scheduler {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self::with_rng(clock, StdRng::from_entropy())
    }

    /// Build with a caller-provided RNG (deterministic jitter in tests).
    pub fn with_rng(clock: Box<dyn Clock>, rng: StdRng) -> Self {
        Self {
            jobs: Vec::new(),
            next_handle: 0,
            clock,
            rng,
            poll_period: DEFAULT_POLL_PERIOD,
            stop: StopHandle::default(),
        }
    }

    /// Change the polling period of the run loop.
    pub fn set_poll_period(&mut self, period: TimeDelta) {
        self.poll_period = period.max(TimeDelta::microseconds(1));
    }

    /// Current time from the scheduler's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// A handle that stops [`run_forever`](Self::run_forever) from anywhere.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.request();
    }

    // ── Registration ──────────────────────────────────────────

    /// Register a standalone job.
    pub fn register(
        &mut self,
        spec: JobSpec,
        f: impl FnMut() -> anyhow::Result<()> + 'static,
    ) -> JobHandle {
        self.insert(spec, Callback::Standalone(Box::new(f)))
    }

    /// Register a job bound to instances of `T`.
    ///
    /// The callback receives the running instance and the scheduler, so it
    /// can chain further jobs.
    pub fn register_bound<T: Any>(
        &mut self,
        spec: JobSpec,
        mut f: impl FnMut(&mut T, &mut Scheduler) -> anyhow::Result<()> + 'static,
    ) -> JobHandle {
        let call: BoundFn = Box::new(move |instance, sched| match instance.downcast_mut::<T>() {
            Some(owner) => f(owner, sched),
            None => Ok(()),
        });
        self.insert(
            spec,
            Callback::Bound {
                owner: type_name::<T>(),
                matches: is_instance_of::<T>,
                call,
            },
        )
    }

    /// Run `f` once, `delay` from now.
    pub fn register_once(
        &mut self,
        label: &'static str,
        delay: TimeDelta,
        f: impl FnMut() -> anyhow::Result<()> + 'static,
    ) -> JobHandle {
        self.register(JobSpec::once(label, delay), f)
    }

    /// Run `f` once against the running `T` instance, `delay` from now.
    pub fn register_once_bound<T: Any>(
        &mut self,
        label: &'static str,
        delay: TimeDelta,
        f: impl FnMut(&mut T, &mut Scheduler) -> anyhow::Result<()> + 'static,
    ) -> JobHandle {
        self.register_bound::<T>(JobSpec::once(label, delay), f)
    }

    fn insert(&mut self, spec: JobSpec, callback: Callback) -> JobHandle {
        let handle = JobHandle(self.next_handle);
        self.next_handle += 1;

        let now = self.clock.now();
        let interval = spec.interval.max(TimeDelta::zero());
        let next_due = match (spec.once, spec.aligned) {
            (true, true) => Some(next_boundary(now, interval)),
            (true, false) => Some(now + interval),
            (false, true) => Some(next_boundary(now, interval)),
            (false, false) => None,
        };

        if spec.once {
            debug!("Scheduler: '{}' once in {}ms", spec.label, interval.num_milliseconds());
        } else {
            info!(
                "Scheduler: added '{}' every {}ms{} ({:?})",
                spec.label,
                interval.num_milliseconds(),
                if spec.aligned { " aligned" } else { "" },
                callback
            );
        }

        self.jobs.push(JobEntry {
            handle,
            label: spec.label,
            interval: (!spec.once).then_some(interval),
            next_due,
            aligned: spec.aligned,
            enabled: true,
            callback: Some(callback),
        });
        handle
    }

    // ── Mutation ──────────────────────────────────────────────

    /// Replace a job's interval in place, re-deriving `next_due` with the
    /// registration rule.  Returns `false` if the handle is gone.
    pub fn reschedule(&mut self, handle: JobHandle, interval: TimeDelta) -> bool {
        let now = self.clock.now();
        let Some(job) = self.jobs.iter_mut().find(|j| j.handle == handle) else {
            return false;
        };
        let interval = interval.max(TimeDelta::zero());
        job.interval = Some(interval);
        job.next_due = job.aligned.then(|| next_boundary(now, interval));
        info!(
            "Scheduler: '{}' rescheduled to every {}ms",
            job.label,
            interval.num_milliseconds()
        );
        true
    }

    /// Disable a job; it never fires again and is dropped on the next sweep.
    pub fn disable(&mut self, handle: JobHandle) -> bool {
        match self.jobs.iter_mut().find(|j| j.handle == handle) {
            Some(job) => {
                job.enabled = false;
                true
            }
            None => false,
        }
    }

    // ── Queries ───────────────────────────────────────────────

    /// Whether the job is registered and enabled.
    pub fn is_active(&self, handle: JobHandle) -> bool {
        self.jobs.iter().any(|j| j.handle == handle && j.enabled)
    }

    pub fn next_due(&self, handle: JobHandle) -> Option<DateTime<Utc>> {
        self.jobs
            .iter()
            .find(|j| j.handle == handle)
            .and_then(|j| j.next_due)
    }

    pub fn interval(&self, handle: JobHandle) -> Option<TimeDelta> {
        self.jobs
            .iter()
            .find(|j| j.handle == handle)
            .and_then(|j| j.interval)
    }

    /// Number of jobs in the registry (disabled ones until the next sweep).
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    // ── Loop ──────────────────────────────────────────────────

    /// One sweep over the registry at the clock's current time.
    ///
    /// `instance` is the object bound jobs run against; pass `&mut ()` when
    /// only standalone jobs are registered.
    pub fn tick(&mut self, instance: &mut dyn Any) {
        let now = self.clock.now();
        let mut has_disabled = false;

        // Jobs registered by callbacks during this sweep wait for the next one.
        let count = self.jobs.len();
        for i in 0..count {
            let job = &mut self.jobs[i];
            if !job.enabled {
                has_disabled = true;
                continue;
            }
            let Some(callback) = job.callback.as_ref() else {
                continue;
            };
            if !callback.matches(instance) {
                continue;
            }

            // First sighting of a jittered periodic job.
            let Some(due) = job.next_due else {
                let interval = job.interval.unwrap_or_default();
                job.next_due = Some(now + jitter(&mut self.rng, interval));
                continue;
            };
            if now < due {
                continue;
            }

            match job.interval {
                Some(interval) => job.next_due = Some(advance_past(due, interval, now)),
                None => {
                    job.enabled = false;
                    has_disabled = true;
                }
            }

            let label = job.label;
            let Some(mut callback) = job.callback.take() else {
                continue;
            };
            let result = match &mut callback {
                Callback::Standalone(f) => f(),
                Callback::Bound { call, .. } => call(instance, self),
            };
            self.jobs[i].callback = Some(callback);

            if let Err(e) = result {
                error!("Scheduler: job '{}' failed: {:#}", label, e);
            }
        }

        if has_disabled || self.jobs.iter().any(|j| !j.enabled) {
            self.jobs.retain(|j| j.enabled);
        }
    }

    /// Tick at the polling period until a stop is requested.
    pub fn run_forever(&mut self, instance: &mut dyn Any) {
        info!(
            "Scheduler: running {} jobs every {}us",
            self.jobs.len(),
            self.poll_period.num_microseconds().unwrap_or_default()
        );
        while !self.stop.is_requested() {
            self.tick(instance);

            let now = self.clock.now();
            let wake = next_boundary(now, self.poll_period);
            if let Ok(pause) = (wake - now).to_std() {
                std::thread::sleep(pause);
            }
        }
        info!("Scheduler: stopped");
    }
}

// ═══════════════════════════════════════════════════════════════
//  Time arithmetic
// ═══════════════════════════════════════════════════════════════

fn micros(delta: TimeDelta) -> i64 {
    delta.num_microseconds().unwrap_or(i64::MAX)
}

/// First wall-clock multiple of `interval` strictly after `now`.
fn next_boundary(now: DateTime<Utc>, interval: TimeDelta) -> DateTime<Utc> {
    let step = micros(interval).max(1);
    let t = now.timestamp_micros();
    let boundary = t - t.rem_euclid(step) + step;
    DateTime::from_timestamp_micros(boundary).unwrap_or(now + interval)
}

/// Move `due` forward by whole intervals until it is past `now`.
fn advance_past(due: DateTime<Utc>, interval: TimeDelta, now: DateTime<Utc>) -> DateTime<Utc> {
    let step = micros(interval).max(1);
    let behind = micros(now - due).max(0);
    let missed = behind / step + 1;
    due + TimeDelta::microseconds(step.saturating_mul(missed))
}

/// `interval × U` with `U` uniform in `[0, 1)`.
fn jitter(rng: &mut StdRng, interval: TimeDelta) -> TimeDelta {
    let u: f64 = rng.r#gen();
    TimeDelta::microseconds((micros(interval) as f64 * u) as i64)
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
