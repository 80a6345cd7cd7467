//! Scheduler wiring for the [`Dispenser`].
//!
//! | Job        | Cadence                 | Work                               |
//! |------------|-------------------------|------------------------------------|
//! | `rotor`    | 4 ms, aligned           | IR sample + edge classification    |
//! | `jam`      | 1 s, aligned            | jam watchdog                       |
//! | `tag`      | 500 ms                  | RFID poll, checkin / checkout      |
//! | `credit`   | 15 s (follows area)     | credit accrual round               |
//! | `watch`    | 60 s                    | re-open remote subscriptions       |
//! | `inbox`    | every polling period    | apply queued remote updates        |
//!
//! Continuations the service produces (LED steps, recovery resume) are
//! registered as one-shot jobs after every callback.

use chrono::TimeDelta;

use crate::config::DispenserConfig;
use crate::fsm::context::PendingAction;
use crate::scheduler::{JobHandle, JobSpec, Scheduler};

use super::ports::{EventSink, HardwarePort, RemoteSync};
use super::service::Dispenser;

/// Handles of the periodic jobs.
#[derive(Debug, Clone, Copy)]
pub struct JobHandles {
    pub rotor: JobHandle,
    pub jam: JobHandle,
    pub tag: JobHandle,
    pub credit: JobHandle,
    pub watch: JobHandle,
    pub inbox: JobHandle,
}

fn ms(n: u32) -> TimeDelta {
    TimeDelta::milliseconds(n.into())
}

/// Register every periodic dispenser job and flush anything the service
/// queued during [`Dispenser::start`].
pub fn install<H, R, S>(sched: &mut Scheduler, dispenser: &mut Dispenser<H, R, S>) -> JobHandles
where
    H: HardwarePort + 'static,
    R: RemoteSync + 'static,
    S: EventSink + 'static,
{
    let config: DispenserConfig = dispenser.config().clone();

    let rotor = sched.register_bound::<Dispenser<H, R, S>>(
        JobSpec::every("rotor", ms(config.rotor_poll_ms)).aligned(),
        |d, s| {
            let polled = d.poll_rotor(s.now());
            flush(d, s);
            Ok(polled?)
        },
    );

    let jam = sched.register_bound::<Dispenser<H, R, S>>(
        JobSpec::every("jam", ms(config.jam_check_ms)).aligned(),
        |d, s| {
            d.check_jam(s.now());
            flush(d, s);
            Ok(())
        },
    );

    let tag = sched.register_bound::<Dispenser<H, R, S>>(
        JobSpec::every("tag", ms(config.tag_poll_ms)),
        |d, s| {
            d.read_tag(s.now());
            flush(d, s);
            Ok(())
        },
    );

    let credit = sched.register_bound::<Dispenser<H, R, S>>(
        JobSpec::every("credit", ms(config.credit_tick_ms)),
        |d, s| {
            d.credit_tick(s.now());
            Ok(())
        },
    );

    let watch = sched.register_bound::<Dispenser<H, R, S>>(
        JobSpec::every("watch", TimeDelta::seconds(config.watch_check_secs.into())),
        |d, _| Ok(d.check_watch()?),
    );

    let inbox = sched.register_bound::<Dispenser<H, R, S>>(
        JobSpec::every("inbox", config.poll_period()),
        move |d, s| {
            d.drain_inbox(s.now());
            if let Some(cadence) = d.take_credit_cadence() {
                s.reschedule(credit, cadence);
            }
            flush(d, s);
            Ok(())
        },
    );

    flush(dispenser, sched);

    JobHandles {
        rotor,
        jam,
        tag,
        credit,
        watch,
        inbox,
    }
}

fn label(action: &PendingAction) -> &'static str {
    match action {
        PendingAction::SetLed(..) => "led",
        PendingAction::Flash(_) => "led-flash",
        PendingAction::ResumeAfterJam { .. } => "jam-resume",
    }
}

/// Register queued continuations and honour a stop request.
fn flush<H, R, S>(d: &mut Dispenser<H, R, S>, s: &mut Scheduler)
where
    H: HardwarePort + 'static,
    R: RemoteSync + 'static,
    S: EventSink + 'static,
{
    for deferred in d.take_deferred() {
        let mut action = Some(deferred.action);
        let name = action.as_ref().map_or("once", label);
        s.register_once_bound::<Dispenser<H, R, S>>(name, deferred.delay, move |d, s| {
            if let Some(action) = action.take() {
                d.perform(action, s.now());
            }
            flush(d, s);
            Ok(())
        });
    }

    if d.is_closed() || d.exit_reason().is_some() {
        s.request_stop();
    }
}
