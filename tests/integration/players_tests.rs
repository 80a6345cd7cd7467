//! Integration tests for tag reads, credit accrual and remote updates.

use std::collections::BTreeMap;

use crate::mock_hw::{begin_dispense, feed, half_turn, ms, started, t0, RemoteCall, TestDispenser, AREA};

use chrono::{DateTime, TimeDelta, Utc};
use dispenser::app::commands::{
    AreaSnapshot, ControlFlag, PlayerChange, PlayerDetails, RemotePlayer, RemoteUpdate,
};
use dispenser::app::events::DispenserEvent;
use dispenser::app::players::TagUid;
use dispenser::app::ports::Level;
use dispenser::app::service::ExitReason;
use dispenser::config::AreaConfig;
use dispenser::drivers::status_led::Led;
use dispenser::fsm::context::PendingAction;
use dispenser::fsm::StateId;

const TAG: u64 = 0x04A1_B2C3_D4E5_F6;

fn uid() -> TagUid {
    TagUid::from_raw(TAG)
}

fn register(d: &mut TestDispenser, area: Option<&str>, now: DateTime<Utc>) {
    d.apply_remote(
        RemoteUpdate::Player(PlayerChange::Added(
            uid().to_string(),
            PlayerDetails {
                name: "Ada".into(),
                area: area.map(str::to_string),
            },
        )),
        now,
    );
}

fn snapshot(players: &[(TagUid, RemotePlayer)]) -> AreaSnapshot {
    AreaSnapshot {
        config: AreaConfig {
            tick_seconds: 10,
            tick_amount: 1,
            limit: 25,
        },
        players: players
            .iter()
            .map(|(u, p)| (u.to_string(), p.clone()))
            .collect::<BTreeMap<_, _>>(),
        ..AreaSnapshot::default()
    }
}

// ── Tag reads ────────────────────────────────────────────────

#[test]
fn unknown_tag_flashes_reader() {
    let mut t = t0();
    let mut d = started(&mut t);
    d.take_deferred();
    d.hardware_mut().tag = Some(TAG);

    d.read_tag(t);

    assert_eq!(d.sink().count(|e| matches!(e, DispenserEvent::UnknownTag(_))), 1);
    assert_eq!(d.led(Led::Reader), Level::Low);
    let next = d.take_deferred();
    assert!(matches!(next[0].action, PendingAction::Flash(_)));
    assert!(d.players().get(&uid()).is_none());
}

#[test]
fn wide_tag_uid_is_not_folded_onto_a_player() {
    let mut t = t0();
    let mut d = started(&mut t);
    register(&mut d, None, t);
    d.hardware_mut().tag = Some(TAG | 0xFF00_0000_0000_0000);

    d.read_tag(t);

    assert!(!d.players().get(&uid()).is_some_and(|s| s.present));
    assert_eq!(d.remote().count(|c| matches!(c, RemoteCall::CheckIn(_))), 0);
    assert_eq!(d.led(Led::Reader), Level::Low);
}

#[test]
fn checkin_then_debounced_then_checkout() {
    let mut t = t0();
    let mut d = started(&mut t);
    register(&mut d, None, t);
    d.hardware_mut().tag = Some(TAG);

    d.read_tag(t);
    assert!(d.players().get(&uid()).unwrap().present);
    assert!(d.remote().calls.contains(&RemoteCall::CheckIn(uid())));

    d.read_tag(t + ms(1000));
    assert!(d.players().get(&uid()).unwrap().present, "read inside grace period");
    assert_eq!(d.sink().count(|e| matches!(e, DispenserEvent::GraceRead(_))), 1);

    d.read_tag(t + ms(3000));
    assert!(!d.players().get(&uid()).unwrap().present);
    assert!(d.remote().calls.contains(&RemoteCall::CheckOut(uid())));
    assert_eq!(d.state(), StateId::Idle, "no credit, no dispense");
}

#[test]
fn checkin_clears_presence_in_other_area() {
    let mut t = t0();
    let mut d = started(&mut t);
    register(&mut d, Some("bowling"), t);
    d.hardware_mut().tag = Some(TAG);

    d.read_tag(t);

    assert!(d
        .remote()
        .calls
        .contains(&RemoteCall::CheckOutElsewhere("bowling".into(), uid())));
}

#[test]
fn checkin_in_same_area_skips_elsewhere_checkout() {
    let mut t = t0();
    let mut d = started(&mut t);
    register(&mut d, Some(AREA), t);
    d.hardware_mut().tag = Some(TAG);

    d.read_tag(t);

    assert_eq!(
        d.remote().count(|c| matches!(c, RemoteCall::CheckOutElsewhere(..))),
        0
    );
}

#[test]
fn reads_ignored_while_motor_runs() {
    let mut t = t0();
    let mut d = started(&mut t);
    register(&mut d, None, t);
    begin_dispense(&mut d, &mut t, 2);
    d.hardware_mut().tag = Some(TAG);

    d.read_tag(t);
    assert!(d.players().get(&uid()).is_none());
}

#[test]
fn checkout_with_credit_dispenses_and_settles() {
    let mut t = t0();
    let mut d = started(&mut t);
    register(&mut d, None, t);
    d.apply_remote(
        RemoteUpdate::Area(snapshot(&[(
            uid(),
            RemotePlayer {
                present: true,
                credit: 2,
                tick: Some(t),
            },
        )])),
        t,
    );
    d.hardware_mut().tag = Some(TAG);

    // Sessions synced from the area start a fresh grace period.
    t += ms(3000);
    d.read_tag(t);
    assert_eq!(d.state(), StateId::Dispensing);
    assert_eq!(d.requested(), 2);
    assert_eq!(d.active_uid(), Some(&uid()));

    d.hardware_mut().tag = None;
    t += ms(20);
    feed(&mut d, t, Level::Low);
    half_turn(&mut d, &mut t, true);
    half_turn(&mut d, &mut t, true);

    assert_eq!(d.state(), StateId::Idle);
    let report = d.remote().reports()[0].clone();
    assert_eq!(report.paid_amount, 2);
    assert_eq!(report.uid, Some(uid()));
    assert!(d.players().get(&uid()).is_none(), "paid out in full");
    assert!(d.active_uid().is_none());
}

#[test]
fn empty_hopper_keeps_unpaid_credit() {
    let mut t = t0();
    let mut d = started(&mut t);
    register(&mut d, None, t);
    d.apply_remote(
        RemoteUpdate::Area(snapshot(&[(
            uid(),
            RemotePlayer {
                present: true,
                credit: 5,
                tick: Some(t),
            },
        )])),
        t,
    );
    d.hardware_mut().tag = Some(TAG);
    t += ms(3000);
    d.read_tag(t);
    d.hardware_mut().tag = None;

    t += ms(20);
    feed(&mut d, t, Level::Low);
    half_turn(&mut d, &mut t, false);
    for _ in 0..3 {
        half_turn(&mut d, &mut t, false);
    }

    let report = d.last_report().unwrap();
    assert!(report.is_empty);
    assert_eq!(report.paid_amount, 1);
    let session = d.players().get(&uid()).unwrap();
    assert_eq!(session.credit, 4);
    assert!(!session.present);
}

// ── Credit ───────────────────────────────────────────────────

#[test]
fn credit_accrues_whole_intervals_in_one_push() {
    let mut t = t0();
    let mut d = started(&mut t);
    d.apply_remote(
        RemoteUpdate::Area(snapshot(&[(
            uid(),
            RemotePlayer {
                present: true,
                credit: 0,
                tick: Some(t),
            },
        )])),
        t,
    );

    d.credit_tick(t + TimeDelta::seconds(35));

    let session = d.players().get(&uid()).unwrap();
    assert_eq!(session.credit, 3);
    assert_eq!(session.tick_at, t + TimeDelta::seconds(30));

    let pushes: Vec<_> = d
        .remote()
        .calls
        .iter()
        .filter_map(|c| match c {
            RemoteCall::PushCredit(u) => Some(u.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0][0].delta, 3);
}

#[test]
fn credit_round_without_change_pushes_nothing() {
    let mut t = t0();
    let mut d = started(&mut t);
    d.apply_remote(
        RemoteUpdate::Area(snapshot(&[(
            uid(),
            RemotePlayer {
                present: false,
                credit: 4,
                tick: Some(t),
            },
        )])),
        t,
    );

    d.credit_tick(t + TimeDelta::seconds(60));
    assert_eq!(d.remote().count(|c| matches!(c, RemoteCall::PushCredit(_))), 0);
}

#[test]
fn area_snapshot_drops_players_it_no_longer_lists() {
    let mut t = t0();
    let mut d = started(&mut t);
    let player = RemotePlayer {
        present: true,
        credit: 1,
        tick: Some(t),
    };
    d.apply_remote(RemoteUpdate::Area(snapshot(&[(uid(), player)])), t);
    assert_eq!(d.players().len(), 1);

    d.apply_remote(RemoteUpdate::Area(snapshot(&[])), t);
    assert!(d.players().is_empty());
    assert_eq!(d.sink().count(|e| matches!(e, DispenserEvent::PlayerRemoved(_))), 1);
}

// ── Control flags ────────────────────────────────────────────

#[test]
fn align_flag_handled_once_until_cleared() {
    let mut t = t0();
    let mut d = started(&mut t);
    let raised = AreaSnapshot {
        is_align: true,
        ..snapshot(&[])
    };

    d.apply_remote(RemoteUpdate::Area(raised.clone()), t);
    assert!(d.is_calibrating());
    assert!(d.remote().calls.contains(&RemoteCall::ClearFlag(ControlFlag::Align)));

    t += ms(10);
    feed(&mut d, t, Level::Low);
    half_turn(&mut d, &mut t, true);
    assert_eq!(d.state(), StateId::Idle);

    // Echo of the same snapshot before the clear lands.
    d.apply_remote(RemoteUpdate::Area(raised.clone()), t);
    assert_eq!(d.state(), StateId::Idle);

    d.apply_remote(RemoteUpdate::Area(snapshot(&[])), t);
    d.apply_remote(RemoteUpdate::Area(raised), t);
    assert!(d.is_calibrating());
}

#[test]
fn align_flag_mid_dispense_waits_for_idle() {
    let mut t = t0();
    let mut d = started(&mut t);
    begin_dispense(&mut d, &mut t, 5);
    half_turn(&mut d, &mut t, true);
    half_turn(&mut d, &mut t, false);
    assert_eq!(d.dispensed(), 2);

    d.apply_remote(
        RemoteUpdate::Area(AreaSnapshot {
            is_align: true,
            ..snapshot(&[])
        }),
        t,
    );
    assert_eq!(d.state(), StateId::Dispensing);
    assert!(d.is_realign_pending());

    // The slow falling edge before the flag still marks this slot empty.
    half_turn(&mut d, &mut t, true);
    assert_eq!(d.dispensed(), 2, "empty slot must not be paid");

    for _ in 0..3 {
        half_turn(&mut d, &mut t, true);
    }
    assert_eq!(d.last_report().unwrap().paid_amount, 5);
    assert!(d.is_calibrating(), "held realign runs once idle");
    assert!(!d.is_realign_pending());

    t += ms(10);
    feed(&mut d, t, Level::Low);
    half_turn(&mut d, &mut t, true);
    assert_eq!(d.state(), StateId::Idle);
}

#[test]
fn shutdown_flag_closes() {
    let mut t = t0();
    let mut d = started(&mut t);

    d.apply_remote(
        RemoteUpdate::Area(AreaSnapshot {
            is_shutdown: true,
            ..snapshot(&[])
        }),
        t,
    );

    assert!(d.is_closed());
    assert_eq!(d.exit_reason(), Some(ExitReason::Shutdown));
    assert_eq!(d.hardware().releases(), 1);
}

#[test]
fn update_flag_stops_without_applying_rules() {
    let mut t = t0();
    let mut d = started(&mut t);
    let before = *d.rules();

    d.apply_remote(
        RemoteUpdate::Area(AreaSnapshot {
            is_update: true,
            ..snapshot(&[])
        }),
        t,
    );

    assert_eq!(d.exit_reason(), Some(ExitReason::Update));
    assert!(!d.is_closed());
    assert_eq!(*d.rules(), before);
}

#[test]
fn tick_change_requests_new_credit_cadence() {
    let mut t = t0();
    let mut d = started(&mut t);

    d.apply_remote(RemoteUpdate::Area(snapshot(&[])), t);
    assert_eq!(d.take_credit_cadence(), Some(TimeDelta::seconds(2)));
    assert_eq!(d.rules().tick_seconds, 10);

    d.apply_remote(RemoteUpdate::Area(snapshot(&[])), t);
    assert_eq!(d.take_credit_cadence(), None, "unchanged tick keeps cadence");
}
