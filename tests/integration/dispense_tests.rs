//! Integration tests for the Dispenser → FSM → motor/LED pipeline.
//!
//! The rotor is driven by feeding IR levels at explicit timestamps, so
//! every edge timing is deterministic.

use crate::mock_hw::{
    begin_dispense, feed, half_turn, make_dispenser, ms, started, t0, RemoteCall,
};

use dispenser::app::events::DispenserEvent;
use dispenser::app::ports::Level;
use dispenser::app::service::VERSION;
use dispenser::drivers::status_led::Led;
use dispenser::fsm::context::PendingAction;
use dispenser::fsm::StateId;
use dispenser::pins;

// ── Startup ──────────────────────────────────────────────────

#[test]
fn start_announces_and_calibrates() {
    let mut d = make_dispenser(t0());
    d.start(t0());

    assert_eq!(d.remote().calls[0], RemoteCall::Announce(VERSION.to_string()));
    assert!(d.is_calibrating());
    assert_eq!(d.hardware().last_duty(), Some(100));
    assert_eq!(d.led(Led::Ir), Level::High);
    assert_eq!(d.led(Led::Reader), Level::High);
    assert_eq!(d.led(Led::Holder), Level::Low);
    assert!(matches!(d.sink().events[0], DispenserEvent::Started { .. }));
}

#[test]
fn calibration_stops_at_first_marker() {
    let mut t = t0();
    let d = started(&mut t);

    assert_eq!(d.state(), StateId::Idle);
    assert_eq!(d.hardware().last_duty(), Some(0));
}

#[test]
fn dispense_refused_while_calibrating() {
    let mut d = make_dispenser(t0());
    d.start(t0());
    d.dispense(3, t0());

    assert!(d.is_calibrating());
    assert_eq!(d.requested(), 0);
    assert!(d.active_uid().is_none());
}

// ── Dispense ─────────────────────────────────────────────────

#[test]
fn dispense_five_completes_after_five_coins() {
    let mut t = t0();
    let mut d = started(&mut t);

    begin_dispense(&mut d, &mut t, 5);
    assert_eq!(d.state(), StateId::Dispensing);
    assert_eq!(d.requested(), 5);
    assert_eq!(d.led(Led::Holder), Level::High);
    assert_eq!(d.led(Led::Reader), Level::Low);

    for _ in 0..4 {
        half_turn(&mut d, &mut t, true);
    }
    assert_eq!(d.dispensed(), 4);
    assert_eq!(d.state(), StateId::Dispensing);

    half_turn(&mut d, &mut t, true);
    assert_eq!(d.state(), StateId::Idle);
    assert_eq!(d.requested(), 0);
    assert_eq!(d.hardware().last_duty(), Some(0));

    let report = d.last_report().unwrap();
    assert_eq!(report.paid_amount, 5);
    assert!(!report.is_empty);
    assert_eq!(d.remote().reports().len(), 1);
}

#[test]
fn empty_hopper_aborts_after_streak() {
    let mut t = t0();
    let mut d = started(&mut t);
    begin_dispense(&mut d, &mut t, 5);

    half_turn(&mut d, &mut t, true);
    half_turn(&mut d, &mut t, false);
    half_turn(&mut d, &mut t, false);
    half_turn(&mut d, &mut t, false);
    assert_eq!(d.state(), StateId::Dispensing, "two empty slots are tolerated");

    half_turn(&mut d, &mut t, false);
    assert_eq!(d.state(), StateId::Idle);

    let report = d.last_report().unwrap();
    assert_eq!(report.paid_amount, 2);
    assert!(report.is_empty);
    assert_eq!(report.shortfall(), 3);
}

#[test]
fn coin_resets_empty_streak() {
    let mut t = t0();
    let mut d = started(&mut t);
    begin_dispense(&mut d, &mut t, 3);

    // coin, empty, empty, coin, coin
    half_turn(&mut d, &mut t, false);
    half_turn(&mut d, &mut t, false);
    half_turn(&mut d, &mut t, true);
    assert_eq!(d.dispensed(), 1);
    half_turn(&mut d, &mut t, true);
    half_turn(&mut d, &mut t, true);

    assert_eq!(d.state(), StateId::Idle);
    assert!(!d.last_report().unwrap().is_empty);
    assert_eq!(d.last_report().unwrap().paid_amount, 3);
}

#[test]
fn non_positive_dispense_is_noop() {
    let mut t = t0();
    let mut d = started(&mut t);
    let calls = d.hardware().calls.len();

    d.dispense(0, t);
    d.dispense(-4, t);

    assert_eq!(d.state(), StateId::Idle);
    assert_eq!(d.hardware().calls.len(), calls);
}

#[test]
fn second_dispense_refused_while_running() {
    let mut t = t0();
    let mut d = started(&mut t);
    begin_dispense(&mut d, &mut t, 2);

    d.dispense(7, t);
    assert_eq!(d.requested(), 2);
}

#[test]
fn refused_dispense_keeps_edge_timing() {
    let mut t = t0();
    let mut d = started(&mut t);
    begin_dispense(&mut d, &mut t, 3);
    half_turn(&mut d, &mut t, false);
    assert_eq!(d.dispensed(), 1);

    d.dispense(7, t);
    half_turn(&mut d, &mut t, true);

    assert_eq!(d.dispensed(), 1, "pending empty slot survives the refusal");
    assert_eq!(d.requested(), 3);
}

#[test]
fn leds_restore_after_completion() {
    let mut t = t0();
    let mut d = started(&mut t);
    d.take_deferred();
    begin_dispense(&mut d, &mut t, 1);
    half_turn(&mut d, &mut t, true);

    let deferred = d.take_deferred();
    let restore: Vec<_> = deferred
        .iter()
        .filter(|p| p.delay == ms(3000))
        .map(|p| p.action.clone())
        .collect();
    assert!(restore.contains(&PendingAction::SetLed(Led::Holder, Level::Low)));
    assert!(restore.contains(&PendingAction::SetLed(Led::Reader, Level::High)));

    for action in restore {
        d.perform(action, t + ms(3000));
    }
    assert_eq!(d.led(Led::Holder), Level::Low);
    assert_eq!(d.led(Led::Reader), Level::High);
}

// ── Jam recovery ─────────────────────────────────────────────

#[test]
fn jam_reverses_then_resumes_remaining() {
    let mut t = t0();
    let mut d = started(&mut t);
    begin_dispense(&mut d, &mut t, 4);
    half_turn(&mut d, &mut t, true);
    d.take_deferred();

    d.check_jam(t + ms(1500));
    assert_eq!(d.state(), StateId::Dispensing, "within jam timeout");

    let jam_at = t + ms(2100);
    d.check_jam(jam_at);
    assert!(d.is_recovering());
    assert_eq!(d.jam_count(), 1);
    assert_eq!(d.hardware().last_duty(), Some(200));
    assert_eq!(d.sink().count(|e| matches!(e, DispenserEvent::JamDetected { dispensed: 1 })), 1);

    let resume = d.take_deferred();
    assert_eq!(resume.len(), 1);
    assert_eq!(resume[0].delay, ms(400));
    d.perform(resume[0].action.clone(), jam_at + ms(400));

    assert_eq!(d.state(), StateId::Dispensing);
    assert_eq!(d.hardware().last_duty(), Some(100));
    assert_eq!(d.dispensed(), 1);
    assert_eq!(d.requested(), 4);
}

#[test]
fn stale_recovery_timer_is_ignored() {
    let mut t = t0();
    let mut d = started(&mut t);
    begin_dispense(&mut d, &mut t, 4);

    d.check_jam(t + ms(2100));
    d.perform(PendingAction::ResumeAfterJam { jam: 0 }, t + ms(2500));
    assert!(d.is_recovering());
}

// ── Close ────────────────────────────────────────────────────

#[test]
fn close_is_idempotent() {
    let mut t = t0();
    let mut d = started(&mut t);
    begin_dispense(&mut d, &mut t, 3);

    d.close();
    d.close();

    let hw = d.hardware();
    assert_eq!(hw.releases(), 1);
    assert_eq!(hw.last_duty(), Some(0));
    for pin in [pins::LED_HOLDER_GPIO, pins::LED_READER_GPIO, pins::IR_TX_GPIO] {
        assert_eq!(hw.pin_level(pin), Some(Level::Low), "GPIO{pin} left on");
    }
    assert_eq!(d.sink().count(|e| *e == DispenserEvent::Closed), 1);
}

#[test]
fn closed_dispenser_ignores_work() {
    let mut t = t0();
    let mut d = started(&mut t);
    d.close();
    let calls = d.hardware().calls.len();

    d.dispense(3, t);
    feed(&mut d, t + ms(300), Level::High);
    d.check_jam(t + ms(5000));

    assert_eq!(d.hardware().calls.len(), calls);
    assert_eq!(d.requested(), 0);
}
