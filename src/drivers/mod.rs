//! Actuator drivers: rotor motor and status LEDs.

pub mod motor;
pub mod status_led;
