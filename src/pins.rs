//! GPIO / peripheral pin assignments for the dispenser board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.  Numbers are BCM GPIO numbers.

// ---------------------------------------------------------------------------
// Rotor motor
// ---------------------------------------------------------------------------

/// Hardware PWM output driving the rotor motor.
pub const MOTOR_PWM_GPIO: u8 = 18;

// ---------------------------------------------------------------------------
// IR rotor sensor
// ---------------------------------------------------------------------------

/// Digital input: IR receiver facing the rotor.
pub const IR_RX_GPIO: u8 = 7;
/// Digital output: IR emitter, kept on while the dispenser runs.
pub const IR_TX_GPIO: u8 = 4;

// ---------------------------------------------------------------------------
// Status LEDs
// ---------------------------------------------------------------------------

/// LED behind the coin holder tray.
pub const LED_HOLDER_GPIO: u8 = 17;
/// LED around the RFID reader.
pub const LED_READER_GPIO: u8 = 24;

// ---------------------------------------------------------------------------
// PWM configuration
// ---------------------------------------------------------------------------

/// PWM range; duty values are in `0..=PWM_RANGE`.
pub const PWM_RANGE: u16 = 2000;
