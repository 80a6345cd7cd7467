//! Unified error types for the dispenser.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! job callbacks' error handling uniform.  Steady-state errors are logged
//! where they happen; this type mostly travels out of port calls and
//! bootstrap code.

use core::fmt;

use crate::app::ports::RemoteError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the dispenser funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A sensor could not be read.
    Sensor(SensorError),
    /// An actuator command failed.
    Actuator(ActuatorError),
    /// An LED was addressed by a name that does not exist.
    UnknownLed(String),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
    /// The remote store rejected or dropped a push.
    Remote(RemoteError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::UnknownLed(name) => write!(f, "LED {name} does not exist"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Remote(e) => write!(f, "remote: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// GPIO read returned an error.
    GpioReadFailed,
    /// No input is configured on the requested pin.
    NoSuchPin(u8),
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioReadFailed => write!(f, "GPIO read failed"),
            Self::NoSuchPin(pin) => write!(f, "no input on GPIO {pin}"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// PWM duty-cycle write failed.
    PwmWriteFailed,
    /// Requested duty exceeds the PWM range.
    DutyOutOfRange(u16),
    /// GPIO set failed.
    GpioWriteFailed,
    /// No output is configured on the requested pin.
    NoSuchPin(u8),
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PwmWriteFailed => write!(f, "PWM write failed"),
            Self::DutyOutOfRange(duty) => write!(f, "duty {duty} out of range"),
            Self::GpioWriteFailed => write!(f, "GPIO write failed"),
            Self::NoSuchPin(pin) => write!(f, "no output on GPIO {pin}"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
