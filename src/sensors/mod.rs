//! Sensor subsystem.
//!
//! The only sensor the core samples itself is the IR rotor sensor; the RFID
//! reader is consumed through [`HardwarePort::read_tag_uid`](crate::app::ports::HardwarePort::read_tag_uid).

pub mod ir_rotor;

pub use ir_rotor::{EdgeClassifier, HalfRotation, IrRotorSensor, majority};
