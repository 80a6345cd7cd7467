//! Application core: dispenser domain logic, no direct I/O.
//!
//! All interaction with hardware and the remote store happens through
//! **port traits** defined in [`ports`], keeping this layer fully testable
//! without real peripherals.

pub mod commands;
pub mod events;
pub mod inbox;
pub mod jobs;
pub mod players;
pub mod ports;
pub mod service;
