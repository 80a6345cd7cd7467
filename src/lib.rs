//! Token dispenser library.
//!
//! Exposes the pure-logic modules and the adapters for integration testing
//! and for the host binary.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod fsm;
pub mod pins;
pub mod scheduler;
pub mod sensors;
