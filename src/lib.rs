//! VialCtl control core library.
//!
//! The control core of a fleet of autonomous bioreactor vials: each job
//! periodically samples cached sensor state, decides whether to dose fresh
//! medium, a growth-inhibiting alternate medium, or remove waste, and
//! enforces physical limits on every single actuation.
//!
//! All I/O flows through the port traits in [`ports`]; raw sensor
//! acquisition, pump hardware, and the bus transport itself live in
//! external adapters supplied by the surrounding process.

#![deny(unused_must_use)]

pub mod actuation;
pub mod bus;
pub mod config;
pub mod control;
pub mod controller;
pub mod dosing;
pub mod events;
pub mod ports;
pub mod protocol;
pub mod sensors;

mod error;

pub use error::{ActuatorError, Error, Result};
