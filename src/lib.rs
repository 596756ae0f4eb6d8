//! `domcal-settings` library crate.
//!
//! The binary (`domcal`) is a thin wrapper around this library so that:
//!
//! - calibration math and configuration editing are testable without
//!   spawning processes
//! - other tools can load calibration results or run configurations directly

pub mod app;
pub mod calibration;
pub mod cli;
pub mod domain;
pub mod error;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod runconfig;
