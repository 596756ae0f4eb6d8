//! Calibration fit models.
//!
//! Models are small `Copy` values so the engine can pass them around freely
//! once they have been parsed out of a calibration document.

pub mod model;

pub use model::*;
