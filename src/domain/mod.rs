//! Domain types used throughout the crate.
//!
//! This module defines:
//!
//! - device positions and classes (`Position`, `DeviceClass`)
//! - ATWD chips and the baseline matrix (`Chip`, `BaselineMatrix`)
//! - the update policy (`PolicyConfig`)

pub mod types;

pub use types::*;
