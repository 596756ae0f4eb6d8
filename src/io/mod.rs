//! Input/output helpers.
//!
//! - XML traversal shared by calibration and configuration documents (`xml`)
//! - device nickname table (`nicknames`)
//! - per-device override files (`overrides`)
//! - setting-difference export (`export`)

pub mod export;
pub mod nicknames;
pub mod overrides;
pub mod xml;

pub use export::*;
pub use nicknames::*;
pub use overrides::*;
