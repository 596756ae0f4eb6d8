//! Calibration curve engine.
//!
//! Responsibilities:
//!
//! - load per-device calibration documents from a results directory (`record`)
//! - select one fit per (curve, filters) query (`selection`)
//! - turn fits into electronics settings and back (`engine`)

pub mod engine;
pub mod record;
pub mod selection;

pub use engine::*;
pub use record::*;
pub use selection::*;
