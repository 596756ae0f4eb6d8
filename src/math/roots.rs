//! Closed-form inversion helpers and setting rounding.
//!
//! Inverting a calibration fit means solving `f(x) = y` for `x`:
//!
//! ```text
//! linear:     slope*x + intercept = y
//! quadratic:  c2*x^2 + c1*x + (c0 - y) = 0
//! ```
//!
//! The quadratic always takes the `+sqrt` branch. Calibration curves are fitted
//! over the operating range where that root is the physical one.

use crate::error::CalError;

/// Solve `slope*x + intercept = y`.
pub fn solve_linear(intercept: f64, slope: f64, y: f64) -> Result<f64, CalError> {
    if slope == 0.0 {
        return Err(CalError::DivisionByZero { y });
    }
    Ok((y - intercept) / slope)
}

/// Solve `c2*x^2 + c1*x + c0 = y` on the positive-root branch.
pub fn solve_quadratic(c0: f64, c1: f64, c2: f64, y: f64) -> Result<f64, CalError> {
    let disc = c1 * c1 - 4.0 * c2 * (c0 - y);
    if disc < 0.0 {
        return Err(CalError::NoRealRoot { y });
    }
    if c2 == 0.0 {
        return Err(CalError::DivisionByZero { y });
    }
    Ok((-c1 + disc.sqrt()) / (2.0 * c2))
}

/// Convert a continuous value to an integer register setting.
///
/// Adds one half and truncates toward zero, the rounding every setting in the
/// configuration files has historically been produced with.
pub fn to_setting(x: f64) -> i64 {
    (x + 0.5).trunc() as i64
}
