//! Fit model evaluation and inversion.
//!
//! A calibration curve is either a straight line or a parabola in one
//! independent variable. Parsing turns a `<fit model="...">` element into a
//! `FitModel`; everything after that is pure math.

use std::fmt;

use xmltree::Element;

use crate::error::CalError;
use crate::io::xml::{attr, children_named, trimmed_text};
use crate::math::{solve_linear, solve_quadratic};

/// A parsed calibration fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitModel {
    Linear { intercept: f64, slope: f64 },
    Quadratic { c0: f64, c1: f64, c2: f64 },
}

impl FitModel {
    /// `y = f(x)`.
    pub fn evaluate(&self, x: f64) -> f64 {
        match *self {
            FitModel::Linear { intercept, slope } => slope * x + intercept,
            FitModel::Quadratic { c0, c1, c2 } => c2 * x * x + c1 * x + c0,
        }
    }

    /// Solve `f(x) = y` for `x`.
    pub fn invert(&self, y: f64) -> Result<f64, CalError> {
        match *self {
            FitModel::Linear { intercept, slope } => solve_linear(intercept, slope, y),
            FitModel::Quadratic { c0, c1, c2 } => solve_quadratic(c0, c1, c2, y),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FitModel::Linear { .. } => "linear",
            FitModel::Quadratic { .. } => "quadratic",
        }
    }

    /// Parse a `<fit>` element.
    ///
    /// `curve` is only used to label errors. Unknown `param` names are ignored;
    /// a parameter that appears more than once keeps its last value.
    pub fn from_element(fit: &Element, curve: &str) -> Result<Self, CalError> {
        let model = attr(fit, "model").unwrap_or("");
        match model {
            "linear" => {
                let mut intercept = None;
                let mut slope = None;
                for param in children_named(fit, "param") {
                    match attr(param, "name") {
                        Some("intercept") => intercept = Some(parse_param(param, curve)?),
                        Some("slope") => slope = Some(parse_param(param, curve)?),
                        _ => {}
                    }
                }
                Ok(FitModel::Linear {
                    intercept: require(intercept, curve, "intercept")?,
                    slope: require(slope, curve, "slope")?,
                })
            }
            "quadratic" => {
                let mut coeffs = [None; 3];
                for param in children_named(fit, "param") {
                    let slot = match attr(param, "name") {
                        Some("c0") => 0,
                        Some("c1") => 1,
                        Some("c2") => 2,
                        _ => continue,
                    };
                    coeffs[slot] = Some(parse_param(param, curve)?);
                }
                Ok(FitModel::Quadratic {
                    c0: require(coeffs[0], curve, "c0")?,
                    c1: require(coeffs[1], curve, "c1")?,
                    c2: require(coeffs[2], curve, "c2")?,
                })
            }
            other => Err(CalError::UnknownFitModel(other.to_string())),
        }
    }
}

impl fmt::Display for FitModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitModel::Linear { intercept, slope } => {
                write!(f, "linear(intercept={intercept}, slope={slope})")
            }
            FitModel::Quadratic { c0, c1, c2 } => write!(f, "quadratic(c0={c0}, c1={c1}, c2={c2})"),
        }
    }
}

fn parse_param(param: &Element, curve: &str) -> Result<f64, CalError> {
    let raw = trimmed_text(param).unwrap_or_default();
    // "nan" is legal here: fits taken with the HV off contain it.
    raw.parse::<f64>().map_err(|e| {
        CalError::malformed(
            curve,
            format!("fit parameter '{}' = '{raw}': {e}", attr(param, "name").unwrap_or("?")),
        )
    })
}

fn require(value: Option<f64>, curve: &str, param: &'static str) -> Result<f64, CalError> {
    value.ok_or_else(|| CalError::MissingParameter {
        curve: curve.to_string(),
        param,
    })
}
