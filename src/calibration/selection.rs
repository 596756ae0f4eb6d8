//! Curve selection within one device's calibration document.
//!
//! A query names a curve element (`hvGainCal`, `atwd`, ...) and a list of
//! attribute filters. Selection rules:
//! 1. Consider every direct child with the curve name, in document order.
//! 2. An entry passes only if every filter attribute equals the expected string.
//! 3. The last passing entry wins. Its `<fit>` child, if any, is the result.
//!
//! Ambiguous filters are not resolved any further; callers must pass filters
//! specific enough to pick a single entry.

use std::fmt;

use xmltree::Element;

use crate::io::xml::{attr, children_named, first_child};

/// Curve name plus ordered attribute filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurveQuery {
    pub curve: String,
    pub filters: Vec<(String, String)>,
}

impl CurveQuery {
    pub fn new(curve: impl Into<String>) -> Self {
        Self {
            curve: curve.into(),
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, attribute: impl Into<String>, value: impl ToString) -> Self {
        self.filters.push((attribute.into(), value.to_string()));
        self
    }

    fn matches(&self, entry: &Element) -> bool {
        self.filters
            .iter()
            .all(|(name, expected)| attr(entry, name) == Some(expected.as_str()))
    }
}

impl fmt::Display for CurveQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.curve)?;
        if !self.filters.is_empty() {
            let parts: Vec<String> = self.filters.iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, "[{}]", parts.join(","))?;
        }
        Ok(())
    }
}

/// Select the `<fit>` element for `query` under `root`.
pub fn select_fit<'a>(root: &'a Element, query: &CurveQuery) -> Option<&'a Element> {
    let entry = children_named(root, &query.curve)
        .filter(|entry| query.matches(entry))
        .last()?;
    first_child(entry, "fit")
}
