//! Per-device override files for an update run.
//!
//! All formats are line oriented; `#` starts a comment line and blank lines
//! are ignored. A `-` in an optional column leaves that value unset.
//!
//! - gain: `mbid hv gain`
//! - discriminator: `mbid spe mpe` (integer settings) or `mbid pe` (threshold)
//! - ATWD: `mbid chip bias0 bias1` (`chip` is `0`, `1` or `-`)
//! - baseline: `mbid ...` (recompute baselines for that device)
//!
//! Lines that match no format are reported as row errors and skipped.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::CalError;

static GAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([0-9a-f]+)\s+([-.0-9eE]+)\s+([-.0-9eE]+)").expect("valid gain override regex")
});
static DISC_SETTINGS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([0-9a-f]+)\s+(\d+)\s+(\d+)").expect("valid discriminator override regex"));
static DISC_PE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([0-9a-f]+)\s+([0-9.]+)").expect("valid discriminator override regex"));
static ATWD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([0-9a-f]+)\s+([-01])\s+([-.0-9eE]+)\s+([-.0-9eE]+)").expect("valid ATWD override regex")
});
static BASELINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([0-9a-f]+)(\s|$)").expect("valid baseline override regex"));

/// A line that could not be used.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct GainOverrides {
    /// HV settings in half-volt units.
    pub hv: HashMap<String, i64>,
    pub gain: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct DiscOverrides {
    /// Explicit (SPE, MPE) settings.
    pub settings: HashMap<String, (i64, i64)>,
    /// SPE threshold in PE; MPE follows from the policy offset.
    pub pe: HashMap<String, f64>,
}

/// Trigger bias per ATWD chip. The chip-select column is validated but not
/// applied.
#[derive(Debug, Clone, Default)]
pub struct AtwdOverrides {
    pub bias: [HashMap<String, i64>; 2],
}

#[derive(Debug, Clone, Default)]
pub struct BaselineOverrides {
    pub mbids: HashSet<String>,
}

/// Everything the update run can be told per device.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub gain: GainOverrides,
    pub disc: DiscOverrides,
    pub atwd: AtwdOverrides,
    pub baseline: BaselineOverrides,
    pub row_errors: Vec<(String, RowError)>,
}

impl Overrides {
    /// Load whichever override files were given.
    pub fn load(
        gain: Option<&Path>,
        disc: Option<&Path>,
        atwd: Option<&Path>,
        baseline: Option<&Path>,
    ) -> Result<Self, CalError> {
        let mut out = Overrides::default();
        if let Some(path) = gain {
            let (parsed, errors) = parse_gain(&read(path)?);
            out.gain = parsed;
            out.note_errors(path, errors);
        }
        if let Some(path) = disc {
            let (parsed, errors) = parse_disc(&read(path)?);
            out.disc = parsed;
            out.note_errors(path, errors);
        }
        if let Some(path) = atwd {
            let (parsed, errors) = parse_atwd(&read(path)?);
            out.atwd = parsed;
            out.note_errors(path, errors);
        }
        if let Some(path) = baseline {
            let (parsed, errors) = parse_baseline(&read(path)?);
            out.baseline = parsed;
            out.note_errors(path, errors);
        }
        Ok(out)
    }

    fn note_errors(&mut self, path: &Path, errors: Vec<RowError>) {
        let file = path.display().to_string();
        self.row_errors.extend(errors.into_iter().map(|e| (file.clone(), e)));
    }
}

fn read(path: &Path) -> Result<String, CalError> {
    fs::read_to_string(path).map_err(|e| CalError::io(path, e))
}

/// Non-blank, non-comment lines with 1-based line numbers.
fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines().enumerate().filter_map(|(idx, line)| {
        let trimmed = line.trim();
        (!trimmed.is_empty() && !trimmed.starts_with('#')).then_some((idx + 1, line))
    })
}

/// `None` for `-`, else the parsed value.
fn optional<T: std::str::FromStr>(raw: &str, what: &str) -> Result<Option<T>, String> {
    if raw == "-" {
        return Ok(None);
    }
    raw.parse().map(Some).map_err(|_| format!("bad {what} '{raw}'"))
}

pub fn parse_gain(text: &str) -> (GainOverrides, Vec<RowError>) {
    let mut out = GainOverrides::default();
    let mut errors = Vec::new();
    for (line, raw) in data_lines(text) {
        let Some(caps) = GAIN_RE.captures(raw) else {
            errors.push(RowError { line, message: "expected 'mbid hv gain'".into() });
            continue;
        };
        let mbid = caps[1].to_string();
        let parsed = optional::<i64>(&caps[2], "HV").and_then(|hv| Ok((hv, optional::<f64>(&caps[3], "gain")?)));
        match parsed {
            Ok((hv, gain)) => {
                if let Some(hv) = hv {
                    out.hv.insert(mbid.clone(), hv);
                }
                if let Some(gain) = gain {
                    out.gain.insert(mbid, gain);
                }
            }
            Err(message) => errors.push(RowError { line, message }),
        }
    }
    (out, errors)
}

pub fn parse_disc(text: &str) -> (DiscOverrides, Vec<RowError>) {
    let mut out = DiscOverrides::default();
    let mut errors = Vec::new();
    for (line, raw) in data_lines(text) {
        if let Some(caps) = DISC_SETTINGS_RE.captures(raw) {
            match (caps[2].parse::<i64>(), caps[3].parse::<i64>()) {
                (Ok(spe), Ok(mpe)) => {
                    out.settings.insert(caps[1].to_string(), (spe, mpe));
                }
                _ => errors.push(RowError { line, message: "discriminator setting out of range".into() }),
            }
        } else if let Some(caps) = DISC_PE_RE.captures(raw) {
            match caps[2].parse::<f64>() {
                Ok(pe) => {
                    out.pe.insert(caps[1].to_string(), pe);
                }
                Err(_) => errors.push(RowError { line, message: format!("bad PE threshold '{}'", &caps[2]) }),
            }
        } else {
            errors.push(RowError { line, message: "expected 'mbid spe mpe' or 'mbid pe'".into() });
        }
    }
    (out, errors)
}

pub fn parse_atwd(text: &str) -> (AtwdOverrides, Vec<RowError>) {
    let mut out = AtwdOverrides::default();
    let mut errors = Vec::new();
    for (line, raw) in data_lines(text) {
        let Some(caps) = ATWD_RE.captures(raw) else {
            errors.push(RowError { line, message: "expected 'mbid chip bias0 bias1'".into() });
            continue;
        };
        let mbid = caps[1].to_string();
        let parsed = (|| -> Result<_, String> {
            Ok((
                optional::<u8>(&caps[2], "chip")?,
                optional::<i64>(&caps[3], "ATWD0 bias")?,
                optional::<i64>(&caps[4], "ATWD1 bias")?,
            ))
        })();
        match parsed {
            Ok((_chip, bias0, bias1)) => {
                if let Some(b) = bias0 {
                    out.bias[0].insert(mbid.clone(), b);
                }
                if let Some(b) = bias1 {
                    out.bias[1].insert(mbid, b);
                }
            }
            Err(message) => errors.push(RowError { line, message }),
        }
    }
    (out, errors)
}

pub fn parse_baseline(text: &str) -> (BaselineOverrides, Vec<RowError>) {
    let mut out = BaselineOverrides::default();
    let mut errors = Vec::new();
    for (line, raw) in data_lines(text) {
        match BASELINE_RE.captures(raw) {
            Some(caps) => {
                out.mbids.insert(caps[1].to_string());
            }
            None => errors.push(RowError { line, message: "expected an MBID".into() }),
        }
    }
    (out, errors)
}
