//! Calibration records: one parsed calibration document per device.
//!
//! Loading is lenient:
//! - files whose name does not carry an MBID are skipped
//! - files that fail to parse are skipped
//!
//! Both cases are logged and remembered in `CalibrationStore::skipped` so the
//! caller can report them at the end of a run.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, warn};
use xmltree::Element;

use crate::calibration::selection::{select_fit, CurveQuery};
use crate::error::CalError;
use crate::io::xml::{attr, children_named, first_child, parser_config, trimmed_text};
use crate::models::FitModel;

/// Default search pattern below a calibration directory (vetted results live in
/// one subdirectory per run).
pub const DEFAULT_PATTERN: &str = "*/domcal*.xml";

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"domcal_([0-9a-f]+)\.xml").expect("valid filename regex"));

/// One device's calibration document.
#[derive(Debug, Clone)]
pub struct CalibrationRecord {
    mbid: String,
    path: PathBuf,
    root: Element,
}

impl CalibrationRecord {
    /// Parse a calibration document from any reader.
    pub fn parse<R: Read>(mbid: impl Into<String>, path: impl Into<PathBuf>, reader: R) -> Result<Self, CalError> {
        let path = path.into();
        let root = Element::parse_with_config(reader, parser_config())
            .map_err(|e| CalError::malformed(&path, e.to_string()))?;
        Ok(Self {
            mbid: mbid.into(),
            path,
            root,
        })
    }

    /// Parse a calibration file, taking the MBID from its name.
    pub fn from_file(path: &Path) -> Result<Self, CalError> {
        let mbid = mbid_from_filename(path)
            .ok_or_else(|| CalError::malformed(path, "file name does not match domcal_<mbid>.xml"))?;
        let file = File::open(path).map_err(|e| CalError::io(path, e))?;
        Self::parse(mbid, path, BufReader::new(file))
    }

    pub fn mbid(&self) -> &str {
        &self.mbid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Select and parse the fit for `query`.
    ///
    /// `Ok(None)` means no entry (or no `<fit>`) was selected.
    pub fn fit(&self, query: &CurveQuery) -> Result<Option<FitModel>, CalError> {
        select_fit(&self.root, query)
            .map(|fit| FitModel::from_element(fit, &query.curve))
            .transpose()
    }

    /// Raw DAC register reading for `channel`.
    pub fn dac(&self, channel: u32) -> Option<i64> {
        let channel = channel.to_string();
        children_named(&self.root, "dac")
            .find(|d| attr(d, "channel") == Some(channel.as_str()))
            .and_then(trimmed_text)
            .and_then(|t| t.parse().ok())
    }

    /// Timing offset entry.
    ///
    /// Sampling-chip offsets (`atwd_delta_t`) are matched on `id == chip`; the
    /// digitizer offset (`fadc_delta_t`) takes the last entry whatever its id.
    /// In both cases a later matching entry overrides an earlier one.
    pub fn delta_t(&self, is_sampling: bool, chip: u32) -> Result<Option<f64>, CalError> {
        let tag = if is_sampling { "atwd_delta_t" } else { "fadc_delta_t" };
        let chip = chip.to_string();
        let mut delta = None;
        for entry in children_named(&self.root, tag) {
            let value = first_child(entry, "delta_t")
                .ok_or_else(|| CalError::malformed(&self.path, format!("<{tag}> without <delta_t>")))?;
            if !is_sampling || attr(entry, "id") == Some(chip.as_str()) {
                let raw = trimmed_text(value).unwrap_or_default();
                let parsed = raw
                    .parse::<f64>()
                    .map_err(|e| CalError::malformed(&self.path, format!("<delta_t> = '{raw}': {e}")))?;
                delta = Some(parsed);
            }
        }
        Ok(delta)
    }
}

/// A file that was found but not loaded.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// All calibration records found under a directory, keyed by MBID.
#[derive(Debug, Clone, Default)]
pub struct CalibrationStore {
    records: HashMap<String, CalibrationRecord>,
    skipped: Vec<SkippedFile>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every file matching `pattern` below `dir`.
    ///
    /// Only an invalid pattern is an error; individual files that cannot be
    /// used are skipped.
    pub fn load(dir: &Path, pattern: &str) -> Result<Self, CalError> {
        let full = dir.join(pattern);
        let full = full.to_string_lossy();
        let entries = glob::glob(&full).map_err(|e| CalError::malformed(dir, format!("bad pattern '{pattern}': {e}")))?;

        let mut store = Self::new();
        let mut paths = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) => paths.push(path),
                Err(e) => store.skip(e.path().to_path_buf(), e.to_string()),
            }
        }

        // Parsing dominates load time for full-detector directories.
        let parsed: Vec<(PathBuf, Result<CalibrationRecord, CalError>)> = paths
            .into_par_iter()
            .map(|path| {
                let result = CalibrationRecord::from_file(&path);
                (path, result)
            })
            .collect();

        for (path, result) in parsed {
            match result {
                Ok(record) => store.insert(record),
                Err(e) => store.skip(path, e.to_string()),
            }
        }

        debug!(dir = %dir.display(), pattern, records = store.len(), skipped = store.skipped.len(), "loaded calibration records");
        Ok(store)
    }

    /// Load one device's record: `domcal_<mbid>.xml` directly under `dir`,
    /// falling back to any subdirectory (unvetted results).
    ///
    /// Files skipped by either search are kept in `skipped`.
    pub fn load_for_device(dir: &Path, mbid: &str) -> Result<Self, CalError> {
        let direct = Self::load(dir, &format!("domcal_{mbid}.xml"))?;
        if direct.exists(mbid) {
            return Ok(direct);
        }
        let mut nested = Self::load(dir, &format!("*/domcal_{mbid}.xml"))?;
        nested.skipped.splice(0..0, direct.skipped);
        Ok(nested)
    }

    pub fn insert(&mut self, record: CalibrationRecord) {
        self.records.insert(record.mbid.clone(), record);
    }

    pub fn get(&self, mbid: &str) -> Option<&CalibrationRecord> {
        self.records.get(mbid)
    }

    pub fn exists(&self, mbid: &str) -> bool {
        self.records.contains_key(mbid)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn mbids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn skipped(&self) -> &[SkippedFile] {
        &self.skipped
    }

    fn skip(&mut self, path: PathBuf, reason: String) {
        warn!(path = %path.display(), %reason, "skipping calibration file");
        self.skipped.push(SkippedFile { path, reason });
    }
}

/// Extract the MBID from a `domcal_<mbid>.xml` file name.
pub fn mbid_from_filename(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    FILENAME_RE.captures(name).map(|c| c[1].to_string())
}
