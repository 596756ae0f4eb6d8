//! Export the setting differences of an update run to JSON.
//!
//! The file is meant for downstream plotting: the difference lists sit at the
//! top level, alongside a generation timestamp and the run configuration used.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CalError;
use crate::report::Differences;

/// Default output file for `--save`.
pub const DEFAULT_DIFFERENCES_FILE: &str = "calupdate.txt";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifferencesFile {
    pub generated_at: DateTime<Utc>,
    pub run_config: String,
    #[serde(flatten)]
    pub differences: Differences,
}

pub fn write_differences_json(path: &Path, run_config: &Path, differences: &Differences) -> Result<(), CalError> {
    let file = File::create(path).map_err(|e| CalError::io(path, e))?;
    let doc = DifferencesFile {
        generated_at: Utc::now(),
        run_config: run_config.display().to_string(),
        differences: differences.clone(),
    };
    serde_json::to_writer(BufWriter::new(file), &doc)
        .map_err(|e| CalError::io(path, std::io::Error::other(e)))?;
    Ok(())
}
