//! Run results: per-run counters and the setting differences collected while
//! updating, plus their terminal formatting (`format`).

use serde::{Deserialize, Serialize};

use crate::calibration::SkippedFile;
use crate::domain::DeviceClass;

pub mod format;

pub use format::*;

/// Setting differences (new − old) grouped by device class.
///
/// Field names match the keys downstream plotting scripts expect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Differences {
    /// HV change in volts.
    pub hv_diff_list: Vec<f64>,
    #[serde(rename = "hvDiffListIT")]
    pub hv_diff_list_surface: Vec<f64>,
    pub hv_diff_list_scint: Vec<f64>,

    /// Gain change in percent of the target gain.
    pub gain_diff_list: Vec<f64>,
    #[serde(rename = "gainDiffListIT")]
    pub gain_diff_list_surface: Vec<f64>,
    pub gain_diff_list_scint: Vec<f64>,

    pub spe_disc_list: Vec<i64>,
    #[serde(rename = "speDiscListIT")]
    pub spe_disc_list_surface: Vec<i64>,
    pub spe_disc_list_scint: Vec<i64>,
    /// Target minus old threshold in PE (in-ice only).
    #[serde(rename = "speDiscPEList")]
    pub spe_disc_pe_list: Vec<f64>,

    /// Trigger bias change, two entries (chip 0, chip 1) per device.
    pub atwd_freq_list: Vec<i64>,
    /// Target minus old sampling speed in MHz, two entries per device.
    #[serde(rename = "atwdFreqMHzList")]
    pub atwd_freq_mhz_list: Vec<f64>,
}

impl Differences {
    pub fn push_hv(&mut self, class: DeviceClass, hv_diff: f64, gain_diff_pct: f64) {
        let (hv, gain) = match class {
            DeviceClass::Surface { .. } => (&mut self.hv_diff_list_surface, &mut self.gain_diff_list_surface),
            DeviceClass::Scintillator => (&mut self.hv_diff_list_scint, &mut self.gain_diff_list_scint),
            DeviceClass::InIce => (&mut self.hv_diff_list, &mut self.gain_diff_list),
        };
        hv.push(hv_diff);
        gain.push(gain_diff_pct);
    }

    pub fn push_spe(&mut self, class: DeviceClass, diff: i64, pe_diff: Option<f64>) {
        match class {
            DeviceClass::Surface { .. } => self.spe_disc_list_surface.push(diff),
            DeviceClass::Scintillator => self.spe_disc_list_scint.push(diff),
            DeviceClass::InIce => {
                self.spe_disc_list.push(diff);
                if let Some(pe) = pe_diff {
                    self.spe_disc_pe_list.push(pe);
                }
            }
        }
    }
}

/// A device the update run left alone, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedDevice {
    pub mbid: String,
    pub reason: String,
}

/// Outcome of one update run.
#[derive(Debug, Clone, Default)]
pub struct UpdateSummary {
    pub updated: usize,
    pub skipped: Vec<SkippedDevice>,
    /// Calibration files found but not loaded.
    pub skipped_files: Vec<SkippedFile>,
    /// Devices where at least one calibration query fell back to a default.
    pub defaulted: usize,
    pub warnings: usize,
    pub baselines_updated: usize,
    pub dry_run: bool,
    pub differences: Differences,
}

impl UpdateSummary {
    pub fn skip(&mut self, mbid: &str, reason: impl Into<String>) {
        self.skipped.push(SkippedDevice {
            mbid: mbid.to_string(),
            reason: reason.into(),
        });
    }
}

/// Deployed positions missing from a configuration (or present with HV off).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BadPositions {
    pub positions: Vec<crate::domain::Position>,
}

impl BadPositions {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
