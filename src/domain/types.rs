//! Shared domain types.
//!
//! - device location and classification (`Position`, `DeviceClass`)
//! - ATWD chip naming and the per-device baseline matrix
//! - the settings policy applied by an update run (`PolicyConfig`)

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use nalgebra::Matrix2x3;

use crate::error::CalError;

/// Average pedestals: rows are ATWD chips (A, B), columns channels 0..3.
pub type BaselineMatrix = Matrix2x3<i64>;

/// Number of ATWD channels carrying a baseline.
pub const ATWD_CHANNELS: usize = 3;

/// ATWD chip, named by letter in configuration files and by index in
/// calibration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chip {
    A,
    B,
}

impl Chip {
    pub const ALL: [Chip; 2] = [Chip::A, Chip::B];

    pub fn index(self) -> usize {
        match self {
            Chip::A => 0,
            Chip::B => 1,
        }
    }

    pub fn from_letter(letter: &str) -> Result<Self, CalError> {
        match letter {
            "A" => Ok(Chip::A),
            "B" => Ok(Chip::B),
            other => Err(CalError::UnknownChip(other.to_string())),
        }
    }
}

/// Deployment position: string number and slot on the string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub string: u32,
    pub slot: u32,
}

impl Position {
    pub fn new(string: u32, slot: u32) -> Self {
        Self { string, slot }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.string, self.slot)
    }
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (string, slot) = s
            .split_once('-')
            .ok_or_else(|| format!("position '{s}' is not of the form SS-PP"))?;
        let string = string.trim().parse().map_err(|e| format!("position '{s}': {e}"))?;
        let slot = slot.trim().parse().map_err(|e| format!("position '{s}': {e}"))?;
        Ok(Position { string, slot })
    }
}

/// Which settings rules apply to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    InIce,
    /// Surface tank module; even slots are the low-gain partner.
    Surface { low_gain: bool },
    Scintillator,
}

impl DeviceClass {
    /// Classify by position. Devices without a known position are in-ice.
    pub fn from_position(position: Option<Position>) -> Self {
        let Some(Position { string, slot }) = position else {
            return DeviceClass::InIce;
        };
        if string <= 86 && slot > 60 && slot < 65 {
            DeviceClass::Surface {
                low_gain: slot % 2 == 0,
            }
        } else if string <= 86 && slot > 64 {
            DeviceClass::Scintillator
        } else {
            DeviceClass::InIce
        }
    }

    pub fn is_surface(self) -> bool {
        matches!(self, DeviceClass::Surface { .. })
    }
}

/// Settings policy for an update run.
///
/// Derived from CLI flags plus the defaults below.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub gain_in_ice: f64,
    pub gain_surface_high: f64,
    pub gain_surface_low: f64,
    pub gain_scintillator: f64,

    /// SPE thresholds in PE.
    pub disc_pe_in_ice: f64,
    pub disc_pe_scintillator: f64,
    /// Fixed (SPE, MPE) discriminator settings for surface modules.
    pub disc_surface_high: (i64, i64),
    pub disc_surface_low: (i64, i64),
    /// MPE discriminator = SPE discriminator + this offset.
    pub mpe_offset: i64,

    pub atwd_freq_mhz: f64,

    /// HV limits in half-volt units.
    pub max_hv: i64,
    pub max_hv_scintillator: i64,

    pub warn_hv_change_v: f64,
    pub warn_spe_disc_change: i64,
    pub warn_atwd_bias_change: i64,
    pub warn_atwd_freq_change_mhz: f64,
    pub warn_gain_change_pct: f64,

    /// Compute and report only; do not touch the configuration.
    pub dry_run: bool,
    /// Leave surface HV and beacon rate alone unless overridden per device.
    pub skip_surface_hv: bool,
    /// Target beacon rate in Hz.
    pub beacon_rate_hz: Option<f64>,
    /// Where to save per-run setting differences.
    pub save_differences: Option<PathBuf>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            gain_in_ice: 1e7,
            gain_surface_high: 5e6,
            gain_surface_low: 1e5,
            gain_scintillator: 4.7e6,
            disc_pe_in_ice: 0.25,
            disc_pe_scintillator: 0.5,
            disc_surface_high: (1020, 580),
            disc_surface_low: (620, 560),
            mpe_offset: 100,
            atwd_freq_mhz: 300.0,
            max_hv: 3300,
            max_hv_scintillator: 2500,
            warn_hv_change_v: 15.0,
            warn_spe_disc_change: 5,
            warn_atwd_bias_change: 5,
            warn_atwd_freq_change_mhz: 0.5,
            warn_gain_change_pct: 15.0,
            dry_run: false,
            skip_surface_hv: false,
            beacon_rate_hz: None,
            save_differences: None,
        }
    }
}

impl PolicyConfig {
    pub fn target_gain(&self, class: DeviceClass) -> f64 {
        match class {
            DeviceClass::InIce => self.gain_in_ice,
            DeviceClass::Surface { low_gain: true } => self.gain_surface_low,
            DeviceClass::Surface { low_gain: false } => self.gain_surface_high,
            DeviceClass::Scintillator => self.gain_scintillator,
        }
    }

    pub fn max_hv_for(&self, class: DeviceClass) -> i64 {
        match class {
            DeviceClass::Scintillator => self.max_hv_scintillator,
            _ => self.max_hv,
        }
    }
}
