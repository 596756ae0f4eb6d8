//! Command-line parsing for the calibration settings tool.
//!
//! Parsing and dispatch stay separate from the calibration and configuration
//! code; `app` turns these structs into typed configs.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::io::export::DEFAULT_DIFFERENCES_FILE;
use crate::io::nicknames::DEFAULT_NICKNAMES;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "domcal", version, about = "Derive DOM settings from calibration results and edit run configurations")]
pub struct Cli {
    /// Device nicknames table (MBID, DOM id, name, position).
    #[arg(long, global = true, env = "DOMCAL_NICKNAMES", default_value = DEFAULT_NICKNAMES)]
    pub nicknames: PathBuf,

    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Update HV, discriminator, ATWD and beacon settings from calibration results.
    Update(UpdateArgs),
    /// Remove devices from a run configuration.
    Remove(RemoveArgs),
    /// List deployed positions missing from a run configuration or with HV off.
    BadDoms(BadDomsArgs),
}

/// New names for the written configuration.
#[derive(Debug, Args, Clone)]
pub struct RenameArgs {
    /// Version number of the new configuration.
    #[arg(short = 'v', long = "version")]
    pub version: Option<u32>,

    /// Name of the new run configuration (top level).
    #[arg(short = 'n', long = "name")]
    pub name: Option<String>,

    /// Base name of the new device configurations.
    #[arg(short = 'c', long = "domname")]
    pub domname: Option<String>,
}

#[derive(Debug, Parser, Clone)]
pub struct UpdateArgs {
    /// Run configuration to update.
    pub run_config: PathBuf,

    /// Directory of calibration results (`domcal_<mbid>.xml`).
    pub cal_dir: PathBuf,

    /// Test run: compute and report, do not write the configuration.
    #[arg(short = 't', long = "test")]
    pub dry_run: bool,

    /// Save setting differences as JSON for plotting.
    #[arg(
        short = 's',
        long = "save",
        num_args = 0..=1,
        default_missing_value = DEFAULT_DIFFERENCES_FILE,
        value_name = "FILE"
    )]
    pub save: Option<PathBuf>,

    /// Leave surface HV and beacon rate alone unless overridden.
    #[arg(short = 'i', long = "no-surface-hv", alias = "icetop")]
    pub no_surface_hv: bool,

    /// Gain override file (`mbid hv gain`).
    #[arg(short = 'g', long = "gain")]
    pub gain_file: Option<PathBuf>,

    /// Discriminator override file (`mbid spe mpe` or `mbid pe`).
    #[arg(short = 'd', long = "disc")]
    pub disc_file: Option<PathBuf>,

    /// ATWD override file (`mbid chip bias0 bias1`).
    #[arg(short = 'a', long = "atwd")]
    pub atwd_file: Option<PathBuf>,

    /// Baseline override file (`mbid`); listed devices get new baselines.
    #[arg(short = 'b', long = "baseline")]
    pub baseline_file: Option<PathBuf>,

    /// Target beacon rate in Hz.
    #[arg(short = 'r', long = "rate")]
    pub beacon_rate: Option<f64>,

    #[command(flatten)]
    pub rename: RenameArgs,
}

#[derive(Debug, Parser, Clone)]
pub struct RemoveArgs {
    /// Run configuration to edit.
    pub run_config: PathBuf,

    /// Devices by MBID, name, position (SS-PP) or DOM id.
    pub doms: Vec<String>,

    /// File with one device per line.
    #[arg(short = 'l', long = "list")]
    pub list: Option<PathBuf>,

    /// Version number of the new configuration.
    #[arg(short = 'v', long = "version", required = true)]
    pub version: u32,

    /// Name of the new run configuration (top level).
    #[arg(short = 'n', long = "name", required = true)]
    pub name: String,

    /// Base name of the new device configurations.
    #[arg(short = 'c', long = "domname", required = true)]
    pub domname: String,
}

#[derive(Debug, Parser, Clone)]
pub struct BadDomsArgs {
    /// Run configuration to inspect.
    pub run_config: PathBuf,
}
