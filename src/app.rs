//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the real main that:
//! - loads `.env` and parses CLI arguments
//! - sets up logging
//! - loads the run configuration, nicknames and override files
//! - runs the requested workflow and writes the results

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::{BadDomsArgs, Cli, Command, RemoveArgs, RenameArgs, UpdateArgs};
use crate::domain::PolicyConfig;
use crate::error::AppError;
use crate::io::nicknames::{DeviceDirectory, Nicknames};
use crate::io::overrides::Overrides;
use crate::runconfig::{ConfigurationTreeStore, RenamePolicy};

pub mod pipeline;

/// Entry point for the `domcal` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env is fine; it only supplies defaults such as DOMCAL_NICKNAMES.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let nicknames = Nicknames::load(&cli.nicknames)?;
    match cli.command {
        Command::Update(args) => handle_update(args, &nicknames),
        Command::Remove(args) => handle_remove(args, &nicknames),
        Command::BadDoms(args) => handle_bad_doms(args, &nicknames),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn handle_update(args: UpdateArgs, nicknames: &Nicknames) -> Result<(), AppError> {
    let rename = rename_policy(&args.rename)?;
    let policy = policy_from_args(&args);

    let overrides = Overrides::load(
        args.gain_file.as_deref(),
        args.disc_file.as_deref(),
        args.atwd_file.as_deref(),
        args.baseline_file.as_deref(),
    )?;
    for (file, row) in &overrides.row_errors {
        warn!(file = %file, line = row.line, "{}", row.message);
    }
    log_override_counts(&overrides);

    let mut store = ConfigurationTreeStore::load_any(&args.run_config)?;
    let summary = pipeline::run_update(&mut store, &args.cal_dir, nicknames, &overrides, &policy);

    if !policy.dry_run {
        let written = store.write(rename.as_ref())?;
        for path in &written {
            info!(path = %path.display(), "wrote configuration");
        }
    }
    if let Some(path) = &policy.save_differences {
        crate::io::export::write_differences_json(path, &args.run_config, &summary.differences)?;
        info!(path = %path.display(), "saved setting differences");
    }

    println!("{}", crate::report::format_update_summary(&summary));
    Ok(())
}

fn handle_remove(args: RemoveArgs, nicknames: &Nicknames) -> Result<(), AppError> {
    let rename = RenamePolicy {
        name: args.name,
        version: args.version,
        device_base: args.domname,
    };
    let mbids = pipeline::resolve_devices(nicknames, &args.doms, args.list.as_deref())?;

    let mut store = ConfigurationTreeStore::load_any(&args.run_config)?;
    let removed = pipeline::remove_devices(&mut store, &mbids, nicknames);
    for mbid in &removed {
        println!("Removed DOM {mbid} {}", nicknames.describe(mbid));
    }
    store.write(Some(&rename))?;
    Ok(())
}

fn handle_bad_doms(args: BadDomsArgs, nicknames: &Nicknames) -> Result<(), AppError> {
    let store = ConfigurationTreeStore::load_any(&args.run_config)?;
    let bad = pipeline::bad_positions(&store, nicknames);
    println!("{}", crate::report::format_bad_positions(&bad));
    Ok(())
}

/// All three of version, name and device base name, or none.
pub fn rename_policy(args: &RenameArgs) -> Result<Option<RenamePolicy>, AppError> {
    match (&args.version, &args.name, &args.domname) {
        (Some(version), Some(name), Some(base)) => Ok(Some(RenamePolicy {
            name: name.clone(),
            version: *version,
            device_base: base.clone(),
        })),
        (None, None, None) => Ok(None),
        _ => Err(AppError::new(
            2,
            "--version, --name and --domname must be given together",
        )),
    }
}

pub fn policy_from_args(args: &UpdateArgs) -> PolicyConfig {
    PolicyConfig {
        dry_run: args.dry_run,
        skip_surface_hv: args.no_surface_hv,
        beacon_rate_hz: args.beacon_rate,
        save_differences: args.save.clone(),
        ..PolicyConfig::default()
    }
}

fn log_override_counts(overrides: &Overrides) {
    let counts = [
        ("HV", overrides.gain.hv.len()),
        ("gain", overrides.gain.gain.len()),
        ("discriminator", overrides.disc.settings.len()),
        ("discriminator PE", overrides.disc.pe.len()),
        ("ATWD0 bias", overrides.atwd.bias[0].len()),
        ("ATWD1 bias", overrides.atwd.bias[1].len()),
        ("ATWD baseline", overrides.baseline.mbids.len()),
    ];
    for (kind, n) in counts.into_iter().filter(|(_, n)| *n > 0) {
        info!(kind, count = n, "applying overrides");
    }
}
