//! The workflows behind the CLI commands.
//!
//! - `run_update`: recompute HV, discriminator, ATWD bias, baseline and beacon
//!   settings from calibration results for every device in a run configuration
//! - `remove_devices`: drop devices from a run configuration
//! - `bad_positions`: deployed positions missing from a run configuration
//!
//! These functions mutate the in-memory store only; persisting it is the
//! caller's job.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::calibration::{CalibrationEngine, CalibrationStore};
use crate::domain::{BaselineMatrix, Chip, DeviceClass, PolicyConfig, Position, ATWD_CHANNELS};
use crate::error::CalError;
use crate::io::nicknames::DeviceDirectory;
use crate::io::overrides::Overrides;
use crate::report::{BadPositions, UpdateSummary};
use crate::runconfig::{ConfigurationTreeStore, DeviceConfig};

pub const HV_FIELD: &str = "pmtHighVoltage";
pub const SPE_FIELD: &str = "speTriggerDiscriminator";
pub const MPE_FIELD: &str = "mpeTriggerDiscriminator";
pub const ATWD_BIAS_FIELDS: [&str; 2] = ["atwd0TriggerBias", "atwd1TriggerBias"];
pub const PULSER_MODE_FIELD: &str = "pulserMode";
pub const PULSER_RATE_FIELD: &str = "pulserRate";

/// FPGA pulser base rate (Hz): 40 MHz clock over a 2^26 divider.
const PULSER_CLOCK_HZ: f64 = 1e9 / 25.0;
const PULSER_MAX_DIVIDER: i64 = 17;

/// Integer pulser rate to request so the FPGA runs closest to `rate_hz`.
///
/// The firmware rounds a request down to the next power-of-two divider, so
/// the returned value can be above the target.
pub fn rate_setting(rate_hz: f64) -> i64 {
    let divider = |rate: f64| (26.0 + (rate / PULSER_CLOCK_HZ).log2()).floor() as i64;

    let mut s = divider(rate_hz).clamp(0, PULSER_MAX_DIVIDER);
    let rate_lo = PULSER_CLOCK_HZ / f64::from(1u32 << 26) * (1i64 << s) as f64;
    let rate_hi = 2.0 * rate_lo;
    if (rate_hz - rate_lo).abs() >= (rate_hz - rate_hi).abs() && s < PULSER_MAX_DIVIDER {
        s += 1;
    }

    let setting = (PULSER_CLOCK_HZ / f64::from(1u32 << 26)).ceil() as i64 * (1i64 << s);
    if divider(setting as f64).clamp(0, PULSER_MAX_DIVIDER) != s {
        warn!(rate_hz, setting, "internal error calculating beacon rate setting");
    }
    setting
}

/// Settings currently in the configuration for one device.
#[derive(Debug, Clone, Copy)]
struct CurrentSettings {
    hv: i64,
    spe: i64,
    atwd_bias: [i64; 2],
}

impl CurrentSettings {
    fn read(cfg: &DeviceConfig, mbid: &str) -> Result<Self, CalError> {
        Ok(Self {
            hv: cfg.setting(mbid, HV_FIELD)?,
            spe: cfg.setting(mbid, SPE_FIELD)?,
            atwd_bias: [
                cfg.setting(mbid, ATWD_BIAS_FIELDS[0])?,
                cfg.setting(mbid, ATWD_BIAS_FIELDS[1])?,
            ],
        })
    }
}

/// Update every device of every hub from the calibration results in
/// `cal_dir`. Devices that cannot be updated are skipped and reported.
pub fn run_update(
    store: &mut ConfigurationTreeStore,
    cal_dir: &Path,
    directory: &dyn DeviceDirectory,
    overrides: &Overrides,
    policy: &PolicyConfig,
) -> UpdateSummary {
    let mut summary = UpdateSummary {
        dry_run: policy.dry_run,
        ..Default::default()
    };

    for cfg in store.device_configs_mut() {
        for mbid in cfg.mbids() {
            let label = directory.describe(&mbid);
            let engine = match CalibrationStore::load_for_device(cal_dir, &mbid) {
                Ok(cal) => {
                    summary.skipped_files.extend_from_slice(cal.skipped());
                    if !cal.exists(&mbid) {
                        warn!(mbid = %mbid, device = %label, "no calibration results");
                        summary.skip(&mbid, "no calibration results");
                        continue;
                    }
                    CalibrationEngine::new(cal)
                }
                Err(e) => {
                    warn!(mbid = %mbid, error = %e, "could not search calibration results");
                    summary.skip(&mbid, e.to_string());
                    continue;
                }
            };

            let position = directory.position(&mbid);
            if position.is_none() {
                warn!(mbid = %mbid, "unknown position; applying in-ice settings");
            }
            let class = DeviceClass::from_position(position);

            let ctx = DeviceContext {
                mbid: &mbid,
                label: &label,
                class,
                engine: &engine,
                overrides,
                policy,
            };
            match update_device(cfg, &ctx, &mut summary) {
                Ok(()) => summary.updated += 1,
                Err(e) => {
                    warn!(mbid = %mbid, device = %label, error = %e, "device not updated");
                    summary.skip(&mbid, e.to_string());
                }
            }
            if engine.defaulted_count() > 0 {
                summary.defaulted += 1;
            }
        }
    }

    info!(
        updated = summary.updated,
        skipped = summary.skipped.len(),
        bad_files = summary.skipped_files.len(),
        defaulted = summary.defaulted,
        "update finished"
    );
    summary
}

/// Everything `update_device` needs to know about one device.
pub struct DeviceContext<'a> {
    pub mbid: &'a str,
    /// Position and name, for diagnostics.
    pub label: &'a str,
    pub class: DeviceClass,
    pub engine: &'a CalibrationEngine,
    pub overrides: &'a Overrides,
    pub policy: &'a PolicyConfig,
}

/// New values for one device, staged until all of them are known.
#[derive(Debug, Default)]
struct PendingChanges {
    settings: Vec<(&'static str, i64)>,
    baselines: Option<BaselineMatrix>,
}

impl PendingChanges {
    fn set(&mut self, field: &'static str, value: i64) {
        self.settings.push((field, value));
    }

    /// Every staged field must already exist on the device.
    fn validate(&self, cfg: &DeviceConfig, mbid: &str) -> Result<(), CalError> {
        match self.settings.iter().find(|(field, _)| cfg.get(mbid, field).is_none()) {
            Some((field, _)) => Err(CalError::not_found("setting", format!("{mbid}/{field}"))),
            None => Ok(()),
        }
    }

    fn apply(self, cfg: &mut DeviceConfig, mbid: &str) -> Result<(), CalError> {
        // set_baselines checks every pedestal slot before writing.
        if let Some(values) = &self.baselines {
            cfg.set_baselines(mbid, values)?;
        }
        for (field, value) in self.settings {
            cfg.set(mbid, field, value)?;
        }
        Ok(())
    }
}

/// Compute and (unless dry run) apply all settings for one device.
///
/// Nothing is written until every new value has been computed and every
/// target field found, so a device that fails is left untouched.
pub fn update_device(cfg: &mut DeviceConfig, ctx: &DeviceContext<'_>, summary: &mut UpdateSummary) -> Result<(), CalError> {
    let current = CurrentSettings::read(cfg, ctx.mbid)?;
    let mut pending = PendingChanges::default();
    let gain = update_hv(ctx, current, &mut pending, summary);
    update_discriminators(ctx, current, gain, &mut pending, summary);
    update_atwd_bias(ctx, current, &mut pending, summary);
    update_baselines(cfg, ctx, &mut pending, summary)?;
    update_beacon_rate(cfg, ctx, &mut pending, summary);

    pending.validate(cfg, ctx.mbid)?;
    if pending.baselines.is_some() {
        summary.baselines_updated += 1;
    }
    if !ctx.policy.dry_run {
        pending.apply(cfg, ctx.mbid)?;
    }
    Ok(())
}

/// Returns the gain the new HV setting is expected to produce.
fn update_hv(
    ctx: &DeviceContext<'_>,
    current: CurrentSettings,
    pending: &mut PendingChanges,
    summary: &mut UpdateSummary,
) -> f64 {
    let DeviceContext { mbid, label, class, engine, overrides, policy } = *ctx;

    let mut gain = overrides
        .gain
        .gain
        .get(mbid)
        .copied()
        .unwrap_or_else(|| policy.target_gain(class));

    let hv_override = overrides.gain.hv.get(mbid).copied();
    let mut hv_new = match hv_override {
        Some(hv) => {
            gain = engine.gain(mbid, hv as f64 / 2.0);
            hv
        }
        None => engine.hv_setting(mbid, gain),
    };

    let max_hv = policy.max_hv_for(class);
    if hv_new > max_hv {
        warn!(mbid, device = label, hv = hv_new, max = max_hv, "HV setting too high; clamping");
        summary.warnings += 1;
        hv_new = max_hv;
    }

    let hv_diff = (hv_new - current.hv) as f64 / 2.0;
    let gain_old = engine.gain(mbid, current.hv as f64 / 2.0);
    let gain_diff_pct = if gain > 0.0 { (gain - gain_old) / gain * 100.0 } else { 0.0 };
    if gain_diff_pct.abs() > policy.warn_gain_change_pct {
        warn!(mbid, device = label, change_pct = gain_diff_pct, gain_old, gain, "large gain change");
        summary.warnings += 1;
    }
    summary.differences.push_hv(class, hv_diff, gain_diff_pct);

    let frozen = class.is_surface() && policy.skip_surface_hv && hv_override.is_none();
    if hv_diff.abs() > policy.warn_hv_change_v {
        let msg = if frozen {
            "large HV change predicted, but disabled for surface modules"
        } else {
            "large HV change"
        };
        warn!(mbid, device = label, change_v = hv_diff, old = current.hv, new = hv_new, "{msg}");
        summary.warnings += 1;
    }
    if !frozen {
        pending.set(HV_FIELD, hv_new);
    }
    gain
}

fn update_discriminators(
    ctx: &DeviceContext<'_>,
    current: CurrentSettings,
    gain: f64,
    pending: &mut PendingChanges,
    summary: &mut UpdateSummary,
) {
    let DeviceContext { mbid, label, class, engine, overrides, policy } = *ctx;
    let from_pe = |pe: f64| {
        let spe = engine.spe_discriminator_setting(mbid, pe, gain);
        (spe, spe + policy.mpe_offset)
    };

    let (spe_new, mpe_new) = if let Some(&pair) = overrides.disc.settings.get(mbid) {
        pair
    } else if let Some(&pe) = overrides.disc.pe.get(mbid) {
        if class.is_surface() {
            warn!(mbid, device = label, "SPE-only discriminator override applied to a surface module");
            summary.warnings += 1;
        }
        from_pe(pe)
    } else {
        match class {
            DeviceClass::Surface { low_gain: false } => policy.disc_surface_high,
            DeviceClass::Surface { low_gain: true } => policy.disc_surface_low,
            DeviceClass::Scintillator => from_pe(policy.disc_pe_scintillator),
            DeviceClass::InIce => from_pe(policy.disc_pe_in_ice),
        }
    };

    let diff = spe_new - current.spe;
    let pe_diff = (class == DeviceClass::InIce)
        .then(|| policy.disc_pe_in_ice - engine.spe_threshold_pe(mbid, current.spe, gain));
    summary.differences.push_spe(class, diff, pe_diff);

    if !class.is_surface() && diff.abs() > policy.warn_spe_disc_change {
        warn!(mbid, device = label, change = diff, old = current.spe, new = spe_new, "large SPE discriminator change");
        summary.warnings += 1;
    }
    pending.set(SPE_FIELD, spe_new);
    pending.set(MPE_FIELD, mpe_new);
}

fn update_atwd_bias(
    ctx: &DeviceContext<'_>,
    current: CurrentSettings,
    pending: &mut PendingChanges,
    summary: &mut UpdateSummary,
) {
    let DeviceContext { mbid, label, engine, overrides, policy, .. } = *ctx;

    let mut bias_new = [0i64; 2];
    let mut large_bias_change = false;
    let mut freq_offsets = [None; 2];
    for chip in Chip::ALL {
        let i = chip.index();
        let overridden = overrides.atwd.bias[i].get(mbid).copied();
        bias_new[i] = overridden.unwrap_or_else(|| engine.atwd_bias_setting(mbid, i as u32, policy.atwd_freq_mhz));
        large_bias_change |= (bias_new[i] - current.atwd_bias[i]).abs() > policy.warn_atwd_bias_change;

        let freq_old = engine.atwd_frequency(mbid, i as u32, current.atwd_bias[i]);
        let offset = freq_old.map(|f| policy.atwd_freq_mhz - f);
        if overridden.is_none() {
            freq_offsets[i] = offset;
        }

        summary.differences.atwd_freq_list.push(bias_new[i] - current.atwd_bias[i]);
        if let Some(offset) = offset {
            summary.differences.atwd_freq_mhz_list.push(offset);
        }
    }

    if large_bias_change {
        warn!(mbid, device = label, old = ?current.atwd_bias, new = ?bias_new, "large ATWD trigger bias change");
        summary.warnings += 1;
    }
    if freq_offsets.iter().flatten().any(|off| off.abs() > policy.warn_atwd_freq_change_mhz) {
        warn!(mbid, device = label, offsets_mhz = ?freq_offsets, "large ATWD sampling speed change");
        summary.warnings += 1;
    }
    for chip in Chip::ALL {
        pending.set(ATWD_BIAS_FIELDS[chip.index()], bias_new[chip.index()]);
    }
}

/// Recompute baselines, for devices listed in the baseline override file only.
fn update_baselines(
    cfg: &DeviceConfig,
    ctx: &DeviceContext<'_>,
    pending: &mut PendingChanges,
    summary: &mut UpdateSummary,
) -> Result<(), CalError> {
    let DeviceContext { mbid, label, engine, overrides, .. } = *ctx;
    if !overrides.baseline.mbids.contains(mbid) {
        return Ok(());
    }

    let old = cfg.baselines(mbid)?;
    let mut new = BaselineMatrix::zeros();
    for chip in Chip::ALL {
        for ch in 0..ATWD_CHANNELS {
            new[(chip.index(), ch)] = engine.baseline(mbid, chip.index() as u32, ch as u32);
        }
    }
    warn!(mbid, device = label, old = ?old.as_slice(), new = ?new.as_slice(), "updating ATWD baselines");
    summary.warnings += 1;

    pending.baselines = Some(new);
    Ok(())
}

fn update_beacon_rate(
    cfg: &DeviceConfig,
    ctx: &DeviceContext<'_>,
    pending: &mut PendingChanges,
    summary: &mut UpdateSummary,
) {
    let DeviceContext { mbid, class, policy, .. } = *ctx;
    let Some(rate) = policy.beacon_rate_hz else {
        return;
    };
    if class.is_surface() && policy.skip_surface_hv {
        return;
    }

    let setting = rate_setting(rate);
    match cfg.get(mbid, PULSER_MODE_FIELD).as_deref() {
        Some("beacon") => pending.set(PULSER_RATE_FIELD, setting),
        mode => {
            warn!(mbid, mode = ?mode, "unexpected pulser mode; beacon rate not set");
            summary.warnings += 1;
        }
    }
}

/// Resolve device names (MBID, name, `SS-PP` or DOM id) from the command
/// line and an optional list file. Unresolvable names are logged and dropped.
pub fn resolve_devices(
    directory: &dyn DeviceDirectory,
    names: &[String],
    list_file: Option<&Path>,
) -> Result<Vec<String>, CalError> {
    let mut wanted: Vec<String> = names.to_vec();
    if let Some(path) = list_file {
        let text = fs::read_to_string(path).map_err(|e| CalError::io(path, e))?;
        wanted.extend(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string));
    }

    let mut out = Vec::new();
    for name in wanted {
        match directory.find_mbid(&name) {
            Some(mbid) if u64::from_str_radix(&mbid, 16).is_ok() => out.push(mbid),
            Some(mbid) => warn!(name = %name, mbid = %mbid, "skipping invalid MBID"),
            None => warn!(name = %name, "unknown device"),
        }
    }
    Ok(out)
}

/// Remove each device from the store. Returns the MBIDs actually removed.
pub fn remove_devices(
    store: &mut ConfigurationTreeStore,
    mbids: &[String],
    directory: &dyn DeviceDirectory,
) -> Vec<String> {
    let mut removed = Vec::new();
    for mbid in mbids {
        if store.remove_device(mbid) {
            info!(mbid = %mbid, device = %directory.describe(mbid), "removed device");
            removed.push(mbid.clone());
        } else {
            warn!(mbid = %mbid, "device not in run configuration");
        }
    }
    removed
}

/// Every deployed position without a device at HV > 0 in the configuration.
///
/// Deployed: strings 1–86, slots 1–63, except that strings above 81 have no
/// surface slots (> 60).
pub fn bad_positions(store: &ConfigurationTreeStore, directory: &dyn DeviceDirectory) -> BadPositions {
    let mut good: HashSet<Position> = HashSet::new();
    for cfg in store.device_configs() {
        for mbid in cfg.mbids() {
            let hv = match cfg.setting::<i64>(&mbid, HV_FIELD) {
                Ok(hv) => hv,
                Err(e) => {
                    debug!(mbid = %mbid, error = %e, "treating device as HV off");
                    0
                }
            };
            if hv > 0 {
                if let Some(pos) = directory.position(&mbid) {
                    good.insert(pos);
                }
            }
        }
    }

    let positions = (1..=86u32)
        .flat_map(|string| (1..=63u32).map(move |slot| Position::new(string, slot)))
        .filter(|p| !(p.slot > 60 && p.string > 81))
        .filter(|p| !good.contains(p))
        .collect();
    BadPositions { positions }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::*;
    use crate::io::nicknames::Nicknames;
    use crate::runconfig::{LayoutMode, DEVICE_DIR};

    const INICE: &str = "aaaaaaaaaaaa";
    const SURFACE: &str = "bbbbbbbbbbbb";
    const NOCAL: &str = "cccccccccccc";

    const NICKNAMES: &str = "\
mbid domid name location
aaaaaaaaaaaa AA0P0001 Deep 21-30
bbbbbbbbbbbb BB0P0002 Tank 21-61
cccccccccccc CC0P0003 Orphan 22-10
";

    const RUN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<runConfig>
  <stringHub hubId="21" domConfig="sps-21i-base"/>
</runConfig>
"#;

    fn device(mbid: &str, hv: i64, mode: &str) -> String {
        format!(
            r#"<domConfig mbid="{mbid}">
    <pmtHighVoltage>{hv}</pmtHighVoltage>
    <speTriggerDiscriminator>560</speTriggerDiscriminator>
    <mpeTriggerDiscriminator>660</mpeTriggerDiscriminator>
    <atwd0TriggerBias>850</atwd0TriggerBias>
    <atwd1TriggerBias>850</atwd1TriggerBias>
    <pulserMode>{mode}</pulserMode>
    <pulserRate>5</pulserRate>
    <pedestalSettings>
      <averagePedestal atwd="A" ch="0">130</averagePedestal>
      <averagePedestal atwd="A" ch="1">130</averagePedestal>
      <averagePedestal atwd="A" ch="2">130</averagePedestal>
      <averagePedestal atwd="B" ch="0">130</averagePedestal>
      <averagePedestal atwd="B" ch="1">130</averagePedestal>
      <averagePedestal atwd="B" ch="2">130</averagePedestal>
    </pedestalSettings>
  </domConfig>"#
        )
    }

    /// HV 1300 V gives gain 1e7; pulser discriminator slope 1e-4 pC/count;
    /// ATWD chip 0 runs at 300 MHz near bias 850, chip 1 near bias 1000.
    fn calibration() -> String {
        let m = 7.0;
        let b = 7.0 - m * 1300f64.log10();
        format!(
            r#"<domcal>
  <hvGainCal><fit model="linear"><param name="slope">{m}</param><param name="intercept">{b}</param></fit></hvGainCal>
  <discriminator id="spe"><fit model="linear"><param name="slope">0.0001</param><param name="intercept">0</param></fit></discriminator>
  <atwdfreq atwd="0"><fit model="quadratic"><param name="c0">-125</param><param name="c1">0.5</param><param name="c2">1e-9</param></fit></atwdfreq>
  <atwdfreq atwd="1"><fit model="quadratic"><param name="c0">-100</param><param name="c1">0.4</param><param name="c2">1e-9</param></fit></atwdfreq>
</domcal>"#
        )
    }

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let cfg_dir = dir.path().join(DEVICE_DIR);
            fs::create_dir_all(&cfg_dir).unwrap();
            fs::write(dir.path().join("run.xml"), RUN).unwrap();
            let hub = format!(
                "<domConfigs>\n  {}\n  {}\n  {}\n</domConfigs>\n",
                device(INICE, 2000, "beacon"),
                device(SURFACE, 2000, "beacon"),
                device(NOCAL, 0, "off"),
            );
            fs::write(cfg_dir.join("sps-21i-base.xml"), hub).unwrap();

            let cal = dir.path().join("cal");
            fs::create_dir_all(cal.join("unvetted")).unwrap();
            fs::write(cal.join(format!("domcal_{INICE}.xml")), calibration()).unwrap();
            fs::write(cal.join("unvetted").join(format!("domcal_{SURFACE}.xml")), calibration()).unwrap();
            Self { dir }
        }

        fn store(&self) -> ConfigurationTreeStore {
            ConfigurationTreeStore::load(&self.dir.path().join("run.xml"), LayoutMode::New).unwrap()
        }

        fn cal_dir(&self) -> PathBuf {
            self.dir.path().join("cal")
        }
    }

    fn nicknames() -> Nicknames {
        Nicknames::parse(NICKNAMES.as_bytes()).unwrap()
    }

    #[test]
    fn beacon_rate_settings() {
        assert_eq!(rate_setting(1.0), 2);
        assert_eq!(rate_setting(10.0), 16);
        assert_eq!(rate_setting(1e6), 1 << 17);
        assert_eq!(rate_setting(1e-6), 1);
    }

    #[test]
    fn update_applies_policy_per_class() {
        let fx = Fixture::new();
        let mut store = fx.store();
        let policy = PolicyConfig {
            beacon_rate_hz: Some(10.0),
            ..Default::default()
        };
        let summary = run_update(&mut store, &fx.cal_dir(), &nicknames(), &Overrides::default(), &policy);

        assert_eq!(summary.updated, 2);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].mbid, NOCAL);

        let hub = store.hub("21").unwrap();
        assert!(hub.is_modified());
        assert_eq!(hub.setting::<i64>(INICE, HV_FIELD).unwrap(), 2600);
        // 1e7 * 0.25 PE * e * 1e12 / 1e-4
        assert_eq!(hub.setting::<i64>(INICE, SPE_FIELD).unwrap(), 4005);
        assert_eq!(hub.setting::<i64>(INICE, MPE_FIELD).unwrap(), 4105);
        assert_eq!(hub.setting::<i64>(INICE, ATWD_BIAS_FIELDS[0]).unwrap(), 850);
        assert_eq!(hub.setting::<i64>(INICE, PULSER_RATE_FIELD).unwrap(), 16);

        // Surface high-gain: fixed discriminators, 5e6 gain target.
        assert_eq!(hub.setting::<i64>(SURFACE, SPE_FIELD).unwrap(), 1020);
        assert_eq!(hub.setting::<i64>(SURFACE, MPE_FIELD).unwrap(), 580);
        assert!(hub.setting::<i64>(SURFACE, HV_FIELD).unwrap() < 2600);

        assert_eq!(hub.setting::<i64>(NOCAL, HV_FIELD).unwrap(), 0);
        assert_eq!(summary.differences.hv_diff_list, vec![300.0]);
        assert_eq!(summary.differences.hv_diff_list_surface.len(), 1);
        assert_eq!(summary.differences.atwd_freq_list.len(), 4);
    }

    #[test]
    fn unreadable_calibration_file_is_reported() {
        let fx = Fixture::new();
        fs::write(fx.cal_dir().join(format!("domcal_{NOCAL}.xml")), "<domcal><hvGainCal>").unwrap();

        let mut store = fx.store();
        let summary = run_update(&mut store, &fx.cal_dir(), &nicknames(), &Overrides::default(), &PolicyConfig::default());
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped_files.len(), 1);
        assert!(summary.skipped_files[0].path.ends_with(format!("domcal_{NOCAL}.xml")));
    }

    #[test]
    fn dry_run_changes_nothing() {
        let fx = Fixture::new();
        let mut store = fx.store();
        let policy = PolicyConfig {
            dry_run: true,
            beacon_rate_hz: Some(10.0),
            ..Default::default()
        };
        let summary = run_update(&mut store, &fx.cal_dir(), &nicknames(), &Overrides::default(), &policy);
        assert_eq!(summary.updated, 2);
        assert!(summary.dry_run);
        assert!(!store.is_modified());
        assert_eq!(store.hub("21").unwrap().setting::<i64>(INICE, HV_FIELD).unwrap(), 2000);
    }

    #[test]
    fn failed_device_is_left_untouched() {
        let fx = Fixture::new();
        let without_rate = device(INICE, 2000, "beacon").replace("<pulserRate>5</pulserRate>", "");
        fs::write(
            fx.dir.path().join(DEVICE_DIR).join("sps-21i-base.xml"),
            format!("<domConfigs>\n  {without_rate}\n</domConfigs>\n"),
        )
        .unwrap();

        let mut store = fx.store();
        let policy = PolicyConfig {
            beacon_rate_hz: Some(10.0),
            ..Default::default()
        };
        let summary = run_update(&mut store, &fx.cal_dir(), &nicknames(), &Overrides::default(), &policy);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.skipped.len(), 1);
        assert!(summary.skipped[0].reason.contains(PULSER_RATE_FIELD));

        let hub = store.hub("21").unwrap();
        assert!(!hub.is_modified());
        assert_eq!(hub.setting::<i64>(INICE, HV_FIELD).unwrap(), 2000);
        assert_eq!(hub.setting::<i64>(INICE, SPE_FIELD).unwrap(), 560);
    }

    #[test]
    fn surface_hv_can_be_frozen_unless_overridden() {
        let fx = Fixture::new();
        let policy = PolicyConfig {
            skip_surface_hv: true,
            beacon_rate_hz: Some(10.0),
            ..Default::default()
        };

        let mut store = fx.store();
        run_update(&mut store, &fx.cal_dir(), &nicknames(), &Overrides::default(), &policy);
        let hub = store.hub("21").unwrap();
        assert_eq!(hub.setting::<i64>(SURFACE, HV_FIELD).unwrap(), 2000);
        assert_eq!(hub.setting::<i64>(SURFACE, PULSER_RATE_FIELD).unwrap(), 5);

        let mut overrides = Overrides::default();
        overrides.gain.hv.insert(SURFACE.to_string(), 2400);
        let mut store = fx.store();
        run_update(&mut store, &fx.cal_dir(), &nicknames(), &overrides, &policy);
        assert_eq!(store.hub("21").unwrap().setting::<i64>(SURFACE, HV_FIELD).unwrap(), 2400);
    }

    #[test]
    fn overrides_take_precedence() {
        let fx = Fixture::new();
        let mut overrides = Overrides::default();
        overrides.gain.hv.insert(INICE.to_string(), 9999);
        overrides.disc.settings.insert(INICE.to_string(), (600, 700));
        overrides.atwd.bias[1].insert(INICE.to_string(), 900);

        let mut store = fx.store();
        run_update(&mut store, &fx.cal_dir(), &nicknames(), &overrides, &PolicyConfig::default());
        let hub = store.hub("21").unwrap();
        // Clamped to the in-ice maximum.
        assert_eq!(hub.setting::<i64>(INICE, HV_FIELD).unwrap(), 3300);
        assert_eq!(hub.setting::<i64>(INICE, SPE_FIELD).unwrap(), 600);
        assert_eq!(hub.setting::<i64>(INICE, MPE_FIELD).unwrap(), 700);
        assert_eq!(hub.setting::<i64>(INICE, ATWD_BIAS_FIELDS[1]).unwrap(), 900);
    }

    #[test]
    fn baselines_only_for_listed_devices() {
        let fx = Fixture::new();
        let mut overrides = Overrides::default();
        overrides.baseline.mbids.insert(INICE.to_string());

        let mut store = fx.store();
        let summary = run_update(&mut store, &fx.cal_dir(), &nicknames(), &overrides, &PolicyConfig::default());
        assert_eq!(summary.baselines_updated, 1);
        // No per-bin ATWD fits in the fixture: every baseline falls back.
        let hub = store.hub("21").unwrap();
        assert_eq!(hub.baselines(INICE).unwrap(), BaselineMatrix::repeat(128));
        assert_eq!(hub.baselines(SURFACE).unwrap(), BaselineMatrix::repeat(130));
        assert!(summary.defaulted >= 1);
    }

    #[test]
    fn removes_named_devices() {
        let fx = Fixture::new();
        let mut store = fx.store();
        let nicks = nicknames();
        let list = fx.dir.path().join("remove.txt");
        fs::write(&list, "\n22-10\n").unwrap();

        let mbids = resolve_devices(&nicks, &["Deep".to_string(), "nobody".to_string()], Some(&list)).unwrap();
        assert_eq!(mbids, vec![INICE.to_string(), NOCAL.to_string()]);

        let before = store.device_count();
        let removed = remove_devices(&mut store, &mbids, &nicks);
        assert_eq!(removed.len(), 2);
        assert_eq!(store.device_count(), before - 2);
        assert!(remove_devices(&mut store, &mbids, &nicks).is_empty());
    }

    #[test]
    fn bad_positions_excludes_live_devices() {
        let fx = Fixture::new();
        let bad = bad_positions(&fx.store(), &nicknames());
        // 86 strings x 63 slots, minus 5 strings x 3 surface slots, minus two live devices.
        assert_eq!(bad.len(), 86 * 63 - 5 * 3 - 2);
        assert!(!bad.positions.contains(&Position::new(21, 30)));
        assert!(bad.positions.contains(&Position::new(22, 10)));
        assert!(!bad.positions.contains(&Position::new(82, 61)));
    }
}
