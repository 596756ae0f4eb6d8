//! Physics-level calibration queries.
//!
//! Every query here is null-propagating: when a device has no usable fit the
//! query logs a diagnostic and returns the documented default from
//! `CalibrationDefaults`. A full-detector run touches thousands of fits and must
//! never stop on one bad device.
//!
//! Curves consulted:
//!
//! | query                         | curve                       | model     |
//! |-------------------------------|-----------------------------|-----------|
//! | gain / hv_setting             | `hvGainCal` (log10 space)   | linear    |
//! | spe_discriminator_setting     | `pmtDiscCal`, `discriminator[id=spe]` | linear |
//! | spe_threshold_pe              | `pmtDiscCal`                | linear    |
//! | atwd_bias_setting / frequency | `atwdfreq[atwd=chip]`       | quadratic |
//! | baseline                      | `atwd[id,channel,bin]` x128 | linear    |

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{error, warn};

use crate::calibration::record::{CalibrationRecord, CalibrationStore};
use crate::calibration::selection::CurveQuery;
use crate::error::CalError;
use crate::math::to_setting;
use crate::models::FitModel;

/// Elementary charge (C).
pub const E_CHARGE: f64 = 1.602_176_46e-19;

/// Number of sampling bins per ATWD channel.
pub const ATWD_BINS: u32 = 128;

/// Fallback values returned when a query cannot be computed.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationDefaults {
    pub spe_setting: i64,
    pub mpe_setting: i64,
    pub hv_setting: i64,
    pub freq_setting: i64,
    pub baseline: i64,
    /// Returned by `gain` when the HV/gain fit is missing.
    pub missing_gain: f64,
    /// DAC channel holding the ATWD bias voltage.
    pub bias_voltage_dac: u32,
}

impl Default for CalibrationDefaults {
    fn default() -> Self {
        Self {
            spe_setting: 560,
            mpe_setting: 560,
            hv_setting: 0,
            freq_setting: 800,
            baseline: 128,
            missing_gain: -1.0,
            bias_voltage_dac: 7,
        }
    }
}

/// Query engine over a set of calibration records.
#[derive(Debug, Default)]
pub struct CalibrationEngine {
    store: CalibrationStore,
    defaults: CalibrationDefaults,
    defaulted: AtomicUsize,
}

impl CalibrationEngine {
    pub fn new(store: CalibrationStore) -> Self {
        Self::with_defaults(store, CalibrationDefaults::default())
    }

    pub fn with_defaults(store: CalibrationStore, defaults: CalibrationDefaults) -> Self {
        Self {
            store,
            defaults,
            defaulted: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &CalibrationStore {
        &self.store
    }

    pub fn defaults(&self) -> &CalibrationDefaults {
        &self.defaults
    }

    pub fn exists(&self, mbid: &str) -> bool {
        self.store.exists(mbid)
    }

    /// How many queries fell back to a default since construction.
    pub fn defaulted_count(&self) -> usize {
        self.defaulted.load(Ordering::Relaxed)
    }

    /// PMT gain at `voltage` (volts).
    pub fn gain(&self, mbid: &str, voltage: f64) -> f64 {
        if voltage == 0.0 {
            return 0.0;
        }
        let query = CurveQuery::new("hvGainCal");
        match self.fit(mbid, &query) {
            Some(fit) => 10f64.powf(fit.evaluate(voltage.log10())),
            None => self.fallback(mbid, &query, "missing HV/gain calibration", self.defaults.missing_gain),
        }
    }

    /// HV setting (half-volt DAC units) that yields `gain`.
    pub fn hv_setting(&self, mbid: &str, gain: f64) -> i64 {
        if gain == 0.0 {
            return self.defaults.hv_setting;
        }
        let query = CurveQuery::new("hvGainCal");
        let Some(fit) = self.fit(mbid, &query) else {
            return self.fallback(mbid, &query, "missing HV/gain calibration", self.defaults.hv_setting);
        };
        match fit.invert(gain.log10()) {
            Ok(log_hv) => to_setting(10f64.powf(log_hv) * 2.0),
            Err(e) => self.fallback(mbid, &query, &e.to_string(), self.defaults.hv_setting),
        }
    }

    /// SPE discriminator setting for a threshold of `spe_fraction` PE at `gain`.
    ///
    /// The PMT-based fit is preferred when present and sane; the pulser-based
    /// `discriminator[id=spe]` fit is the fallback.
    pub fn spe_discriminator_setting(&self, mbid: &str, spe_fraction: f64, gain: f64) -> i64 {
        if gain == 0.0 {
            return self.defaults.spe_setting;
        }
        let pmt_query = CurveQuery::new("pmtDiscCal");
        let pulser_query = CurveQuery::new("discriminator").filter("id", "spe");

        let pmt = match self.fit(mbid, &pmt_query) {
            None => {
                warn!(mbid, curve = %pmt_query, "missing PMT discriminator calibration; falling back to pulser calibration");
                None
            }
            Some(pmt) => match check_pmt_disc_fit(&pmt, &pmt_query) {
                Ok(()) => Some(pmt),
                Err(e) => {
                    warn!(mbid, error = %e, "falling back to pulser discriminator calibration");
                    None
                }
            },
        };
        let (fit, query) = match pmt {
            Some(fit) => (fit, &pmt_query),
            None => match self.fit(mbid, &pulser_query) {
                Some(fit) => (fit, &pulser_query),
                None => {
                    return self.fallback(mbid, &pulser_query, "no discriminator calibration", self.defaults.spe_setting);
                }
            },
        };

        let charge_pc = gain * spe_fraction * E_CHARGE * 1e12;
        match fit.invert(charge_pc) {
            Ok(setting) => to_setting(setting),
            Err(e) => self.fallback(mbid, query, &e.to_string(), self.defaults.spe_setting),
        }
    }

    /// Threshold in PE for a discriminator `setting` at `gain`.
    ///
    /// Uses the PMT fit only. When that fit is missing or fails its sanity
    /// check this returns the default *setting*, which callers treat as
    /// "could not compute".
    pub fn spe_threshold_pe(&self, mbid: &str, setting: i64, gain: f64) -> f64 {
        if gain == 0.0 {
            return 0.0;
        }
        let query = CurveQuery::new("pmtDiscCal");
        let default = self.defaults.spe_setting as f64;
        let Some(fit) = self.fit(mbid, &query) else {
            return self.fallback(mbid, &query, "missing PMT discriminator calibration", default);
        };
        if let Err(e) = check_pmt_disc_fit(&fit, &query) {
            return self.fallback(mbid, &query, &e.to_string(), default);
        }
        fit.evaluate(setting as f64) / (gain * E_CHARGE * 1e12)
    }

    /// ATWD trigger bias setting that samples at `freq_mhz`.
    pub fn atwd_bias_setting(&self, mbid: &str, chip: u32, freq_mhz: f64) -> i64 {
        let query = CurveQuery::new("atwdfreq").filter("atwd", chip);
        let Some(fit) = self.fit(mbid, &query) else {
            return self.fallback(mbid, &query, "bad ATWD frequency calibration", self.defaults.freq_setting);
        };
        match fit.invert(freq_mhz) {
            Ok(bias) => to_setting(bias),
            Err(e) => self.fallback(mbid, &query, &e.to_string(), self.defaults.freq_setting),
        }
    }

    /// Sampling frequency (MHz) at ATWD trigger bias `bias`.
    pub fn atwd_frequency(&self, mbid: &str, chip: u32, bias: i64) -> Option<f64> {
        let query = CurveQuery::new("atwdfreq").filter("atwd", chip);
        match self.fit(mbid, &query) {
            Some(fit) => Some(fit.evaluate(bias as f64)),
            None => self.fallback(mbid, &query, "bad ATWD frequency calibration", None),
        }
    }

    /// Average pedestal (counts) of one ATWD chip/channel.
    ///
    /// Each bin's fit is inverted at the bias voltage read back from the DAC.
    /// A single missing bin makes the whole average the default baseline.
    pub fn baseline(&self, mbid: &str, chip: u32, channel: u32) -> i64 {
        let Some(record) = self.record(mbid) else {
            return self.defaults.baseline;
        };
        let Some(dac) = record.dac(self.defaults.bias_voltage_dac) else {
            let query = CurveQuery::new("dac").filter("channel", self.defaults.bias_voltage_dac);
            return self.fallback(mbid, &query, "missing bias voltage DAC", self.defaults.baseline);
        };
        let v_bias = dac as f64 * 5.0 / 4096.0;

        let mut sum = 0.0;
        for bin in 0..ATWD_BINS {
            let query = CurveQuery::new("atwd")
                .filter("id", chip)
                .filter("channel", channel)
                .filter("bin", bin);
            let Some(fit) = self.fit(mbid, &query) else {
                return self.fallback(mbid, &query, "missing ATWD calibration", self.defaults.baseline);
            };
            match fit.invert(v_bias) {
                Ok(counts) => sum += counts,
                Err(e) => return self.fallback(mbid, &query, &e.to_string(), self.defaults.baseline),
            }
        }
        to_setting(sum / f64::from(ATWD_BINS))
    }

    /// Timing offset for an ATWD chip (`is_sampling`) or the FADC.
    pub fn delta_t(&self, mbid: &str, is_sampling: bool, chip: u32) -> Option<f64> {
        let record = self.record(mbid)?;
        match record.delta_t(is_sampling, chip) {
            Ok(delta) => delta,
            Err(e) => {
                error!(mbid, error = %e, "error parsing calibration results");
                None
            }
        }
    }

    fn record(&self, mbid: &str) -> Option<&CalibrationRecord> {
        let record = self.store.get(mbid);
        if record.is_none() {
            warn!(mbid, "no calibration record");
            self.defaulted.fetch_add(1, Ordering::Relaxed);
        }
        record
    }

    /// Selected fit, or `None` with the cause logged.
    fn fit(&self, mbid: &str, query: &CurveQuery) -> Option<FitModel> {
        let record = self.store.get(mbid)?;
        match record.fit(query) {
            Ok(fit) => fit,
            Err(e) => {
                error!(mbid, curve = %query, error = %e, "error parsing calibration results");
                None
            }
        }
    }

    fn fallback<T>(&self, mbid: &str, query: &CurveQuery, reason: &str, default: T) -> T {
        warn!(mbid, curve = %query, reason, "calibration query fell back to default");
        self.defaulted.fetch_add(1, Ordering::Relaxed);
        default
    }
}

/// Sanity check for the PMT discriminator fit.
///
/// A known calibration software release wrote garbage into this fit when the
/// HV was off during calibration. The fit is accepted only when both
/// parameters are numbers, the slope is negative and the intercept is not
/// positive.
pub fn check_pmt_disc_fit(fit: &FitModel, query: &CurveQuery) -> Result<(), CalError> {
    let fail = |reason: String| -> Result<(), CalError> {
        Err(CalError::SanityCheckFailed {
            curve: query.to_string(),
            reason,
        })
    };
    let FitModel::Linear { intercept, slope } = *fit else {
        return fail(format!("expected a linear fit, got {}", fit.kind_name()));
    };
    if intercept.is_nan() || slope.is_nan() {
        return fail("parameter is NaN".to_string());
    }
    if slope >= 0.0 {
        return fail(format!("slope {slope} is not negative"));
    }
    if intercept > 0.0 {
        return fail(format!("intercept {intercept} is positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MBID: &str = "eaf3fe2cc0e2";

    fn linear(curve_open: &str, curve_close: &str, intercept: f64, slope: f64) -> String {
        format!(
            r#"{curve_open}<fit model="linear"><param name="slope">{slope}</param><param name="intercept">{intercept}</param></fit>{curve_close}"#
        )
    }

    fn engine(body: &str) -> CalibrationEngine {
        let xml = format!("<domcal>{body}</domcal>");
        let record = CalibrationRecord::parse(MBID, "domcal_eaf3fe2cc0e2.xml", xml.as_bytes()).unwrap();
        let mut store = CalibrationStore::new();
        store.insert(record);
        CalibrationEngine::new(store)
    }

    /// `10^(m*log10(1300) + b) == 1e7` with `m = 7`.
    fn hv_gain_fit() -> String {
        let m = 7.0;
        let b = 7.0 - m * 1300f64.log10();
        linear("<hvGainCal>", "</hvGainCal>", b, m)
    }

    #[test]
    fn gain_is_zero_at_zero_volts_and_sentinel_without_fit() {
        let eng = engine(&hv_gain_fit());
        assert_eq!(eng.gain(MBID, 0.0), 0.0);
        assert!((eng.gain(MBID, 1300.0).log10() - 7.0).abs() < 1e-9);

        let bare = engine("");
        assert_eq!(bare.gain(MBID, 1300.0), -1.0);
        assert_eq!(bare.defaulted_count(), 1);
    }

    #[test]
    fn hv_setting_hits_the_half_volt_target() {
        let eng = engine(&hv_gain_fit());
        let m = 7.0;
        let b = 7.0 - m * 1300f64.log10();
        let expected = (2.0 * 10f64.powf((7.0 - b) / m)).round() as i64;
        assert_eq!(eng.hv_setting(MBID, 1e7), expected);
        assert_eq!(expected, 2600);
    }

    #[test]
    fn hv_setting_round_trips_through_gain() {
        let eng = engine(&hv_gain_fit());
        for &target in &[5e6, 1e7, 3e7] {
            let hv = eng.hv_setting(MBID, target);
            let gain = eng.gain(MBID, hv as f64 / 2.0);
            // Half-volt rounding moves the gain by well under 1%.
            assert!(((gain - target) / target).abs() < 0.01, "target={target} gain={gain}");
        }
    }

    #[test]
    fn hv_setting_defaults() {
        let eng = engine("");
        assert_eq!(eng.hv_setting(MBID, 0.0), 0);
        assert_eq!(eng.hv_setting(MBID, 1e7), eng.defaults().hv_setting);
    }

    #[test]
    fn spe_disc_uses_sane_pmt_fit() {
        let body = format!(
            "{}{}",
            linear(r#"<discriminator id="spe">"#, "</discriminator>", 0.0, 1.0),
            linear("<pmtDiscCal>", "</pmtDiscCal>", -0.2, -0.001),
        );
        let eng = engine(&body);
        let charge = 1e7 * 0.25 * E_CHARGE * 1e12;
        let expected = to_setting((charge + 0.2) / -0.001);
        assert_eq!(eng.spe_discriminator_setting(MBID, 0.25, 1e7), expected);
    }

    #[test]
    fn spe_disc_falls_back_to_pulser_when_pmt_fit_is_insane() {
        let pulser = linear(r#"<discriminator id="spe">"#, "</discriminator>", -0.1, 0.0005);
        let charge = 1e7 * 0.25 * E_CHARGE * 1e12;
        let expected = to_setting((charge + 0.1) / 0.0005);

        for (b, m) in [(-0.2, 1.0), (0.3, -0.001), (f64::NAN, -0.001), (-0.2, f64::NAN)] {
            let body = format!("{pulser}{}", linear("<pmtDiscCal>", "</pmtDiscCal>", b, m));
            let eng = engine(&body);
            assert_eq!(eng.spe_discriminator_setting(MBID, 0.25, 1e7), expected, "b={b} m={m}");
        }

        // Absent PMT fit also falls back.
        assert_eq!(engine(&pulser).spe_discriminator_setting(MBID, 0.25, 1e7), expected);
    }

    #[test]
    fn spe_disc_uses_sane_pmt_fit_without_pulser_fit() {
        let eng = engine(&linear("<pmtDiscCal>", "</pmtDiscCal>", -0.2, -0.001));
        let charge = 1e7 * 0.25 * E_CHARGE * 1e12;
        assert_eq!(eng.spe_discriminator_setting(MBID, 0.25, 1e7), to_setting((charge + 0.2) / -0.001));
        assert_eq!(eng.defaulted_count(), 0);
    }

    #[test]
    fn spe_disc_defaults_without_usable_fit_or_gain() {
        let eng = engine(&linear("<pmtDiscCal>", "</pmtDiscCal>", 0.3, -0.001));
        assert_eq!(eng.spe_discriminator_setting(MBID, 0.25, 1e7), 560);
        assert_eq!(engine("").spe_discriminator_setting(MBID, 0.25, 1e7), 560);
        assert_eq!(eng.spe_discriminator_setting(MBID, 0.25, 0.0), 560);
    }

    #[test]
    fn spe_threshold_inverts_the_pmt_fit() {
        let eng = engine(&linear("<pmtDiscCal>", "</pmtDiscCal>", -0.2, -0.001));
        let pe = eng.spe_threshold_pe(MBID, 560, 1e7);
        let expected = (-0.001 * 560.0 - 0.2) / (1e7 * E_CHARGE * 1e12);
        assert!((pe - expected).abs() < 1e-12);
        assert_eq!(eng.spe_threshold_pe(MBID, 560, 0.0), 0.0);

        let bad = engine(&linear("<pmtDiscCal>", "</pmtDiscCal>", 0.5, -0.001));
        assert_eq!(bad.spe_threshold_pe(MBID, 560, 1e7), 560.0);
    }

    fn freq_fit(chip: u32, c0: f64, c1: f64, c2: f64) -> String {
        format!(
            r#"<atwdfreq atwd="{chip}"><fit model="quadratic"><param name="c0">{c0}</param><param name="c1">{c1}</param><param name="c2">{c2}</param></fit></atwdfreq>"#
        )
    }

    #[test]
    fn atwd_bias_and_frequency_are_inverse() {
        let eng = engine(&(freq_fit(0, 20.0, 0.3, 0.0001) + &freq_fit(1, 25.0, 0.3, 0.0001)));
        let bias0 = eng.atwd_bias_setting(MBID, 0, 300.0);
        let bias1 = eng.atwd_bias_setting(MBID, 1, 300.0);
        assert_ne!(bias0, bias1);
        let f0 = eng.atwd_frequency(MBID, 0, bias0).unwrap();
        assert!((f0 - 300.0).abs() < 0.5, "f0={f0}");
    }

    #[test]
    fn atwd_bias_defaults_without_root_or_fit() {
        let eng = engine(&freq_fit(0, 400.0, 0.0, 1.0));
        assert_eq!(eng.atwd_bias_setting(MBID, 0, 300.0), 800);
        assert_eq!(eng.atwd_bias_setting(MBID, 1, 300.0), 800);
        assert_eq!(eng.atwd_frequency(MBID, 1, 850), None);
    }

    fn atwd_bins(chip: u32, channel: u32, skip: Option<u32>) -> String {
        (0..ATWD_BINS)
            .filter(|bin| Some(*bin) != skip)
            .map(|bin| {
                linear(
                    &format!(r#"<atwd id="{chip}" channel="{channel}" bin="{bin}">"#),
                    "</atwd>",
                    0.0,
                    1.0,
                )
            })
            .collect()
    }

    #[test]
    fn baseline_averages_all_bins() {
        let body = format!(r#"<dac channel="7">850</dac>{}"#, atwd_bins(0, 1, None));
        let eng = engine(&body);
        let v_bias = 850.0 * 5.0 / 4096.0;
        assert_eq!(eng.baseline(MBID, 0, 1), to_setting(v_bias));
    }

    #[test]
    fn baseline_with_missing_bin_is_default() {
        let body = format!(r#"<dac channel="7">850</dac>{}"#, atwd_bins(0, 1, Some(64)));
        let eng = engine(&body);
        assert_eq!(eng.baseline(MBID, 0, 1), 128);
        assert_eq!(eng.baseline("ffffffffffff", 0, 1), 128);
    }

    #[test]
    fn delta_t_degrades_to_none() {
        let eng = engine(r#"<atwd_delta_t id="1"><delta_t>-0.421</delta_t></atwd_delta_t><fadc_delta_t/>"#);
        assert!((eng.delta_t(MBID, true, 1).unwrap() + 0.421).abs() < 1e-12);
        assert_eq!(eng.delta_t(MBID, false, 0), None);
    }

    #[test]
    fn unknown_fit_model_counts_as_missing() {
        let eng = engine(r#"<hvGainCal><fit model="spline"/></hvGainCal>"#);
        assert_eq!(eng.gain(MBID, 1300.0), -1.0);
    }

    #[test]
    fn sanity_check_is_explicit() {
        let q = CurveQuery::new("pmtDiscCal");
        let ok = FitModel::Linear {
            intercept: -0.2,
            slope: -0.001,
        };
        assert!(check_pmt_disc_fit(&ok, &q).is_ok());
        let bad = FitModel::Linear {
            intercept: -0.2,
            slope: 1.0,
        };
        assert!(matches!(
            check_pmt_disc_fit(&bad, &q),
            Err(CalError::SanityCheckFailed { .. })
        ));
        let quad = FitModel::Quadratic {
            c0: 0.0,
            c1: -1.0,
            c2: 0.0,
        };
        assert!(check_pmt_disc_fit(&quad, &q).is_err());
    }

    #[test]
    fn engines_do_not_share_defaults() {
        let custom = CalibrationDefaults {
            freq_setting: 900,
            ..CalibrationDefaults::default()
        };
        let a = CalibrationEngine::with_defaults(CalibrationStore::new(), custom);
        let b = CalibrationEngine::new(CalibrationStore::new());
        assert_eq!(a.atwd_bias_setting(MBID, 0, 300.0), 900);
        assert_eq!(b.atwd_bias_setting(MBID, 0, 300.0), 800);
    }
}
