#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and pH calibration parsing for the titrator.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The calibration CSV loader turns bench measurements of reference
//!   solutions into the two-point calibration the probe path uses.

use serde::Deserialize;

/// Calibration CSV schema.
///
/// Expected headers:
/// raw,ph
///
/// Example:
/// raw,ph
/// 4.21,4.0
/// 7.38,7.0
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CalibrationRow {
    pub raw: f32,
    pub ph: f32,
}

/// GPIO assignment for one stepper driver.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct DoserPins {
    pub step: u8,
    pub dir: u8,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct DoserCfg {
    /// Measured pump output for one full rotation, in ml.
    pub ml_per_rotation: f32,
    pub motor_rpm: u32,
    pub microstep: u32,
    /// +1 or -1; flips "forward" for pumps plumbed backwards.
    pub direction: i32,
    /// Required only for hardware builds.
    pub pins: Option<DoserPins>,
}

impl Default for DoserCfg {
    fn default() -> Self {
        Self {
            ml_per_rotation: 0.28,
            motor_rpm: 60,
            microstep: 16,
            direction: 1,
            pins: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Dosers {
    pub fill: DoserCfg,
    pub drain: DoserCfg,
    pub reagent: DoserCfg,
    /// Shared /ENABLE line for all drivers (hardware builds).
    pub enable_pin: Option<u8>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct PhCalibrationCfg {
    pub low_actual: f32,
    pub low_read: f32,
    pub high_actual: f32,
    pub high_read: f32,
}

impl Default for PhCalibrationCfg {
    fn default() -> Self {
        // identity mapping until the probe is calibrated
        Self {
            low_actual: 4.0,
            low_read: 4.0,
            high_actual: 7.0,
            high_read: 7.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PhCfg {
    /// Minimum spacing between ambient probe reads (ms).
    pub read_interval_ms: u64,
    /// Moving-average window for raw ambient readings.
    pub raw_window: usize,
    /// Moving-average window for calibrated ambient readings.
    pub calibrated_window: usize,
    /// Sysfs/iio file to read raw pH from. Unset means simulated probe.
    pub source_path: Option<String>,
    pub calibration: PhCalibrationCfg,
}

impl Default for PhCfg {
    fn default() -> Self {
        Self {
            read_interval_ms: 1_000,
            raw_window: 30,
            calibrated_window: 30,
            source_path: None,
            calibration: PhCalibrationCfg::default(),
        }
    }
}

/// Overrides over the engine's built-in titration defaults. Absent fields
/// inherit.
#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(default)]
pub struct TitrationCfg {
    pub prime_tank_water_fill_volume_ml: Option<f32>,
    pub prime_reagent_volume_ml: Option<f32>,
    pub prime_reagent_reverse_volume_ml: Option<f32>,
    pub measurement_tank_water_volume_ml: Option<f32>,
    pub extra_purge_volume_ml: Option<f32>,
    pub initial_reagent_dose_volume_ml: Option<f32>,
    pub incremental_reagent_dose_volume_ml: Option<f32>,
    pub max_reagent_dose_ml: Option<f32>,
    pub stir_amount_ml: Option<f32>,
    pub stir_times: Option<u32>,
    pub ph_sample_count: Option<usize>,
    pub reagent_strength_moles: Option<f32>,
    pub calibration_multiplier: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MeasurementCfg {
    /// Pacing between automatic state-machine steps (ms).
    pub step_interval_ms: u64,
    /// Abort a run making no progress for this long (ms).
    pub stall_timeout_ms: u64,
}

impl Default for MeasurementCfg {
    fn default() -> Self {
        Self {
            step_interval_ms: 1_000,
            stall_timeout_ms: 600_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreCfg {
    /// Readings kept in the ring before the oldest is overwritten.
    pub capacity: usize,
    pub path: String,
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            capacity: 80,
            path: "titrator_readings.bin".into(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub dosers: Dosers,
    pub ph: PhCfg,
    pub titration: TitrationCfg,
    pub measurement: MeasurementCfg,
    pub store: StoreCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        for (name, doser) in [
            ("fill", &self.dosers.fill),
            ("drain", &self.dosers.drain),
            ("reagent", &self.dosers.reagent),
        ] {
            if doser.ml_per_rotation <= 0.0 {
                eyre::bail!("dosers.{name}.ml_per_rotation must be > 0");
            }
            if doser.motor_rpm == 0 {
                eyre::bail!("dosers.{name}.motor_rpm must be > 0");
            }
            if doser.microstep == 0 {
                eyre::bail!("dosers.{name}.microstep must be > 0");
            }
            if doser.direction != 1 && doser.direction != -1 {
                eyre::bail!("dosers.{name}.direction must be 1 or -1");
            }
        }
        if self.ph.read_interval_ms == 0 {
            eyre::bail!("ph.read_interval_ms must be >= 1");
        }
        if self.ph.raw_window == 0 {
            eyre::bail!("ph.raw_window must be >= 1");
        }
        if self.ph.calibrated_window == 0 {
            eyre::bail!("ph.calibrated_window must be >= 1");
        }
        let cal = &self.ph.calibration;
        if (cal.high_read - cal.low_read).abs() < f32::EPSILON {
            eyre::bail!("ph.calibration read anchors must differ");
        }
        if let Some(v) = self.titration.measurement_tank_water_volume_ml
            && v <= 0.0
        {
            eyre::bail!("titration.measurement_tank_water_volume_ml must be > 0");
        }
        if let Some(v) = self.titration.incremental_reagent_dose_volume_ml
            && v <= 0.0
        {
            eyre::bail!("titration.incremental_reagent_dose_volume_ml must be > 0");
        }
        if let Some(v) = self.titration.ph_sample_count
            && v == 0
        {
            eyre::bail!("titration.ph_sample_count must be >= 1");
        }
        if let Some(v) = self.titration.reagent_strength_moles
            && v <= 0.0
        {
            eyre::bail!("titration.reagent_strength_moles must be > 0");
        }
        if self.measurement.step_interval_ms == 0 {
            eyre::bail!("measurement.step_interval_ms must be >= 1");
        }
        if self.measurement.stall_timeout_ms <= self.measurement.step_interval_ms {
            eyre::bail!("measurement.stall_timeout_ms must exceed step_interval_ms");
        }
        if self.store.capacity == 0 {
            eyre::bail!("store.capacity must be >= 1");
        }
        Ok(())
    }
}

/// Two calibration anchors derived from bench measurements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhCalibrationPoints {
    pub low_actual: f32,
    pub low_read: f32,
    pub high_actual: f32,
    pub high_read: f32,
}

/// Load probe calibration from a `raw,ph` CSV.
///
/// Rows are sorted by raw value; the extremes become the two anchors, so a
/// sheet with extra mid-range checks still produces a sound two-point fit.
pub fn load_ph_calibration_csv(path: &std::path::Path) -> eyre::Result<PhCalibrationPoints> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = rdr.headers()?.clone();
    let expected = ["raw", "ph"];
    let got: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();
    if got != expected {
        eyre::bail!(
            "calibration CSV must have headers exactly: raw,ph (got: {})",
            got.join(",")
        );
    }

    let mut rows: Vec<CalibrationRow> = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if rows.len() < 2 {
        eyre::bail!("calibration requires at least two rows, got {}", rows.len());
    }
    for row in &rows {
        if !row.raw.is_finite() || !row.ph.is_finite() {
            eyre::bail!("calibration rows must be finite numbers");
        }
    }
    rows.sort_by(|a, b| a.raw.total_cmp(&b.raw));
    let low = rows[0];
    let high = rows[rows.len() - 1];
    if (high.raw - low.raw).abs() < f32::EPSILON {
        eyre::bail!("calibration raw values are all identical");
    }
    Ok(PhCalibrationPoints {
        low_actual: low.ph,
        low_read: low.raw,
        high_actual: high.ph,
        high_read: high.raw,
    })
}
