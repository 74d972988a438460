//! The titration state machine.
//!
//! A measurement run walks PRIME -> CLEAN_AND_FILL -> MEASURE -> CLEANUP ->
//! MEASURE_DONE, with MEASURE itself cycling STEP_INITIALIZE -> MEASURE_PH ->
//! DOSE until the smoothed pH crosses the endpoint. Each call to
//! [`AlkMeasurer::step`] performs exactly one discrete step and returns the
//! successor state, so callers can pace runs however they like: a timed loop
//! for automatic runs, or one call per button press for manual debugging.

use std::fmt;

use crate::doser::{DoserRole, DoserSet};
use crate::error::{Result, TitrationError};
use crate::ph::PhReader;
use crate::reading::{AlkReading, Publisher, round2};
use crate::stats::PhStats;
use crate::time::TimeKeeper;

/// Carbonate-endpoint target for a 0.1 N acid titration.
pub const TARGET_PH: f32 = 4.5;
/// Acceptance band above the target; the endpoint is pH <= target + epsilon.
pub const PH_MEASUREMENT_EPSILON: f32 = 0.05;
/// dKH yielded per (ml reagent / ml sample) at reference strength.
pub const DKH_PER_ML_RATIO: f32 = 280.0;
/// Reagent molarity the ratio above is calibrated for.
pub const REFERENCE_REAGENT_STRENGTH: f32 = 0.1;

/// Extra volume expelled after each stir draw so the line clears fully.
const STIR_EXTRA_DRAINAGE_ML: f32 = 2.0;

/// Coarse phase of a measurement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementAction {
    Prime,
    CleanAndFill,
    Measure,
    Cleanup,
    MeasureDone,
}

impl fmt::Display for MeasurementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MeasurementAction::Prime => "PRIME",
            MeasurementAction::CleanAndFill => "CLEAN_AND_FILL",
            MeasurementAction::Measure => "MEASURE",
            MeasurementAction::Cleanup => "CLEANUP",
            MeasurementAction::MeasureDone => "MEASURE_DONE",
        };
        f.write_str(s)
    }
}

/// Fine-grained phase within MEASURE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementStepAction {
    StepInitialize,
    MeasurePh,
    Dose,
    StepDone,
}

impl fmt::Display for MeasurementStepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MeasurementStepAction::StepInitialize => "STEP_INITIALIZE",
            MeasurementStepAction::MeasurePh => "MEASURE_PH",
            MeasurementStepAction::Dose => "DOSE",
            MeasurementStepAction::StepDone => "STEP_DONE",
        };
        f.write_str(s)
    }
}

/// Volumes and thresholds for one measurement run.
#[derive(Debug, Clone, PartialEq)]
pub struct TitrationConfig {
    /// Tank water pushed through during PRIME to wet the fill line.
    pub prime_tank_water_fill_volume_ml: f32,
    /// Reagent pushed forward during PRIME.
    pub prime_reagent_volume_ml: f32,
    /// Reagent pulled back after priming so the next dose starts from a
    /// known meniscus. `None` skips the pull-back.
    pub prime_reagent_reverse_volume_ml: Option<f32>,
    /// Sample size drawn for the actual measurement.
    pub measurement_tank_water_volume_ml: f32,
    /// Extra drain volume beyond the vessel size, guaranteeing it empties.
    pub extra_purge_volume_ml: f32,
    /// First reagent addition, sized to get near the endpoint quickly.
    pub initial_reagent_dose_volume_ml: f32,
    /// Per-cycle addition once near the endpoint.
    pub incremental_reagent_dose_volume_ml: f32,
    /// Hard cap on total reagent; reaching it ends the run early.
    pub max_reagent_dose_ml: f32,
    /// Volume moved per stir cycle.
    pub stir_amount_ml: f32,
    /// Stir cycles after each dose.
    pub stir_times: u32,
    /// Samples per pH observation window; the endpoint check waits for a
    /// full window.
    pub ph_sample_count: usize,
    /// Actual molarity of the loaded reagent.
    pub reagent_strength_moles: f32,
    /// Per-instrument fudge factor applied to the final dKH.
    pub calibration_multiplier: f32,
}

impl Default for TitrationConfig {
    fn default() -> Self {
        Self {
            prime_tank_water_fill_volume_ml: 10.0,
            prime_reagent_volume_ml: 0.5,
            prime_reagent_reverse_volume_ml: Some(0.2),
            measurement_tank_water_volume_ml: 200.0,
            extra_purge_volume_ml: 50.0,
            initial_reagent_dose_volume_ml: 3.0,
            incremental_reagent_dose_volume_ml: 0.1,
            max_reagent_dose_ml: 15.0,
            stir_amount_ml: 3.0,
            stir_times: 10,
            ph_sample_count: 10,
            reagent_strength_moles: 0.1,
            calibration_multiplier: 1.0,
        }
    }
}

impl TitrationConfig {
    pub fn validate(&self) -> std::result::Result<(), TitrationError> {
        if self.measurement_tank_water_volume_ml <= 0.0 {
            return Err(TitrationError::Config(
                "measurement_tank_water_volume_ml must be positive".into(),
            ));
        }
        if self.incremental_reagent_dose_volume_ml <= 0.0 {
            return Err(TitrationError::Config(
                "incremental_reagent_dose_volume_ml must be positive".into(),
            ));
        }
        if self.max_reagent_dose_ml <= self.initial_reagent_dose_volume_ml {
            return Err(TitrationError::Config(
                "max_reagent_dose_ml must exceed the initial dose".into(),
            ));
        }
        if self.ph_sample_count == 0 {
            return Err(TitrationError::Config(
                "ph_sample_count must be at least 1".into(),
            ));
        }
        if self.reagent_strength_moles <= 0.0 {
            return Err(TitrationError::Config(
                "reagent_strength_moles must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Snapshot of a run between steps. Owns everything the next step needs.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Device-uptime ms when the run began.
    pub started_at_ms: u64,
    /// Device-uptime ms of the last state change.
    pub as_of_ms: u64,
    /// Adjusted wall-clock seconds of the last state change.
    pub as_of_adjusted_sec: u64,
    pub next_action: MeasurementAction,
    pub next_step_action: MeasurementStepAction,
    /// The reportable reading. Only MEASURE-phase volumes land here.
    pub reading: AlkReading,
    /// Scratch reading absorbing prime and cleanup volumes, so line
    /// maintenance never pollutes the reported result.
    pub scratch: AlkReading,
    /// Per-run pH window; fresh for each measure cycle.
    pub ph_stats: Option<PhStats>,
    pub conf: TitrationConfig,
}

impl StepResult {
    pub fn is_done(&self) -> bool {
        self.next_action == MeasurementAction::MeasureDone
    }

    fn set_time(&mut self, now_ms: u64, adjusted_sec: u64) {
        self.as_of_ms = now_ms;
        self.as_of_adjusted_sec = adjusted_sec;
        self.reading.as_of_ms = now_ms;
        self.reading.as_of_adjusted_sec = adjusted_sec;
        self.scratch.as_of_ms = now_ms;
        self.scratch.as_of_adjusted_sec = adjusted_sec;
    }
}

/// True when the smoothed pH has reached the titration endpoint.
pub fn hit_ph_target(calibrated_ph_mavg: f32) -> bool {
    calibrated_ph_mavg <= TARGET_PH + PH_MEASUREMENT_EPSILON
}

/// Alkalinity from accumulated volumes.
pub fn calc_dkh(reading: &AlkReading, conf: &TitrationConfig) -> f32 {
    if reading.tank_water_volume_ml <= 0.0 {
        return 0.0;
    }
    round2(
        reading.reagent_volume_ml / reading.tank_water_volume_ml
            * DKH_PER_ML_RATIO
            * (conf.reagent_strength_moles / REFERENCE_REAGENT_STRENGTH)
            * conf.calibration_multiplier,
    )
}

fn stir(dosers: &mut DoserSet, conf: &TitrationConfig) -> Result<()> {
    let drain = dosers.select(DoserRole::Drain)?;
    for _ in 0..conf.stir_times {
        drain.dispense_ml(conf.stir_amount_ml)?;
        drain.dispense_ml(-(conf.stir_amount_ml + STIR_EXTRA_DRAINAGE_ML))?;
    }
    Ok(())
}

/// Wet both supply lines. Fill water is split around the reagent push so the
/// vessel dilutes any reagent that reaches it.
fn prime_dosers(dosers: &mut DoserSet, conf: &TitrationConfig, scratch: &mut AlkReading) -> Result<()> {
    let half_fill = conf.prime_tank_water_fill_volume_ml / 2.0;
    dosers.select(DoserRole::Fill)?.dispense_ml(half_fill)?;
    scratch.tank_water_volume_ml += half_fill;

    let reagent = dosers.select(DoserRole::Reagent)?;
    reagent.dispense_ml(conf.prime_reagent_volume_ml)?;
    scratch.reagent_volume_ml += conf.prime_reagent_volume_ml;
    if let Some(reverse) = conf.prime_reagent_reverse_volume_ml {
        reagent.dispense_ml(-reverse)?;
    }

    dosers.select(DoserRole::Fill)?.dispense_ml(half_fill)?;
    scratch.tank_water_volume_ml += half_fill;
    Ok(())
}

fn drain_vessel(dosers: &mut DoserSet, conf: &TitrationConfig) -> Result<()> {
    dosers
        .select(DoserRole::Drain)?
        .dispense_ml(conf.measurement_tank_water_volume_ml + conf.extra_purge_volume_ml)
}

fn fill_vessel(dosers: &mut DoserSet, conf: &TitrationConfig, reading: &mut AlkReading) -> Result<()> {
    dosers
        .select(DoserRole::Fill)?
        .dispense_ml(conf.measurement_tank_water_volume_ml)?;
    reading.tank_water_volume_ml += conf.measurement_tank_water_volume_ml;
    Ok(())
}

fn add_reagent_dose(dosers: &mut DoserSet, ml: f32, reading: &mut AlkReading) -> Result<()> {
    dosers.select(DoserRole::Reagent)?.dispense_ml(ml)?;
    reading.reagent_volume_ml += ml;
    Ok(())
}

/// Drives measurement runs. Stateless itself; all run state lives in the
/// [`StepResult`] handed back and forth.
#[derive(Debug, Clone)]
pub struct AlkMeasurer {
    default_conf: TitrationConfig,
}

impl AlkMeasurer {
    pub fn new(default_conf: TitrationConfig) -> Self {
        Self { default_conf }
    }

    pub fn default_conf(&self) -> &TitrationConfig {
        &self.default_conf
    }

    /// Start a run with the given (already merged) config.
    pub fn begin(&self, conf: TitrationConfig, time: &TimeKeeper, title: &str) -> StepResult {
        let now = time.now_ms();
        let sec = time.adjusted_secs();
        let mut result = StepResult {
            started_at_ms: now,
            as_of_ms: now,
            as_of_adjusted_sec: sec,
            next_action: MeasurementAction::Prime,
            next_step_action: MeasurementStepAction::StepInitialize,
            reading: AlkReading {
                title: title.to_string(),
                ..AlkReading::default()
            },
            scratch: AlkReading::default(),
            ph_stats: None,
            conf,
        };
        result.set_time(now, sec);
        result
    }

    pub fn begin_default(&self, time: &TimeKeeper, title: &str) -> StepResult {
        self.begin(self.default_conf.clone(), time, title)
    }

    /// Perform one step. A terminal run is returned unchanged, untimestamped.
    /// On error the doser power is cut best-effort before propagating.
    pub fn step(
        &self,
        prev: StepResult,
        dosers: &mut DoserSet,
        ph_reader: &mut PhReader,
        publisher: &mut dyn Publisher,
        time: &TimeKeeper,
    ) -> Result<StepResult> {
        if prev.is_done() {
            return Ok(prev);
        }
        match self.step_inner(prev, dosers, ph_reader, publisher, time) {
            Ok(next) => Ok(next),
            Err(e) => {
                if let Err(disable_err) = dosers.disable_all() {
                    tracing::warn!(error = %disable_err, "failed to cut doser power after step error");
                }
                Err(e)
            }
        }
    }

    fn step_inner(
        &self,
        mut r: StepResult,
        dosers: &mut DoserSet,
        ph_reader: &mut PhReader,
        publisher: &mut dyn Publisher,
        time: &TimeKeeper,
    ) -> Result<StepResult> {
        match r.next_action {
            MeasurementAction::Prime => {
                tracing::info!(title = %r.reading.title, "priming supply lines and rinsing vessel");
                dosers.enable_all()?;
                prime_dosers(dosers, &r.conf, &mut r.scratch)?;
                // Rinse: flush whatever the prime left behind, then park the
                // vessel full of fresh water. These volumes are scratch only.
                drain_vessel(dosers, &r.conf)?;
                fill_vessel(dosers, &r.conf, &mut r.scratch)?;
                stir(dosers, &r.conf)?;
                r.next_action = MeasurementAction::CleanAndFill;
            }
            MeasurementAction::CleanAndFill => {
                tracing::info!("rinsing and filling measurement vessel");
                drain_vessel(dosers, &r.conf)?;
                fill_vessel(dosers, &r.conf, &mut r.reading)?;
                add_reagent_dose(dosers, r.conf.initial_reagent_dose_volume_ml, &mut r.reading)?;
                stir(dosers, &r.conf)?;
                r.next_action = MeasurementAction::Measure;
                r.next_step_action = MeasurementStepAction::StepInitialize;
            }
            MeasurementAction::Measure => self.measure_step(&mut r, dosers, ph_reader, time)?,
            MeasurementAction::Cleanup => {
                tracing::info!(
                    dkh = r.reading.dkh,
                    reagent_ml = r.reading.reagent_volume_ml,
                    "measurement complete; publishing and draining"
                );
                publisher.publish_alk_reading(&r.reading)?;
                drain_vessel(dosers, &r.conf)?;
                // Leave the vessel full of fresh water so the probe stays wet
                // between runs; the refill is scratch volume, not result.
                fill_vessel(dosers, &r.conf, &mut r.scratch)?;
                stir(dosers, &r.conf)?;
                dosers.disable_all()?;
                r.next_action = MeasurementAction::MeasureDone;
                r.next_step_action = MeasurementStepAction::StepDone;
            }
            MeasurementAction::MeasureDone => {
                // Handled by the is_done short-circuit in step().
                return Ok(r);
            }
        }
        r.set_time(time.now_ms(), time.adjusted_secs());
        Ok(r)
    }

    fn measure_step(
        &self,
        r: &mut StepResult,
        dosers: &mut DoserSet,
        ph_reader: &mut PhReader,
        time: &TimeKeeper,
    ) -> Result<()> {
        match r.next_step_action {
            MeasurementStepAction::StepInitialize => {
                r.ph_stats = Some(PhStats::new(r.conf.ph_sample_count, r.conf.ph_sample_count));
                r.next_step_action = MeasurementStepAction::MeasurePh;
            }
            MeasurementStepAction::MeasurePh => {
                let sample = ph_reader.read_now(time.now_ms())?;
                let stats = r.ph_stats.as_mut().ok_or_else(|| {
                    eyre::Report::new(TitrationError::State(
                        "MEASURE_PH reached without a pH window".into(),
                    ))
                })?;
                let smoothed = stats.add(sample.as_of_ms, sample.raw_ph, sample.calibrated_ph);
                r.reading.ph = smoothed;
                tracing::debug!(
                    calibrated = smoothed.calibrated_ph,
                    calibrated_mavg = smoothed.calibrated_ph_mavg,
                    samples = stats.count(),
                    "measurement pH sample"
                );
                if stats.warmed_up() {
                    if hit_ph_target(smoothed.calibrated_ph_mavg) {
                        r.next_action = MeasurementAction::Cleanup;
                        r.next_step_action = MeasurementStepAction::StepDone;
                    } else if r.reading.reagent_volume_ml >= r.conf.max_reagent_dose_ml {
                        tracing::warn!(
                            reagent_ml = r.reading.reagent_volume_ml,
                            max_ml = r.conf.max_reagent_dose_ml,
                            calibrated_mavg = smoothed.calibrated_ph_mavg,
                            "reagent cap reached before pH endpoint; ending run"
                        );
                        r.next_action = MeasurementAction::Cleanup;
                        r.next_step_action = MeasurementStepAction::StepDone;
                    } else {
                        r.next_step_action = MeasurementStepAction::Dose;
                    }
                }
            }
            MeasurementStepAction::Dose => {
                add_reagent_dose(
                    dosers,
                    r.conf.incremental_reagent_dose_volume_ml,
                    &mut r.reading,
                )?;
                stir(dosers, &r.conf)?;
                r.next_step_action = MeasurementStepAction::StepInitialize;
            }
            MeasurementStepAction::StepDone => {
                return Err(eyre::Report::new(TitrationError::State(
                    "STEP_DONE inside MEASURE phase".into(),
                )));
            }
        }
        r.reading.dkh = calc_dkh(&r.reading, &r.conf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(4.4, true)]
    #[case(4.5, true)]
    #[case(4.55, true)]
    #[case(4.551, false)]
    #[case(5.0, false)]
    fn endpoint_uses_inclusive_band(#[case] ph: f32, #[case] hit: bool) {
        assert_eq!(hit_ph_target(ph), hit);
    }

    #[test]
    fn dkh_reference_vector() {
        let reading = AlkReading {
            tank_water_volume_ml: 200.0,
            reagent_volume_ml: 3.1,
            ..AlkReading::default()
        };
        assert_eq!(calc_dkh(&reading, &TitrationConfig::default()), 4.34);
    }

    #[test]
    fn dkh_scales_with_strength_and_multiplier() {
        let reading = AlkReading {
            tank_water_volume_ml: 200.0,
            reagent_volume_ml: 3.1,
            ..AlkReading::default()
        };
        let conf = TitrationConfig {
            reagent_strength_moles: 0.2,
            calibration_multiplier: 0.5,
            ..TitrationConfig::default()
        };
        // doubles from strength, halves from the multiplier
        assert_eq!(calc_dkh(&reading, &conf), 4.34);
    }

    #[test]
    fn dkh_of_empty_vessel_is_zero() {
        let reading = AlkReading::default();
        assert_eq!(calc_dkh(&reading, &TitrationConfig::default()), 0.0);
    }

    #[test]
    fn default_config_validates() {
        assert!(TitrationConfig::default().validate().is_ok());
    }

    #[rstest]
    #[case(TitrationConfig { measurement_tank_water_volume_ml: 0.0, ..TitrationConfig::default() })]
    #[case(TitrationConfig { incremental_reagent_dose_volume_ml: -0.1, ..TitrationConfig::default() })]
    #[case(TitrationConfig { max_reagent_dose_ml: 1.0, ..TitrationConfig::default() })]
    #[case(TitrationConfig { ph_sample_count: 0, ..TitrationConfig::default() })]
    #[case(TitrationConfig { reagent_strength_moles: 0.0, ..TitrationConfig::default() })]
    fn invalid_configs_rejected(#[case] conf: TitrationConfig) {
        assert!(conf.validate().is_err());
    }
}
