//! Top-level orchestration: trigger handling, the cooperative tick, and the
//! split between the automatic run and the manually stepped run.

use crate::doser::DoserSet;
use crate::error::Result;
use crate::looper::{DEFAULT_STALL_TIMEOUT_MS, DEFAULT_STEP_INTERVAL_MS, LoopStatus, MeasureLoop};
use crate::measure::{AlkMeasurer, StepResult, TitrationConfig};
use crate::ph::PhReader;
use crate::reading::Publisher;
use crate::stats::PhStats;
use crate::store::{PersistedReading, ReadingStore, normalize_title};
use crate::time::TimeKeeper;

/// Optional per-trigger overrides over the instrument's default titration
/// config. `None` fields inherit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TitrationOverrides {
    pub measurement_tank_water_volume_ml: Option<f32>,
    pub initial_reagent_dose_volume_ml: Option<f32>,
    pub incremental_reagent_dose_volume_ml: Option<f32>,
    pub max_reagent_dose_ml: Option<f32>,
    pub ph_sample_count: Option<usize>,
    pub reagent_strength_moles: Option<f32>,
    pub calibration_multiplier: Option<f32>,
}

impl TitrationOverrides {
    pub fn apply(&self, base: &TitrationConfig) -> TitrationConfig {
        let mut conf = base.clone();
        if let Some(v) = self.measurement_tank_water_volume_ml {
            conf.measurement_tank_water_volume_ml = v;
        }
        if let Some(v) = self.initial_reagent_dose_volume_ml {
            conf.initial_reagent_dose_volume_ml = v;
        }
        if let Some(v) = self.incremental_reagent_dose_volume_ml {
            conf.incremental_reagent_dose_volume_ml = v;
        }
        if let Some(v) = self.max_reagent_dose_ml {
            conf.max_reagent_dose_ml = v;
        }
        if let Some(v) = self.ph_sample_count {
            conf.ph_sample_count = v;
        }
        if let Some(v) = self.reagent_strength_moles {
            conf.reagent_strength_moles = v;
        }
        if let Some(v) = self.calibration_multiplier {
            conf.calibration_multiplier = v;
        }
        conf
    }
}

/// A request to start an automatic run.
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub title: String,
    /// Caller-supplied timestamp used for duplicate suppression. Retries of
    /// the same trigger carry the same value.
    pub as_of: u64,
    pub overrides: TitrationOverrides,
}

/// Drops replayed or stale triggers: a run starts only for a trigger whose
/// `as_of` is strictly newer than the last started one.
#[derive(Debug, Default)]
pub struct TriggerGuard {
    last_started_as_of: u64,
}

impl TriggerGuard {
    pub fn last_started_as_of(&self) -> u64 {
        self.last_started_as_of
    }

    pub fn try_claim(&mut self, as_of: u64) -> bool {
        if as_of > self.last_started_as_of {
            self.last_started_as_of = as_of;
            true
        } else {
            tracing::info!(
                as_of,
                last_started = self.last_started_as_of,
                "dropping duplicate or stale measurement trigger"
            );
            false
        }
    }
}

/// The instrument: owns the hardware handles and at most one automatic run
/// plus one manually stepped run.
pub struct Controller {
    measurer: AlkMeasurer,
    dosers: DoserSet,
    ph_reader: PhReader,
    ambient_stats: PhStats,
    publisher: Box<dyn Publisher>,
    time: TimeKeeper,
    guard: TriggerGuard,
    active: Option<MeasureLoop>,
    manual: Option<StepResult>,
    store: ReadingStore,
    step_interval_ms: u64,
    stall_timeout_ms: u64,
}

impl Controller {
    pub fn new(
        measurer: AlkMeasurer,
        dosers: DoserSet,
        ph_reader: PhReader,
        publisher: Box<dyn Publisher>,
        time: TimeKeeper,
        store: ReadingStore,
    ) -> Self {
        let conf = ph_reader.read_config();
        let ambient_stats = PhStats::new(conf.raw_window, conf.calibrated_window);
        Self {
            measurer,
            dosers,
            ph_reader,
            ambient_stats,
            publisher,
            time,
            guard: TriggerGuard::default(),
            active: None,
            manual: None,
            store,
            step_interval_ms: DEFAULT_STEP_INTERVAL_MS,
            stall_timeout_ms: DEFAULT_STALL_TIMEOUT_MS,
        }
    }

    pub fn with_step_interval_ms(mut self, ms: u64) -> Self {
        self.step_interval_ms = ms;
        self
    }

    pub fn with_stall_timeout_ms(mut self, ms: u64) -> Self {
        self.stall_timeout_ms = ms;
        self
    }

    pub fn store(&self) -> &ReadingStore {
        &self.store
    }

    pub fn ambient_ph(&self) -> &PhStats {
        &self.ambient_stats
    }

    pub fn active_run(&self) -> Option<&StepResult> {
        self.active.as_ref().map(MeasureLoop::cursor)
    }

    pub fn manual_run(&self) -> Option<&StepResult> {
        self.manual.as_ref()
    }

    /// Start an automatic run unless one is in flight or the trigger is a
    /// replay. Returns whether a run started.
    pub fn handle_trigger(&mut self, req: &TriggerRequest) -> bool {
        if self.active.is_some() {
            tracing::info!(title = %req.title, "measurement already in flight; ignoring trigger");
            return false;
        }
        if !self.guard.try_claim(req.as_of) {
            return false;
        }
        let conf = req.overrides.apply(self.measurer.default_conf());
        let title = normalize_title(&req.title);
        tracing::info!(title = %title, as_of = req.as_of, "beginning alkalinity measurement");
        let initial = self.measurer.begin(conf, &self.time, &title);
        self.active = Some(MeasureLoop::new(
            initial,
            self.step_interval_ms,
            self.stall_timeout_ms,
        ));
        true
    }

    /// One cooperative tick: feed the ambient pH pipeline, then advance the
    /// automatic run if due. An errored run is dropped so the next trigger
    /// can start fresh.
    pub fn tick(&mut self) -> Result<()> {
        let now = self.time.now_ms();
        if let Some(sample) = self.ph_reader.read_if_due(now, &mut self.ambient_stats)? {
            self.publisher.publish_ph(&sample)?;
        }
        if let Some(lp) = self.active.as_mut() {
            let status = lp.advance_if_due(
                &self.measurer,
                &mut self.dosers,
                &mut self.ph_reader,
                self.publisher.as_mut(),
                &self.time,
            );
            match status {
                Ok(LoopStatus::Done) => {
                    if let Some(done) = self.active.take() {
                        let cursor = done.into_cursor();
                        tracing::info!(
                            dkh = cursor.reading.dkh,
                            title = %cursor.reading.title,
                            "run finished; recording reading"
                        );
                        self.store.add(PersistedReading::from_reading(&cursor.reading));
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    self.active = None;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Begin a manually stepped run, replacing any unfinished one.
    pub fn begin_manual(&mut self, title: &str) -> &StepResult {
        if self.manual.as_ref().is_some_and(|m| !m.is_done()) {
            tracing::warn!("replacing unfinished manual run");
        }
        let initial = self
            .measurer
            .begin_default(&self.time, &normalize_title(title));
        self.manual.insert(initial)
    }

    /// Advance the manual run one step. `Ok(None)` means no manual run
    /// exists. A finished run is recorded exactly once.
    pub fn manual_step(&mut self) -> Result<Option<&StepResult>> {
        let Some(prev) = self.manual.take() else {
            return Ok(None);
        };
        let was_done = prev.is_done();
        let next = self.measurer.step(
            prev,
            &mut self.dosers,
            &mut self.ph_reader,
            self.publisher.as_mut(),
            &self.time,
        )?;
        if next.is_done() && !was_done {
            self.store.add(PersistedReading::from_reading(&next.reading));
        }
        Ok(Some(self.manual.insert(next)))
    }

    /// Cut pump power, e.g. on shutdown.
    pub fn disable_dosers(&mut self) -> Result<()> {
        self.dosers.disable_all()
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("active", &self.active.is_some())
            .field("manual", &self.manual.is_some())
            .field("last_started_as_of", &self.guard.last_started_as_of())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_accepts_only_strictly_newer() {
        let mut guard = TriggerGuard::default();
        assert!(guard.try_claim(100));
        assert!(!guard.try_claim(100));
        assert!(!guard.try_claim(50));
        assert!(guard.try_claim(101));
        assert_eq!(guard.last_started_as_of(), 101);
    }

    #[test]
    fn overrides_inherit_unset_fields() {
        let base = TitrationConfig::default();
        let overrides = TitrationOverrides {
            max_reagent_dose_ml: Some(5.0),
            ..TitrationOverrides::default()
        };
        let merged = overrides.apply(&base);
        assert_eq!(merged.max_reagent_dose_ml, 5.0);
        assert_eq!(
            merged.measurement_tank_water_volume_ml,
            base.measurement_tank_water_volume_ml
        );
    }
}
