//! pH acquisition: two-point calibration and rate-limited probe reads.

use eyre::WrapErr;
use titrator_traits::PhProbe;

use crate::error::{Result, map_hw_error};
use crate::reading::PhReading;
use crate::stats::PhStats;

/// One calibration anchor: what the probe read vs. what a reference
/// solution actually was.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    pub actual_ph: f32,
    pub read_ph: f32,
}

/// Two-point linear calibration mapping raw probe values onto true pH.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhCalibrator {
    low: CalibrationPoint,
    high: CalibrationPoint,
}

impl PhCalibrator {
    pub fn new(low: CalibrationPoint, high: CalibrationPoint) -> Self {
        Self { low, high }
    }

    /// Identity calibration: raw values pass through unchanged.
    pub fn identity() -> Self {
        Self::new(
            CalibrationPoint {
                actual_ph: 4.0,
                read_ph: 4.0,
            },
            CalibrationPoint {
                actual_ph: 7.0,
                read_ph: 7.0,
            },
        )
    }

    pub fn convert(&self, raw: f32) -> f32 {
        let span = self.high.read_ph - self.low.read_ph;
        if span.abs() < f32::EPSILON {
            // Degenerate anchors; pass through rather than divide by zero.
            return raw;
        }
        self.low.actual_ph
            + (self.high.actual_ph - self.low.actual_ph) * (raw - self.low.read_ph) / span
    }
}

/// Tuning for the probe read path.
#[derive(Debug, Clone)]
pub struct PhReadConfig {
    /// Minimum spacing between background probe reads, in ms.
    pub read_interval_ms: u64,
    /// Window size for the ambient raw-pH moving average.
    pub raw_window: usize,
    /// Window size for the ambient calibrated-pH moving average.
    pub calibrated_window: usize,
}

impl Default for PhReadConfig {
    fn default() -> Self {
        Self {
            read_interval_ms: 1_000,
            raw_window: 30,
            calibrated_window: 30,
        }
    }
}

/// Owns the probe and enforces the read cadence.
pub struct PhReader {
    probe: Box<dyn PhProbe>,
    calibrator: PhCalibrator,
    conf: PhReadConfig,
    next_read_at_ms: u64,
}

impl PhReader {
    pub fn new(probe: Box<dyn PhProbe>, calibrator: PhCalibrator, conf: PhReadConfig) -> Self {
        Self {
            probe,
            calibrator,
            conf,
            next_read_at_ms: 0,
        }
    }

    pub fn read_config(&self) -> &PhReadConfig {
        &self.conf
    }

    pub fn calibrator(&self) -> &PhCalibrator {
        &self.calibrator
    }

    /// Replace the calibration anchors, e.g. after a recalibration command.
    pub fn set_calibrator(&mut self, calibrator: PhCalibrator) {
        self.calibrator = calibrator;
    }

    /// Read the probe immediately, ignoring the cadence. Used by the
    /// measurement loop, which paces itself.
    pub fn read_now(&mut self, now_ms: u64) -> Result<PhReading> {
        let raw = self
            .probe
            .read_raw()
            .map_err(|e| eyre::Report::new(map_hw_error(e)))
            .wrap_err("reading pH probe")?;
        let calibrated = self.calibrator.convert(raw);
        Ok(PhReading {
            as_of_ms: now_ms,
            raw_ph: raw,
            raw_ph_mavg: raw,
            calibrated_ph: calibrated,
            calibrated_ph_mavg: calibrated,
        })
    }

    /// Rate-limited read feeding the ambient statistics. Returns `Ok(None)`
    /// when the cadence says it is not yet time.
    pub fn read_if_due(&mut self, now_ms: u64, stats: &mut PhStats) -> Result<Option<PhReading>> {
        if now_ms < self.next_read_at_ms {
            return Ok(None);
        }
        self.next_read_at_ms = now_ms + self.conf.read_interval_ms;
        let sample = self.read_now(now_ms)?;
        let smoothed = stats.add(sample.as_of_ms, sample.raw_ph, sample.calibrated_ph);
        tracing::debug!(
            raw = smoothed.raw_ph,
            calibrated = smoothed.calibrated_ph,
            calibrated_mavg = smoothed.calibrated_ph_mavg,
            "ambient pH sample"
        );
        Ok(Some(smoothed))
    }
}

impl std::fmt::Debug for PhReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhReader")
            .field("calibrator", &self.calibrator)
            .field("conf", &self.conf)
            .field("next_read_at_ms", &self.next_read_at_ms)
            .finish_non_exhaustive()
    }
}
