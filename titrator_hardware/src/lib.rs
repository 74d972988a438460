#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Hardware backends for the titrator: simulated devices for development and
//! tests, and GPIO stepper drivers behind the `hardware` feature.

pub mod error;
#[cfg(feature = "hardware")]
pub mod gpio;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use titrator_traits::{Motor, MotorPower, PhProbe};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Simulated stepper: records cumulative rotation, moves nothing.
pub struct SimulatedStepper {
    total_degrees: Arc<AtomicI64>,
}

impl SimulatedStepper {
    pub fn new() -> Self {
        Self {
            total_degrees: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Shared view of the cumulative rotation, for assertions and status
    /// displays.
    pub fn total_degrees_handle(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.total_degrees)
    }
}

impl Default for SimulatedStepper {
    fn default() -> Self {
        Self::new()
    }
}

impl Motor for SimulatedStepper {
    fn rotate_degrees(&mut self, degrees: i32) -> Result<(), BoxError> {
        let total = self
            .total_degrees
            .fetch_add(i64::from(degrees), Ordering::SeqCst)
            + i64::from(degrees);
        tracing::debug!(degrees, total, "rotating (simulated)");
        Ok(())
    }
}

/// Simulated motor-power line.
pub struct SimulatedPower {
    enabled: Arc<AtomicBool>,
}

impl SimulatedPower {
    pub fn new() -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn enabled_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.enabled)
    }
}

impl Default for SimulatedPower {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorPower for SimulatedPower {
    fn enable(&mut self) -> Result<(), BoxError> {
        self.enabled.store(true, Ordering::SeqCst);
        tracing::debug!("doser power enabled (simulated)");
        Ok(())
    }

    fn disable(&mut self) -> Result<(), BoxError> {
        self.enabled.store(false, Ordering::SeqCst);
        tracing::debug!("doser power disabled (simulated)");
        Ok(())
    }
}

/// Simulated probe whose reading descends toward a floor on every read,
/// which makes a simulated titration converge like a real one.
pub struct SimulatedPhProbe {
    current: f32,
    step: f32,
    floor: f32,
}

impl SimulatedPhProbe {
    pub fn descending(start: f32, step: f32, floor: f32) -> Self {
        Self {
            current: start,
            step,
            floor,
        }
    }

    pub fn constant(value: f32) -> Self {
        Self {
            current: value,
            step: 0.0,
            floor: value,
        }
    }
}

impl PhProbe for SimulatedPhProbe {
    fn read_raw(&mut self) -> Result<f32, BoxError> {
        let value = self.current;
        self.current = (self.current - self.step).max(self.floor);
        tracing::debug!(value, "pH read (simulated)");
        Ok(value)
    }
}

/// Probe backed by a sysfs/iio voltage file, as exposed by ADC boards on
/// Linux SBCs. The file's value is reported as the raw pH; the two-point
/// calibration upstream maps it onto real pH, so the scale of the underlying
/// ADC does not matter here.
pub struct SysfsPhProbe {
    path: std::path::PathBuf,
}

impl SysfsPhProbe {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PhProbe for SysfsPhProbe {
    fn read_raw(&mut self) -> Result<f32, BoxError> {
        let text = std::fs::read_to_string(&self.path).map_err(error::HwError::Io)?;
        let value: f32 = text
            .trim()
            .parse()
            .map_err(|e| error::HwError::Adc(format!("unparsable reading {text:?}: {e}")))?;
        Ok(value)
    }
}
