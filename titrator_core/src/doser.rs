//! Pump roles, volume-to-rotation calibration, and the doser set.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use eyre::WrapErr;
use titrator_traits::{Motor, MotorPower};

use crate::error::{Result, TitrationError, map_hw_error};

const FULL_ROTATION_DEGREES: f64 = 360.0;

/// Converts requested volumes into motor rotation, based on the measured
/// output of one full rotation of the pump head.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibrator {
    ml_per_rotation: f64,
}

impl Calibrator {
    pub fn new(ml_per_rotation: f32) -> Self {
        Self {
            ml_per_rotation: f64::from(ml_per_rotation),
        }
    }

    pub fn ml_per_rotation(&self) -> f64 {
        self.ml_per_rotation
    }

    /// Degrees of rotation needed to move `ml`. Sign is preserved so
    /// negative volumes reverse the pump.
    pub fn degrees_for_ml(&self, ml: f32) -> i32 {
        if self.ml_per_rotation <= 0.0 {
            return 0;
        }
        (f64::from(ml) / self.ml_per_rotation * FULL_ROTATION_DEGREES).round() as i32
    }
}

/// Per-pump tuning carried alongside the motor handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoserConfig {
    pub ml_per_rotation: f32,
    pub motor_rpm: u32,
    pub microstep: u32,
    /// +1 or -1, flips the meaning of "forward" for pumps plumbed backwards.
    pub direction_multiplier: i32,
}

impl Default for DoserConfig {
    fn default() -> Self {
        Self {
            ml_per_rotation: 0.28,
            motor_rpm: 60,
            microstep: 16,
            direction_multiplier: 1,
        }
    }
}

/// The three plumbing roles a titrator needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoserRole {
    /// Moves tank water into the measurement vessel.
    Fill,
    /// Empties the measurement vessel to waste.
    Drain,
    /// Doses the acid reagent.
    Reagent,
}

impl DoserRole {
    pub const ALL: [DoserRole; 3] = [DoserRole::Fill, DoserRole::Drain, DoserRole::Reagent];

    pub fn as_str(&self) -> &'static str {
        match self {
            DoserRole::Fill => "fill",
            DoserRole::Drain => "drain",
            DoserRole::Reagent => "reagent",
        }
    }
}

impl fmt::Display for DoserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DoserRole {
    type Err = TitrationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fill" => Ok(DoserRole::Fill),
            "drain" => Ok(DoserRole::Drain),
            "reagent" => Ok(DoserRole::Reagent),
            other => Err(TitrationError::UnknownDoserRole(other.to_string())),
        }
    }
}

/// One pump: a motor handle plus its calibration.
pub struct Doser {
    motor: Box<dyn Motor>,
    calibrator: Calibrator,
    config: DoserConfig,
}

impl Doser {
    pub fn new(motor: Box<dyn Motor>, config: DoserConfig) -> Self {
        Self {
            motor,
            calibrator: Calibrator::new(config.ml_per_rotation),
            config,
        }
    }

    pub fn config(&self) -> &DoserConfig {
        &self.config
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    /// Update the volume calibration in place, e.g. after re-measuring the
    /// pump's output.
    pub fn set_ml_per_rotation(&mut self, ml_per_rotation: f32) {
        self.config.ml_per_rotation = ml_per_rotation;
        self.calibrator = Calibrator::new(ml_per_rotation);
    }

    /// Move `ml` through the pump. Negative values reverse.
    pub fn dispense_ml(&mut self, ml: f32) -> Result<()> {
        let degrees = self.calibrator.degrees_for_ml(ml) * self.config.direction_multiplier;
        tracing::debug!(ml, degrees, "dispensing");
        self.rotate_degrees(degrees)
    }

    /// Raw rotation, exposed for calibration workflows.
    pub fn rotate_degrees(&mut self, degrees: i32) -> Result<()> {
        self.motor
            .rotate_degrees(degrees)
            .map_err(|e| eyre::Report::new(map_hw_error(e)))
            .wrap_err("rotating doser motor")
    }
}

impl fmt::Debug for Doser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Doser")
            .field("calibrator", &self.calibrator)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// All pumps plus the shared motor-power enable line.
pub struct DoserSet {
    dosers: HashMap<DoserRole, Doser>,
    power: Box<dyn MotorPower>,
}

impl DoserSet {
    pub fn new(power: Box<dyn MotorPower>) -> Self {
        Self {
            dosers: HashMap::new(),
            power,
        }
    }

    pub fn insert(&mut self, role: DoserRole, doser: Doser) {
        self.dosers.insert(role, doser);
    }

    pub fn contains(&self, role: DoserRole) -> bool {
        self.dosers.contains_key(&role)
    }

    /// Look up the pump for a role. A missing mapping is a configuration
    /// fault, not something to paper over with a default pump.
    pub fn select(&mut self, role: DoserRole) -> Result<&mut Doser> {
        match self.dosers.get_mut(&role) {
            Some(d) => Ok(d),
            None => {
                tracing::warn!(%role, "no doser registered for role");
                Err(eyre::Report::new(TitrationError::UnknownDoserRole(
                    role.as_str().to_string(),
                )))
            }
        }
    }

    pub fn enable_all(&mut self) -> Result<()> {
        self.power
            .enable()
            .map_err(|e| eyre::Report::new(map_hw_error(e)))
            .wrap_err("enabling doser power")
    }

    pub fn disable_all(&mut self) -> Result<()> {
        self.power
            .disable()
            .map_err(|e| eyre::Report::new(map_hw_error(e)))
            .wrap_err("disabling doser power")
    }
}

impl fmt::Debug for DoserSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DoserSet")
            .field("roles", &self.dosers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
