//! GPIO stepper and power-line drivers (Raspberry Pi, via rppal).

use std::time::Duration;

use tracing::trace;

use titrator_traits::{Motor, MotorPower};

use crate::error::{HwError, Result};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Step/dir driver for an A4988-style stepper controller.
pub struct GpioStepper {
    step: rppal::gpio::OutputPin,
    dir: rppal::gpio::OutputPin,
    /// Full steps per shaft rotation, before microstepping.
    full_steps_per_rotation: u32,
    microstep: u32,
    rpm: u32,
}

impl GpioStepper {
    pub fn new(
        mut step_pin: rppal::gpio::OutputPin,
        dir_pin: rppal::gpio::OutputPin,
        full_steps_per_rotation: u32,
        microstep: u32,
        rpm: u32,
    ) -> Result<Self> {
        if full_steps_per_rotation == 0 || microstep == 0 || rpm == 0 {
            return Err(HwError::Gpio(
                "steps, microstep and rpm must be non-zero".into(),
            ));
        }
        step_pin.set_low(); // step idles low
        Ok(Self {
            step: step_pin,
            dir: dir_pin,
            full_steps_per_rotation,
            microstep,
            rpm,
        })
    }

    fn half_period(&self) -> Duration {
        // pulses per second at the configured speed
        let steps_per_sec =
            u64::from(self.rpm) * u64::from(self.full_steps_per_rotation) * u64::from(self.microstep)
                / 60;
        let steps_per_sec = steps_per_sec.max(1);
        Duration::from_micros(1_000_000 / steps_per_sec / 2)
    }

    fn pulse_count(&self, degrees: i32) -> u64 {
        let per_rotation = u64::from(self.full_steps_per_rotation) * u64::from(self.microstep);
        u64::from(degrees.unsigned_abs()) * per_rotation / 360
    }
}

impl Motor for GpioStepper {
    fn rotate_degrees(&mut self, degrees: i32) -> std::result::Result<(), BoxError> {
        if degrees >= 0 {
            self.dir.set_high();
        } else {
            self.dir.set_low();
        }
        let pulses = self.pulse_count(degrees);
        let half = self.half_period();
        trace!(degrees, pulses, "stepping");
        for _ in 0..pulses {
            self.step.set_high();
            std::thread::sleep(half);
            self.step.set_low();
            std::thread::sleep(half);
        }
        Ok(())
    }
}

/// Shared enable line for all stepper drivers. Active low, matching the
/// A4988's /ENABLE input.
pub struct GpioPower {
    enable: rppal::gpio::OutputPin,
}

impl GpioPower {
    pub fn new(mut enable_pin: rppal::gpio::OutputPin) -> Self {
        enable_pin.set_high(); // start disabled
        Self { enable: enable_pin }
    }
}

impl MotorPower for GpioPower {
    fn enable(&mut self) -> std::result::Result<(), BoxError> {
        self.enable.set_low();
        Ok(())
    }

    fn disable(&mut self) -> std::result::Result<(), BoxError> {
        self.enable.set_high();
        Ok(())
    }
}
