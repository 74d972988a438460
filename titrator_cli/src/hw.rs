//! Hardware assembly: turn the config into a doser set and pH reader,
//! backed by GPIO drivers or simulations.

use std::path::Path;

use eyre::WrapErr;
use titrator_config::{Config, DoserCfg};
use titrator_core::{
    CalibrationPoint, Doser, DoserConfig, DoserRole, DoserSet, PhCalibrator, PhReadConfig, PhReader,
};
use titrator_traits::{Motor, MotorPower, PhProbe};

fn doser_config(cfg: &DoserCfg) -> DoserConfig {
    DoserConfig {
        ml_per_rotation: cfg.ml_per_rotation,
        motor_rpm: cfg.motor_rpm,
        microstep: cfg.microstep,
        direction_multiplier: cfg.direction,
    }
}

#[cfg(feature = "hardware")]
fn build_motor(role: DoserRole, cfg: &DoserCfg) -> eyre::Result<Box<dyn Motor>> {
    let pins = cfg
        .pins
        .ok_or_else(|| eyre::eyre!("dosers.{role}.pins required for hardware builds"))?;
    let gpio = rppal::gpio::Gpio::new().wrap_err("opening gpio")?;
    let step = gpio
        .get(pins.step)
        .wrap_err_with(|| format!("claiming step pin {}", pins.step))?
        .into_output();
    let dir = gpio
        .get(pins.dir)
        .wrap_err_with(|| format!("claiming dir pin {}", pins.dir))?
        .into_output();
    let stepper = titrator_hardware::gpio::GpioStepper::new(
        step,
        dir,
        200,
        cfg.microstep,
        cfg.motor_rpm,
    )
    .wrap_err_with(|| format!("building {role} stepper"))?;
    Ok(Box::new(stepper))
}

#[cfg(not(feature = "hardware"))]
fn build_motor(_role: DoserRole, _cfg: &DoserCfg) -> eyre::Result<Box<dyn Motor>> {
    Ok(Box::new(titrator_hardware::SimulatedStepper::new()))
}

#[cfg(feature = "hardware")]
fn build_power(cfg: &Config) -> eyre::Result<Box<dyn MotorPower>> {
    let pin = cfg
        .dosers
        .enable_pin
        .ok_or_else(|| eyre::eyre!("dosers.enable_pin required for hardware builds"))?;
    let gpio = rppal::gpio::Gpio::new().wrap_err("opening gpio")?;
    let enable = gpio
        .get(pin)
        .wrap_err_with(|| format!("claiming enable pin {pin}"))?
        .into_output();
    Ok(Box::new(titrator_hardware::gpio::GpioPower::new(enable)))
}

#[cfg(not(feature = "hardware"))]
fn build_power(_cfg: &Config) -> eyre::Result<Box<dyn MotorPower>> {
    Ok(Box::new(titrator_hardware::SimulatedPower::new()))
}

fn build_probe(cfg: &Config) -> Box<dyn PhProbe> {
    match &cfg.ph.source_path {
        Some(path) => Box::new(titrator_hardware::SysfsPhProbe::new(path)),
        None => {
            // Descending simulation so a simulated titration converges.
            tracing::info!("no ph.source_path configured; using simulated probe");
            Box::new(titrator_hardware::SimulatedPhProbe::descending(
                8.2, 0.05, 4.3,
            ))
        }
    }
}

fn calibrator(cfg: &Config, calibration_csv: Option<&Path>) -> eyre::Result<PhCalibrator> {
    if let Some(path) = calibration_csv {
        let points = titrator_config::load_ph_calibration_csv(path)
            .wrap_err_with(|| format!("loading calibration from {}", path.display()))?;
        return Ok(PhCalibrator::new(
            CalibrationPoint {
                actual_ph: points.low_actual,
                read_ph: points.low_read,
            },
            CalibrationPoint {
                actual_ph: points.high_actual,
                read_ph: points.high_read,
            },
        ));
    }
    let cal = &cfg.ph.calibration;
    Ok(PhCalibrator::new(
        CalibrationPoint {
            actual_ph: cal.low_actual,
            read_ph: cal.low_read,
        },
        CalibrationPoint {
            actual_ph: cal.high_actual,
            read_ph: cal.high_read,
        },
    ))
}

pub struct Instrument {
    pub dosers: DoserSet,
    pub ph_reader: PhReader,
}

pub fn build_instrument(cfg: &Config, calibration_csv: Option<&Path>) -> eyre::Result<Instrument> {
    let mut dosers = DoserSet::new(build_power(cfg)?);
    for (role, doser_cfg) in [
        (DoserRole::Fill, &cfg.dosers.fill),
        (DoserRole::Drain, &cfg.dosers.drain),
        (DoserRole::Reagent, &cfg.dosers.reagent),
    ] {
        let motor = build_motor(role, doser_cfg)?;
        dosers.insert(role, Doser::new(motor, doser_config(doser_cfg)));
    }
    let ph_reader = PhReader::new(
        build_probe(cfg),
        calibrator(cfg, calibration_csv)?,
        PhReadConfig {
            read_interval_ms: cfg.ph.read_interval_ms,
            raw_window: cfg.ph.raw_window,
            calibrated_window: cfg.ph.calibrated_window,
        },
    );
    Ok(Instrument { dosers, ph_reader })
}
