#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core titration logic (hardware-agnostic).
//!
//! This crate provides the hardware-independent alkalinity measurement
//! engine. All hardware interactions go through `titrator_traits::Motor`,
//! `titrator_traits::MotorPower` and `titrator_traits::PhProbe`.
//!
//! ## Architecture
//!
//! - **State machine**: one-discrete-step-per-call measurement runs
//!   (`measure` module)
//! - **pH pipeline**: two-point calibration, rate-limited reads, fixed-point
//!   moving averages (`ph`, `stats`)
//! - **Dosing**: role-keyed pumps with volume-to-rotation calibration
//!   (`doser`)
//! - **Orchestration**: triggers, pacing, stall watchdog (`controller`,
//!   `looper`)
//! - **Persistence**: compact ring of past readings (`store`, `fixed`)
//!
//! ## Fixed-Point Arithmetic
//!
//! pH averaging operates on `i32` values at 1/10_000 pH resolution for
//! deterministic behavior; see `stats::ph_to_scaled`.

pub mod controller;
pub mod doser;
pub mod error;
pub mod fixed;
pub mod looper;
pub mod measure;
pub mod mocks;
pub mod ph;
pub mod reading;
pub mod stats;
pub mod store;
pub mod time;

pub use controller::{Controller, TitrationOverrides, TriggerGuard, TriggerRequest};
pub use doser::{Calibrator, Doser, DoserConfig, DoserRole, DoserSet};
pub use error::{BuildError, Result, TitrationError};
pub use looper::{LoopStatus, MeasureLoop};
pub use measure::{
    AlkMeasurer, MeasurementAction, MeasurementStepAction, StepResult, TitrationConfig,
};
pub use ph::{CalibrationPoint, PhCalibrator, PhReadConfig, PhReader};
pub use reading::{AlkReading, PhReading, Publisher};
pub use stats::{MovingAverage, PhStats};
pub use store::{PersistedReading, ReadingStore};
pub use time::TimeKeeper;
