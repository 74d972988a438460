pub mod clock;

pub use clock::{Clock, MonotonicClock, SyncedWallClock, SystemWallClock, WallClock};

/// A stepper-driven peristaltic pump head.
///
/// `rotate_degrees` is intentionally blocking: the physical actuation must
/// complete before the caller's next decision is sound. Implementations are
/// expected to bound a single call to one small-volume actuation.
pub trait Motor {
    /// Rotate by the given number of degrees. Negative values reverse the
    /// flow direction.
    fn rotate_degrees(
        &mut self,
        degrees: i32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// The shared enable line powering all pump motors.
pub trait MotorPower {
    fn enable(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn disable(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// A pH probe front-end returning the uncalibrated signal as a pH value.
pub trait PhProbe {
    fn read_raw(&mut self) -> Result<f32, Box<dyn std::error::Error + Send + Sync>>;
}
