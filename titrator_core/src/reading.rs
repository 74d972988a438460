//! Reading types shared across the measurement pipeline.

use crate::error::Result;

/// A single pH observation with its smoothed companions.
///
/// Raw and calibrated values are carried side by side so calibration drift
/// stays diagnosable from published data alone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhReading {
    /// Device-uptime milliseconds at the time of the read.
    pub as_of_ms: u64,
    pub raw_ph: f32,
    pub raw_ph_mavg: f32,
    pub calibrated_ph: f32,
    pub calibrated_ph_mavg: f32,
}

/// The reportable output of an alkalinity measurement run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlkReading {
    pub title: String,
    /// Device-uptime milliseconds of the last update.
    pub as_of_ms: u64,
    /// Adjusted wall-clock seconds of the last update.
    pub as_of_adjusted_sec: u64,
    /// Total tank water dispensed into the measurement vessel, in ml.
    pub tank_water_volume_ml: f32,
    /// Total reagent dispensed, in ml.
    pub reagent_volume_ml: f32,
    pub dkh: f32,
    /// Most recent smoothed pH observed during the run.
    pub ph: PhReading,
}

/// Sink for readings leaving the engine (MQTT bridge, CLI printer, test
/// recorder). Publish failures propagate; the engine treats them like any
/// other step failure.
pub trait Publisher {
    fn publish_ph(&mut self, reading: &PhReading) -> Result<()>;
    fn publish_alk_reading(&mut self, reading: &AlkReading) -> Result<()>;
}

/// Round to two decimal places, the precision dKH is reported at.
pub fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_keeps_two_decimals() {
        assert_eq!(round2(4.3399), 4.34);
        assert_eq!(round2(4.331), 4.33);
        assert_eq!(round2(0.0), 0.0);
    }
}
