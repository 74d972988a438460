//! Fixed-point moving averages over pH samples.
//!
//! Samples are quantized to an i32 at 1/10_000 pH resolution before
//! averaging. Integer accumulation keeps the window sum exact, so long runs
//! cannot drift the way repeated f32 addition would.

use std::collections::VecDeque;

use crate::reading::PhReading;

/// Quantization scale: one unit is 0.0001 pH.
pub const PH_SCALE: f32 = 10_000.0;

pub fn ph_to_scaled(ph: f32) -> i32 {
    if !ph.is_finite() {
        return 0;
    }
    (ph * PH_SCALE).round() as i32
}

pub fn scaled_to_ph(scaled: i32) -> f32 {
    scaled as f32 / PH_SCALE
}

fn div_round_nearest(sum: i64, n: i64) -> i64 {
    if sum >= 0 {
        (sum + n / 2) / n
    } else {
        (sum - n / 2) / n
    }
}

/// Moving average over a runtime-sized window of scaled samples.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    buf: VecDeque<i32>,
    window: usize,
    sum: i64,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            buf: VecDeque::with_capacity(window),
            window,
            sum: 0,
        }
    }

    /// Push a sample and return the current average, rounded to nearest.
    pub fn add(&mut self, sample: i32) -> i32 {
        if self.buf.len() == self.window {
            if let Some(evicted) = self.buf.pop_front() {
                self.sum -= i64::from(evicted);
            }
        }
        self.buf.push_back(sample);
        self.sum += i64::from(sample);
        div_round_nearest(self.sum, self.buf.len() as i64) as i32
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// True once the window is fully populated.
    pub fn warmed_up(&self) -> bool {
        self.buf.len() >= self.window
    }
}

/// Paired raw/calibrated averages plus the most recent composite reading.
#[derive(Debug, Clone)]
pub struct PhStats {
    raw: MovingAverage,
    calibrated: MovingAverage,
    most_recent: PhReading,
    count: u64,
}

impl PhStats {
    pub fn new(raw_window: usize, calibrated_window: usize) -> Self {
        Self {
            raw: MovingAverage::new(raw_window),
            calibrated: MovingAverage::new(calibrated_window),
            most_recent: PhReading::default(),
            count: 0,
        }
    }

    /// Fold in one observation and return it with smoothed fields filled.
    pub fn add(&mut self, as_of_ms: u64, raw_ph: f32, calibrated_ph: f32) -> PhReading {
        let raw_avg = self.raw.add(ph_to_scaled(raw_ph));
        let cal_avg = self.calibrated.add(ph_to_scaled(calibrated_ph));
        self.count = self.count.saturating_add(1);
        let reading = PhReading {
            as_of_ms,
            raw_ph,
            raw_ph_mavg: scaled_to_ph(raw_avg),
            calibrated_ph,
            calibrated_ph_mavg: scaled_to_ph(cal_avg),
        };
        self.most_recent = reading;
        reading
    }

    pub fn most_recent(&self) -> &PhReading {
        &self.most_recent
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// The calibrated average is only trustworthy once its window is full.
    pub fn warmed_up(&self) -> bool {
        self.calibrated.warmed_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn average_over_partial_window() {
        let mut avg = MovingAverage::new(4);
        assert_eq!(avg.add(10), 10);
        assert_eq!(avg.add(20), 15);
        assert!(!avg.warmed_up());
    }

    #[test]
    fn oldest_sample_evicted_at_capacity() {
        let mut avg = MovingAverage::new(2);
        avg.add(10);
        avg.add(20);
        // 10 falls out of the window
        assert_eq!(avg.add(40), 30);
        assert_eq!(avg.len(), 2);
    }

    #[test]
    fn zero_window_clamps_to_one() {
        let mut avg = MovingAverage::new(0);
        assert_eq!(avg.window(), 1);
        assert_eq!(avg.add(7), 7);
        assert_eq!(avg.add(9), 9);
    }

    #[rstest]
    #[case(7.0, 70_000)]
    #[case(4.55, 45_500)]
    #[case(-1.0, -10_000)]
    fn quantization_round_trips(#[case] ph: f32, #[case] scaled: i32) {
        assert_eq!(ph_to_scaled(ph), scaled);
        assert!((scaled_to_ph(scaled) - ph).abs() < 1e-4);
    }

    #[test]
    fn non_finite_samples_quantize_to_zero() {
        assert_eq!(ph_to_scaled(f32::NAN), 0);
        assert_eq!(ph_to_scaled(f32::INFINITY), 0);
    }

    #[test]
    fn stats_warm_up_tracks_calibrated_window() {
        let mut stats = PhStats::new(2, 3);
        stats.add(0, 7.0, 7.1);
        stats.add(1, 7.0, 7.1);
        assert!(!stats.warmed_up());
        let r = stats.add(2, 7.0, 7.1);
        assert!(stats.warmed_up());
        assert_eq!(stats.count(), 3);
        assert!((r.calibrated_ph_mavg - 7.1).abs() < 1e-3);
    }
}
