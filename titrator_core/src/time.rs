//! Dual-clock timekeeping: monotonic device-uptime ms for control decisions,
//! adjusted wall-clock seconds for durable timestamps.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use titrator_traits::clock::{Clock, MonotonicClock, SystemWallClock, WallClock};

#[derive(Clone)]
pub struct TimeKeeper {
    clock: Arc<dyn Clock + Send + Sync>,
    wall: Arc<dyn WallClock + Send + Sync>,
    epoch: Instant,
}

impl TimeKeeper {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>, wall: Arc<dyn WallClock + Send + Sync>) -> Self {
        let epoch = clock.now();
        Self { clock, wall, epoch }
    }

    /// Real clocks for production use.
    pub fn system() -> Self {
        Self::new(Arc::new(MonotonicClock::new()), Arc::new(SystemWallClock::new()))
    }

    /// Device-uptime milliseconds. Monotonic, unaffected by wall-clock sync.
    pub fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    /// Adjusted wall-clock seconds, or uptime seconds if never synced.
    pub fn adjusted_secs(&self) -> u64 {
        self.wall.adjusted_secs()
    }

    pub fn sleep(&self, d: Duration) {
        self.clock.sleep(d);
    }
}

impl fmt::Debug for TimeKeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeKeeper")
            .field("now_ms", &self.now_ms())
            .field("adjusted_secs", &self.adjusted_secs())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ManualClock;

    #[test]
    fn manual_clock_drives_both_timelines() {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let time = TimeKeeper::new(clock.clone(), clock.clone());
        assert_eq!(time.now_ms(), 0);
        assert_eq!(time.adjusted_secs(), 1_700_000_000);
        clock.advance_ms(2_500);
        assert_eq!(time.now_ms(), 2_500);
        assert_eq!(time.adjusted_secs(), 1_700_000_002);
    }
}
