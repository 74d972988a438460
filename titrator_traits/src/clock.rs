use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic clock abstraction for control and timing across the stack.
///
/// - now(): returns a monotonic Instant
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - ms_since(): helper to compute elapsed milliseconds from an epoch Instant
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        dur.as_millis() as u64
    }
}

/// Default, real-time monotonic clock backed by std::time::Instant.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Wall-clock seconds that may be adjusted externally (e.g. by NTP).
///
/// Readings carry both a device-uptime timestamp and this value, so they stay
/// interpretable whether or not network time was ever available.
pub trait WallClock {
    fn adjusted_secs(&self) -> u64;
}

/// Wall clock backed by the host's `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWallClock;

impl SystemWallClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl WallClock for SystemWallClock {
    fn adjusted_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Wall clock synced from an external source.
///
/// `sync(epoch_secs)` records the externally supplied time together with a
/// monotonic Instant; `adjusted_secs` advances it locally between syncs. An
/// unsynced clock reports device uptime seconds, matching a device that never
/// reached its time server.
#[derive(Debug)]
pub struct SyncedWallClock {
    origin: Instant,
    // (instant at last sync, epoch seconds supplied at last sync)
    synced: Mutex<Option<(Instant, u64)>>,
}

impl Default for SyncedWallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncedWallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            synced: Mutex::new(None),
        }
    }

    /// Record an externally supplied wall-clock time. The value may jump
    /// backwards; callers own the consequences of adjusting mid-run.
    pub fn sync(&self, epoch_secs: u64) {
        if let Ok(mut guard) = self.synced.lock() {
            *guard = Some((Instant::now(), epoch_secs));
        }
    }
}

impl WallClock for SyncedWallClock {
    fn adjusted_secs(&self) -> u64 {
        let snapshot = self.synced.lock().map(|g| *g).unwrap_or(None);
        match snapshot {
            Some((at, secs)) => secs.saturating_add(at.elapsed().as_secs()),
            None => self.origin.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
pub mod test_clock {
    use super::*;
    use std::sync::Arc;

    /// Deterministic test clock whose time can be advanced manually.
    ///
    /// now() = origin + offset
    /// sleep(d) advances internal time by d without actually sleeping.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: Instant,
        offset: Arc<Mutex<Duration>>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        /// Advance the clock by the given duration.
        pub fn advance(&self, d: Duration) {
            if let Ok(mut off) = self.offset.lock() {
                *off = off.saturating_add(d);
            }
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            let off = self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO);
            self.origin + off
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synced_wall_clock_tracks_supplied_epoch() {
        let wall = SyncedWallClock::new();
        wall.sync(1_700_000_000);
        let secs = wall.adjusted_secs();
        assert!(secs >= 1_700_000_000);
        assert!(secs < 1_700_000_010);
    }

    #[test]
    fn unsynced_wall_clock_reports_uptime() {
        let wall = SyncedWallClock::new();
        assert!(wall.adjusted_secs() < 10);
    }

    #[test]
    fn resync_replaces_previous_epoch() {
        let wall = SyncedWallClock::new();
        wall.sync(1_000);
        wall.sync(2_000);
        assert!(wall.adjusted_secs() >= 2_000);
    }
}
