//! Shared mock hardware for unit and integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use titrator_traits::clock::{Clock, WallClock};
use titrator_traits::{Motor, MotorPower, PhProbe};

use crate::error::Result;
use crate::reading::{AlkReading, PhReading, Publisher};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Records every rotation request.
pub struct MockMotor {
    log: Arc<Mutex<Vec<i32>>>,
    fail_with: Option<String>,
}

impl MockMotor {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
        }
    }

    /// A motor whose every rotation fails with the given message.
    pub fn failing(message: &str) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            fail_with: Some(message.to_string()),
        }
    }

    /// Shared handle to the rotation log.
    pub fn handle(&self) -> Arc<Mutex<Vec<i32>>> {
        Arc::clone(&self.log)
    }
}

impl Default for MockMotor {
    fn default() -> Self {
        Self::new()
    }
}

impl Motor for MockMotor {
    fn rotate_degrees(&mut self, degrees: i32) -> std::result::Result<(), BoxError> {
        if let Some(msg) = &self.fail_with {
            return Err(msg.clone().into());
        }
        if let Ok(mut log) = self.log.lock() {
            log.push(degrees);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Enabled,
    Disabled,
}

/// Records enable/disable transitions on the shared power line.
pub struct MockPower {
    events: Arc<Mutex<Vec<PowerEvent>>>,
}

impl MockPower {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<PowerEvent>>> {
        Arc::clone(&self.events)
    }
}

impl Default for MockPower {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorPower for MockPower {
    fn enable(&mut self) -> std::result::Result<(), BoxError> {
        if let Ok(mut ev) = self.events.lock() {
            ev.push(PowerEvent::Enabled);
        }
        Ok(())
    }

    fn disable(&mut self) -> std::result::Result<(), BoxError> {
        if let Ok(mut ev) = self.events.lock() {
            ev.push(PowerEvent::Disabled);
        }
        Ok(())
    }
}

/// Returns scripted values in order, then repeats the last one.
pub struct ScriptedProbe {
    values: VecDeque<f32>,
    last: f32,
}

impl ScriptedProbe {
    pub fn new(values: impl IntoIterator<Item = f32>) -> Self {
        let values: VecDeque<f32> = values.into_iter().collect();
        let last = values.back().copied().unwrap_or(7.0);
        Self { values, last }
    }
}

impl PhProbe for ScriptedProbe {
    fn read_raw(&mut self) -> std::result::Result<f32, BoxError> {
        if let Some(v) = self.values.pop_front() {
            self.last = v;
        }
        Ok(self.last)
    }
}

/// Captures everything published, behind shared handles so tests keep access
/// after the publisher is boxed away.
pub struct RecordingPublisher {
    ph: Arc<Mutex<Vec<PhReading>>>,
    alk: Arc<Mutex<Vec<AlkReading>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            ph: Arc::new(Mutex::new(Vec::new())),
            alk: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn ph_handle(&self) -> Arc<Mutex<Vec<PhReading>>> {
        Arc::clone(&self.ph)
    }

    pub fn alk_handle(&self) -> Arc<Mutex<Vec<AlkReading>>> {
        Arc::clone(&self.alk)
    }
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for RecordingPublisher {
    fn publish_ph(&mut self, reading: &PhReading) -> Result<()> {
        if let Ok(mut v) = self.ph.lock() {
            v.push(*reading);
        }
        Ok(())
    }

    fn publish_alk_reading(&mut self, reading: &AlkReading) -> Result<()> {
        if let Ok(mut v) = self.alk.lock() {
            v.push(reading.clone());
        }
        Ok(())
    }
}

/// Manually advanced clock implementing both timelines, so tests control
/// uptime milliseconds and adjusted seconds from one knob.
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
    wall_base_secs: u64,
}

impl ManualClock {
    pub fn new(wall_base_secs: u64) -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
            wall_base_secs,
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }

    fn sleep(&self, d: Duration) {
        self.advance_ms(d.as_millis() as u64);
    }
}

impl WallClock for ManualClock {
    fn adjusted_secs(&self) -> u64 {
        self.wall_base_secs + self.offset_ms.load(Ordering::SeqCst) / 1_000
    }
}
