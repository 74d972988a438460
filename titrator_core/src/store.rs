//! Compact persisted history of completed measurements.
//!
//! Records are deliberately tiny (4-byte timestamp, 1-byte dKH, short title)
//! and live in a fixed-capacity ring so the serialized snapshot stays a
//! bounded, single contiguous write regardless of instrument uptime.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TitrationError};
use crate::fixed;
use crate::reading::AlkReading;

pub const DEFAULT_READINGS_TO_KEEP: usize = 80;
pub const MAX_TITLE_LEN: usize = 10;

/// Trim and bound a run title for persistence.
pub fn normalize_title(title: &str) -> String {
    title.trim().chars().take(MAX_TITLE_LEN).collect()
}

/// One stored measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedReading {
    /// Adjusted wall-clock seconds, truncated to u32.
    pub as_of_adjusted_sec: u32,
    dkh_byte: u8,
    pub title: String,
}

impl PersistedReading {
    pub fn new(as_of_adjusted_sec: u32, dkh: f32, title: &str) -> Self {
        Self {
            as_of_adjusted_sec,
            dkh_byte: fixed::encode_dkh(dkh),
            title: normalize_title(title),
        }
    }

    pub fn from_reading(reading: &AlkReading) -> Self {
        Self::new(
            reading.as_of_adjusted_sec as u32,
            reading.dkh,
            &reading.title,
        )
    }

    pub fn dkh(&self) -> f32 {
        fixed::decode_dkh(self.dkh_byte)
    }

    /// Ring slots start zeroed; a zero dKH marks a slot never written.
    pub fn is_occupied(&self) -> bool {
        self.dkh_byte != 0
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    tip: u32,
    readings: Vec<PersistedReading>,
}

/// Fixed-capacity ring of recent measurements.
#[derive(Debug, Clone)]
pub struct ReadingStore {
    readings: Vec<PersistedReading>,
    tip: usize,
    capacity: usize,
}

impl ReadingStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: vec![PersistedReading::default(); capacity],
            tip: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Next slot to be overwritten.
    pub fn tip(&self) -> usize {
        self.tip
    }

    pub fn add(&mut self, reading: PersistedReading) {
        self.readings[self.tip] = reading;
        self.tip = (self.tip + 1) % self.capacity;
    }

    /// All slots, occupied or not, in ring order.
    pub fn slots(&self) -> &[PersistedReading] {
        &self.readings
    }

    /// Occupied readings, newest first.
    pub fn sorted_by_as_of(&self) -> Vec<&PersistedReading> {
        let mut occupied: Vec<&PersistedReading> =
            self.readings.iter().filter(|r| r.is_occupied()).collect();
        occupied.sort_by(|a, b| b.as_of_adjusted_sec.cmp(&a.as_of_adjusted_sec));
        occupied
    }

    /// Distinct non-empty titles seen in the ring.
    pub fn recent_titles(&self) -> BTreeSet<String> {
        self.readings
            .iter()
            .filter(|r| r.is_occupied())
            .map(|r| r.title.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Serialize the whole ring as one contiguous record.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let snapshot = Snapshot {
            tip: self.tip as u32,
            readings: self.readings.clone(),
        };
        postcard::to_stdvec(&snapshot)
            .map_err(|e| eyre::Report::new(TitrationError::Storage(e.to_string())))
    }

    /// Restore a ring, reshaping to `capacity` if the snapshot differs.
    pub fn decode(bytes: &[u8], capacity: usize) -> Result<Self> {
        let snapshot: Snapshot = postcard::from_bytes(bytes)
            .map_err(|e| eyre::Report::new(TitrationError::Storage(e.to_string())))?;
        let capacity = capacity.max(1);
        let mut store = Self::new(capacity);
        if snapshot.readings.len() == capacity {
            store.readings = snapshot.readings;
            store.tip = snapshot.tip as usize % capacity;
        } else {
            // Capacity changed between firmware versions; replay oldest to
            // newest so the freshest readings survive the reshape.
            let len = snapshot.readings.len();
            if len > 0 {
                let start = snapshot.tip as usize % len;
                for i in 0..len {
                    let r = &snapshot.readings[(start + i) % len];
                    if r.is_occupied() {
                        store.add(r.clone());
                    }
                }
            }
        }
        Ok(store)
    }
}

impl Default for ReadingStore {
    fn default() -> Self {
        Self::new(DEFAULT_READINGS_TO_KEEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(sec: u32, dkh: f32, title: &str) -> PersistedReading {
        PersistedReading::new(sec, dkh, title)
    }

    #[test]
    fn ring_overwrites_oldest() {
        let mut store = ReadingStore::new(2);
        store.add(reading(100, 8.0, "a"));
        store.add(reading(200, 8.1, "b"));
        store.add(reading(300, 8.2, "c"));
        let sorted = store.sorted_by_as_of();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].as_of_adjusted_sec, 300);
        assert_eq!(sorted[1].as_of_adjusted_sec, 200);
    }

    #[test]
    fn titles_are_trimmed_and_bounded() {
        let r = reading(1, 8.0, "  weekly check run  ");
        assert_eq!(r.title, "weekly che");
        assert_eq!(r.title.len(), MAX_TITLE_LEN);
    }

    #[test]
    fn recent_titles_deduplicates() {
        let mut store = ReadingStore::new(4);
        store.add(reading(1, 8.0, "morning"));
        store.add(reading(2, 8.1, "morning"));
        store.add(reading(3, 8.2, "evening"));
        let titles = store.recent_titles();
        assert_eq!(titles.len(), 2);
        assert!(titles.contains("morning"));
        assert!(titles.contains("evening"));
    }

    #[test]
    fn snapshot_round_trips() {
        let mut store = ReadingStore::new(3);
        store.add(reading(100, 7.9, "t1"));
        store.add(reading(200, 8.3, "t2"));
        let bytes = store.encode().unwrap();
        let restored = ReadingStore::decode(&bytes, 3).unwrap();
        assert_eq!(restored.tip(), store.tip());
        assert_eq!(restored.slots(), store.slots());
    }

    #[test]
    fn decode_reshapes_to_smaller_capacity() {
        let mut store = ReadingStore::new(4);
        for i in 1..=4u32 {
            store.add(reading(i * 100, 8.0, "t"));
        }
        let bytes = store.encode().unwrap();
        let restored = ReadingStore::decode(&bytes, 2).unwrap();
        let sorted = restored.sorted_by_as_of();
        assert_eq!(sorted.len(), 2);
        // the two newest survive
        assert_eq!(sorted[0].as_of_adjusted_sec, 400);
        assert_eq!(sorted[1].as_of_adjusted_sec, 300);
    }

    #[test]
    fn unoccupied_slots_hidden_from_sorted_view() {
        let mut store = ReadingStore::new(8);
        store.add(reading(50, 8.0, "only"));
        assert_eq!(store.sorted_by_as_of().len(), 1);
    }
}
