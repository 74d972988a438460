//! Timed driver for automatic measurement runs.

use crate::doser::DoserSet;
use crate::error::{Result, TitrationError};
use crate::measure::{AlkMeasurer, StepResult};
use crate::ph::PhReader;
use crate::reading::Publisher;
use crate::time::TimeKeeper;

pub const DEFAULT_STEP_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_STALL_TIMEOUT_MS: u64 = 10 * 60 * 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// The pacing interval has not elapsed yet.
    NotDue,
    /// One step was performed.
    Stepped,
    /// The run is terminal.
    Done,
}

/// Paces one in-flight run: at most one state-machine step per interval, and
/// a watchdog that aborts runs which stop making progress.
#[derive(Debug)]
pub struct MeasureLoop {
    cursor: StepResult,
    last_step_at_ms: u64,
    step_interval_ms: u64,
    stall_timeout_ms: u64,
}

impl MeasureLoop {
    pub fn new(initial: StepResult, step_interval_ms: u64, stall_timeout_ms: u64) -> Self {
        let last_step_at_ms = initial.as_of_ms;
        Self {
            cursor: initial,
            last_step_at_ms,
            step_interval_ms,
            stall_timeout_ms,
        }
    }

    pub fn cursor(&self) -> &StepResult {
        &self.cursor
    }

    pub fn into_cursor(self) -> StepResult {
        self.cursor
    }

    /// Step the run if the interval has elapsed. The stall watchdog fires
    /// when the cursor's last state change is older than the timeout, which
    /// only happens if the caller stopped ticking for a long stretch or a
    /// step silently failed to advance; power is cut before erroring.
    pub fn advance_if_due(
        &mut self,
        measurer: &AlkMeasurer,
        dosers: &mut DoserSet,
        ph_reader: &mut PhReader,
        publisher: &mut dyn Publisher,
        time: &TimeKeeper,
    ) -> Result<LoopStatus> {
        if self.cursor.is_done() {
            return Ok(LoopStatus::Done);
        }
        let now = time.now_ms();
        if now.saturating_sub(self.cursor.as_of_ms) >= self.stall_timeout_ms {
            tracing::warn!(
                stalled_for_ms = now.saturating_sub(self.cursor.as_of_ms),
                action = %self.cursor.next_action,
                "measurement stalled; aborting run"
            );
            if let Err(e) = dosers.disable_all() {
                tracing::warn!(error = %e, "failed to cut doser power after stall");
            }
            return Err(eyre::Report::new(TitrationError::Stalled(
                self.stall_timeout_ms,
            )));
        }
        if now.saturating_sub(self.last_step_at_ms) < self.step_interval_ms {
            return Ok(LoopStatus::NotDue);
        }
        let prev = self.cursor.clone();
        self.cursor = measurer.step(prev, dosers, ph_reader, publisher, time)?;
        self.last_step_at_ms = now;
        if self.cursor.is_done() {
            Ok(LoopStatus::Done)
        } else {
            Ok(LoopStatus::Stepped)
        }
    }
}
