//! Capability traits for the two instruments a caustic scan needs.
//!
//! Measurement code is written against these traits, never against a concrete
//! driver, so the same orchestrator runs on the bench, against the simulated
//! devices in `hardware::sim`, or against a remote profiler behind an RPC
//! boundary.
//!
//! - `BeamProfiler`: one D4σ diameter per axis per call
//! - `LinearStage`: absolute pulse moves, homing, range-finding, and the
//!   position-reliability state
//!
//! All calls block. Completion signalling inside a driver (event queues,
//! polling) stays inside the driver.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::domain::{AxisPair, PulseCalibration, TravelRange};
use crate::error::{AppError, AppResult};
use crate::hardware::PositionState;

/// Capability: beam-width readout.
pub trait BeamProfiler {
    /// Take one reading of the D4σ diameter on both axes, in µm.
    fn read_single(&mut self) -> AppResult<AxisPair<f64>>;

    /// Block until the profiler delivers fresh data.
    fn wait_stable(&mut self) -> AppResult<()> {
        Ok(())
    }

    /// Release the device. Called once at the end of a session.
    fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// Back-off schedule for waiting on a busy stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdlePolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Exceeding this is a hardware fault, not a retryable condition.
    pub timeout: Duration,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(300),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Capability: single-axis motion in controller pulses.
///
/// # Contract
/// - `move_to` rejects targets outside `travel_range()` with
///   `AppError::PositionOutOfBounds`; it never clamps
/// - `move_to` may return before motion completes; use `wait_idle`
/// - `position` fails with `AppError::PositionDirty` while `state()` is not reliable
pub trait LinearStage {
    fn move_to(&mut self, position: i64) -> AppResult<()>;

    fn is_busy(&mut self) -> AppResult<bool>;

    /// Drive to the origin switch and zero the position counter.
    fn home(&mut self) -> AppResult<()>;

    /// Run into both end stops, store the limits, and recalibrate pulses per µm.
    fn find_travel_range(&mut self) -> AppResult<TravelRange>;

    /// Start free-running motion until `stop`.
    fn jog(&mut self, positive: bool) -> AppResult<()>;

    /// Re-read the position counter from the controller.
    fn sync_position(&mut self) -> AppResult<i64>;

    /// Decelerate and stop any motion.
    fn stop(&mut self) -> AppResult<()>;

    fn position(&self) -> AppResult<i64>;

    fn travel_range(&self) -> TravelRange;

    fn calibration(&self) -> PulseCalibration;

    fn state(&self) -> PositionState;

    fn close(&mut self) -> AppResult<()> {
        Ok(())
    }

    /// Busy-poll `is_busy` with a growing delay until the stage is idle.
    fn wait_idle(&mut self, policy: &IdlePolicy) -> AppResult<()> {
        let start = Instant::now();
        let mut delay = policy.initial_delay;
        loop {
            if !self.is_busy()? {
                return Ok(());
            }
            let elapsed = start.elapsed();
            if elapsed >= policy.timeout {
                return Err(AppError::StageTimeout(policy.timeout));
            }
            debug!(?delay, "stage busy");
            std::thread::sleep(delay.min(policy.timeout - elapsed));
            delay = (delay * 2).min(policy.max_delay);
        }
    }
}
