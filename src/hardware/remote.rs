//! Beam profiler behind a process boundary.
//!
//! Some profiler vendors ship only a 32-bit driver, so the driver lives in a
//! helper process and this side talks to it through a fixed set of named calls.
//! The wire format belongs to the transport; `RemoteProfiler` only sequences
//! calls and interprets replies.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Axis, AxisPair};
use crate::error::{AppError, AppResult};
use crate::hardware::BeamProfiler;

/// Every call the helper process understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ProfilerCall {
    Initialize,
    AutoFind,
    AcquireSingleRevolution,
    RunComputation,
    BeamWidth4Sigma { axis: Axis },
    CentroidPosition { axis: Axis },
    SetDataAcquisition { enabled: bool },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ProfilerReply {
    Ack,
    Value { value: f64 },
    /// The call is valid but no data is available yet.
    NoData,
}

/// Carries one call to the helper process and returns its reply.
pub trait ProfilerTransport {
    fn call(&mut self, call: ProfilerCall) -> AppResult<ProfilerReply>;
}

/// Bounded polling used while waiting for the first frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub attempts: usize,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 50,
            interval: Duration::from_millis(100),
        }
    }
}

pub struct RemoteProfiler<T: ProfilerTransport> {
    transport: T,
    poll: PollPolicy,
}

impl<T: ProfilerTransport> RemoteProfiler<T> {
    /// Initialize the remote driver.
    pub fn connect(mut transport: T, poll: PollPolicy) -> AppResult<Self> {
        expect_ack(ProfilerCall::Initialize, transport.call(ProfilerCall::Initialize)?)?;
        Ok(Self { transport, poll })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn value(&mut self, call: ProfilerCall) -> AppResult<Option<f64>> {
        match self.transport.call(call)? {
            ProfilerReply::Value { value } => Ok(Some(value)),
            ProfilerReply::NoData => Ok(None),
            ProfilerReply::Ack => Err(AppError::Sensor(format!("{call:?} returned no value"))),
        }
    }

    fn ack(&mut self, call: ProfilerCall) -> AppResult<()> {
        let reply = self.transport.call(call)?;
        expect_ack(call, reply)
    }

    fn poll_centroid(&mut self) -> AppResult<()> {
        for attempt in 0..self.poll.attempts {
            if self.value(ProfilerCall::CentroidPosition { axis: Axis::X })?.is_some() {
                debug!(attempt, "profiler delivering data");
                return Ok(());
            }
            std::thread::sleep(self.poll.interval);
        }
        Err(AppError::Sensor(format!(
            "no profiler data after {} polls",
            self.poll.attempts
        )))
    }
}

impl<T: ProfilerTransport> BeamProfiler for RemoteProfiler<T> {
    fn read_single(&mut self) -> AppResult<AxisPair<f64>> {
        self.ack(ProfilerCall::AcquireSingleRevolution)?;
        self.ack(ProfilerCall::RunComputation)?;

        let mut widths = AxisPair::splat(0.0);
        for axis in Axis::BOTH {
            *widths.get_mut(axis) = self
                .value(ProfilerCall::BeamWidth4Sigma { axis })?
                .ok_or_else(|| AppError::Sensor(format!("no D4σ width on {} axis", axis.label())))?;
        }
        Ok(widths)
    }

    /// Enable acquisition, wait for a centroid, re-center the aperture, and
    /// disable acquisition again. Acquisition is disabled on failure too.
    fn wait_stable(&mut self) -> AppResult<()> {
        self.ack(ProfilerCall::SetDataAcquisition { enabled: true })?;
        let polled = self.poll_centroid();
        self.ack(ProfilerCall::SetDataAcquisition { enabled: false })?;
        polled?;
        self.ack(ProfilerCall::AutoFind)
    }

    fn close(&mut self) -> AppResult<()> {
        self.ack(ProfilerCall::Shutdown)
    }
}

fn expect_ack(call: ProfilerCall, reply: ProfilerReply) -> AppResult<()> {
    match reply {
        ProfilerReply::Ack => Ok(()),
        other => {
            warn!(?call, ?other, "unexpected profiler reply");
            Err(AppError::Sensor(format!("{call:?} was not acknowledged: {other:?}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Records calls and replays a fixed script of centroid replies.
    #[derive(Default)]
    struct ScriptedTransport {
        calls: Vec<ProfilerCall>,
        centroids: VecDeque<ProfilerReply>,
    }

    impl ProfilerTransport for ScriptedTransport {
        fn call(&mut self, call: ProfilerCall) -> AppResult<ProfilerReply> {
            self.calls.push(call);
            Ok(match call {
                ProfilerCall::BeamWidth4Sigma { axis: Axis::X } => ProfilerReply::Value { value: 210.0 },
                ProfilerCall::BeamWidth4Sigma { axis: Axis::Y } => ProfilerReply::Value { value: 190.0 },
                ProfilerCall::CentroidPosition { .. } => {
                    self.centroids.pop_front().unwrap_or(ProfilerReply::NoData)
                }
                _ => ProfilerReply::Ack,
            })
        }
    }

    fn fast_poll(attempts: usize) -> PollPolicy {
        PollPolicy {
            attempts,
            interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn read_single_sequences_acquire_compute_and_read() {
        let mut profiler = RemoteProfiler::connect(ScriptedTransport::default(), fast_poll(1)).unwrap();
        let widths = profiler.read_single().unwrap();
        assert_eq!(widths, AxisPair::new(210.0, 190.0));
        assert_eq!(
            profiler.transport().calls,
            vec![
                ProfilerCall::Initialize,
                ProfilerCall::AcquireSingleRevolution,
                ProfilerCall::RunComputation,
                ProfilerCall::BeamWidth4Sigma { axis: Axis::X },
                ProfilerCall::BeamWidth4Sigma { axis: Axis::Y },
            ]
        );
    }

    #[test]
    fn wait_stable_polls_until_data_arrives() {
        let transport = ScriptedTransport {
            centroids: VecDeque::from([
                ProfilerReply::NoData,
                ProfilerReply::NoData,
                ProfilerReply::Value { value: 0.0 },
            ]),
            ..Default::default()
        };
        let mut profiler = RemoteProfiler::connect(transport, fast_poll(5)).unwrap();
        profiler.wait_stable().unwrap();

        let calls = &profiler.transport().calls;
        let polls = calls
            .iter()
            .filter(|c| matches!(c, ProfilerCall::CentroidPosition { .. }))
            .count();
        assert_eq!(polls, 3);
        assert_eq!(calls.last(), Some(&ProfilerCall::AutoFind));
    }

    #[test]
    fn wait_stable_gives_up_and_disables_acquisition() {
        let mut profiler = RemoteProfiler::connect(ScriptedTransport::default(), fast_poll(3)).unwrap();
        let err = profiler.wait_stable().unwrap_err();
        assert!(matches!(err, AppError::Sensor(_)));
        assert_eq!(
            profiler.transport().calls.last(),
            Some(&ProfilerCall::SetDataAcquisition { enabled: false })
        );
    }
}
