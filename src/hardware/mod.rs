//! Instrument capabilities and their implementations.
//!
//! - `capabilities`: the `BeamProfiler` and `LinearStage` traits
//! - `stage_state`: position-reliability state machine for stages
//! - `remote`: RPC client for a profiler driven from a helper process
//! - `sim`: simulated stage and profiler for tests and dry runs

pub mod capabilities;
pub mod remote;
pub mod sim;
pub mod stage_state;

pub use capabilities::*;
pub use stage_state::*;
