//! `m2-caustic` library crate.
//!
//! The binary (`m2`) is a thin wrapper around this library so that:
//!
//! - the searches, planner and fit engine are testable without hardware
//! - instrument drivers plug in behind the `hardware` capability traits
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod hardware;
pub mod io;
pub mod math;
pub mod measurement;
pub mod models;
pub mod plan;
pub mod report;
pub mod sampling;
pub mod search;
