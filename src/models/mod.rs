//! Beam propagation models.

pub mod model;

pub use model::*;
