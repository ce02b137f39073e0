//! Domain types used throughout the measurement pipeline.
//!
//! This module defines:
//!
//! - axes and per-axis pairs (`Axis`, `AxisSelection`, `AxisPair`)
//! - averaged measurements (`WidthStat`, `Sample`, `ScanRow`, `ScanDataset`)
//! - stage geometry (`TravelRange`, `PulseCalibration`)
//! - fit and measurement configuration (`FitModel`, `FitBackend`, `MeasurementConfig`)

pub mod types;

pub use types::*;
