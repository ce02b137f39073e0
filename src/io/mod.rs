//! File formats.
//!
//! - aggregated scan data, tab-separated with a metadata header (`dataset`)
//! - every single reading of a run, for offline re-analysis (`rawlog`)
//! - JSON fit report with a fitted caustic grid (`report`)

pub mod dataset;
pub mod rawlog;
pub mod report;

pub use dataset::*;
pub use rawlog::*;
pub use report::*;
