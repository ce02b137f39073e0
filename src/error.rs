//! Crate-wide error type.
//!
//! Every fallible operation in the library returns `Result<_, AppError>`.
//! The variants mirror the failure modes a caustic scan can hit:
//!
//! - **`Configuration`**: the requested scan geometry (or a parameter) cannot work
//!   on this bench. Unrecoverable for the given inputs.
//! - **`StageOutOfRange`**: the Rayleigh-length bounding search found no bracket
//!   inside the travel range. Callers may retry with a different scan geometry.
//! - **`Controller`**: the motor controller rejected a command. Some call sites
//!   (best-effort homing) swallow this one.
//! - **`PositionOutOfBounds`**: a move target lies outside the stage limits. Never
//!   clamped.
//! - **`StageTimeout`**: the stage did not report idle in time. Treated as a
//!   hardware fault.
//!
//! The binary maps each variant to a process exit code through `exit_code()`.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Stage out of range: {0}")]
    StageOutOfRange(String),

    #[error("Controller rejected command: {0}")]
    Controller(String),

    #[error("Position {position} is outside the stage limits [{lower}, {upper}]")]
    PositionOutOfBounds { position: i64, lower: i64, upper: i64 },

    #[error("Stage position is unreliable; home the stage first")]
    PositionDirty,

    #[error("Stage did not become idle within {0:?}")]
    StageTimeout(Duration),

    #[error("Beam profiler error: {0}")]
    Sensor(String),

    #[error("Fit did not converge: {reasons}")]
    FitConvergence { reasons: String },

    #[error("No successful fit has been run yet")]
    NotFitted,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Measurement cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data file error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Process exit code for this error.
    ///
    /// Codes are grouped by concern: 2 for bad input and files, 3 for scan
    /// geometry, 4 for hardware, 5 for fitting, 130 for an interrupted run.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::InvalidInput(_) | AppError::Io(_) | AppError::Csv(_) | AppError::Json(_) => 2,
            AppError::Configuration(_) | AppError::StageOutOfRange(_) => 3,
            AppError::Controller(_)
            | AppError::PositionOutOfBounds { .. }
            | AppError::PositionDirty
            | AppError::StageTimeout(_)
            | AppError::Sensor(_) => 4,
            AppError::FitConvergence { .. } | AppError::NotFitted => 5,
            AppError::Cancelled => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_message_names_the_range() {
        let err = AppError::PositionOutOfBounds {
            position: 60_000,
            lower: -50_278,
            upper: 50_278,
        };
        let msg = err.to_string();
        assert!(msg.contains("60000"));
        assert!(msg.contains("[-50278, 50278]"));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn io_errors_convert_with_question_mark() {
        fn open_missing() -> AppResult<()> {
            std::fs::File::open("/definitely/not/here.dat")?;
            Ok(())
        }
        let err = open_missing().unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
        assert_eq!(err.exit_code(), 2);
    }
}
