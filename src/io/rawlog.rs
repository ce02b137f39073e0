//! Companion log of every single profiler reading.
//!
//! Written next to the data file (`scan.dat` -> `scan.raw.log`) so a scan can be
//! re-analysed offline with a different outlier policy. Each probe appends a
//! block:
//!
//! ```text
//! # position[mm]	x_diam[um]	y_diam[um]
//! 0.5	201.3	199.8
//! 0.5	201.1	200.2
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::info;

use crate::domain::{AxisPair, AxisSelection};
use crate::error::{AppError, AppResult};

/// `scan.dat` -> `scan.raw.log`.
pub fn raw_log_path(data_path: &Path) -> PathBuf {
    data_path.with_extension("raw.log")
}

pub struct RawLog {
    path: PathBuf,
    out: BufWriter<File>,
}

impl RawLog {
    /// Create the log and write its header.
    pub fn create(path: &Path, metadata: &[(String, String)], started: NaiveDateTime) -> AppResult<Self> {
        let file = File::create(path)
            .map_err(|e| AppError::InvalidInput(format!("Failed to create raw log '{}': {e}", path.display())))?;
        let mut out = BufWriter::new(file);

        writeln!(out, "# Log started on {}", started.format("%Y-%m-%d at %H:%M:%S"))?;
        if !metadata.is_empty() {
            writeln!(out, "# ==== Metadata ====")?;
            for (key, value) in metadata {
                writeln!(out, "#\t{key}: {value}")?;
            }
        }
        writeln!(out, "# ====== Data ======")?;

        info!(path = %path.display(), "saving raw readings");
        Ok(Self {
            path: path.to_path_buf(),
            out,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `# === title ===` marker between search phases.
    pub fn section(&mut self, title: &str) -> AppResult<()> {
        writeln!(self.out, "# === {title} ===")?;
        Ok(())
    }

    /// Append the readings taken at one position.
    pub fn record(&mut self, position_mm: f64, axes: AxisSelection, readings: &[AxisPair<f64>]) -> AppResult<()> {
        let selected = axes.axes();
        let columns: Vec<String> = selected.iter().map(|a| format!("{}_diam[um]", a.label())).collect();
        writeln!(self.out, "# position[mm]\t{}", columns.join("\t"))?;

        for reading in readings {
            write!(self.out, "{position_mm}")?;
            for &axis in selected {
                write!(self.out, "\t{}", reading.get(axis))?;
            }
            writeln!(self.out)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> AppResult<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Flush and close, returning the path written.
    pub fn finish(mut self) -> AppResult<PathBuf> {
        self.flush()?;
        Ok(self.path)
    }
}

impl std::fmt::Debug for RawLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawLog").field("path", &self.path).finish()
    }
}
