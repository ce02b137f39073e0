//! Aggregated scan data file.
//!
//! Tab-separated text with a commented header:
//!
//! ```text
//! # Data written on 2024-05-01 at 14:03:12
//! # ==== Metadata ====
//! #	Rayleigh Length: 13.66 mm
//! # ====== Data ======
//! # position[mm]	x_diam[um]	dx_diam[um]	y_diam[um]	dy_diam[um]
//! -13.6	193.1	0.4	192.8	0.5
//! ```
//!
//! An axis that was not measured is written as `nan`. Values use the shortest
//! representation that parses back to the same `f64`.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use chrono::NaiveDateTime;
use tracing::info;

use crate::domain::{ScanDataset, ScanRow, WidthStat};
use crate::error::{AppError, AppResult};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d at %H:%M:%S";
const WRITTEN_PREFIX: &str = "# Data written on ";
const METADATA_MARKER: &str = "# ==== Metadata ====";
const DATA_MARKER: &str = "# ====== Data ======";
const COLUMNS: &str = "# position[mm]\tx_diam[um]\tdx_diam[um]\ty_diam[um]\tdy_diam[um]";

/// Contents of a data file.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    pub written: Option<NaiveDateTime>,
    pub metadata: Vec<(String, String)>,
    pub dataset: ScanDataset,
}

fn format_value(v: f64) -> String {
    if v.is_nan() { "nan".to_string() } else { v.to_string() }
}

fn width_fields(w: Option<WidthStat>) -> [String; 2] {
    match w {
        Some(w) => [format_value(w.mean), format_value(w.std_dev)],
        None => ["nan".to_string(), "nan".to_string()],
    }
}

/// Keep metadata on one header line.
fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

/// Write `dataset` with a metadata header.
pub fn write_dataset(
    path: &Path,
    dataset: &ScanDataset,
    metadata: &[(String, String)],
    written: NaiveDateTime,
) -> AppResult<()> {
    let file = File::create(path)
        .map_err(|e| AppError::InvalidInput(format!("Failed to create data file '{}': {e}", path.display())))?;
    let mut out = BufWriter::new(file);

    writeln!(out, "{WRITTEN_PREFIX}{}", written.format(TIMESTAMP_FORMAT))?;
    writeln!(out, "{METADATA_MARKER}")?;
    for (key, value) in metadata {
        writeln!(out, "#\t{}: {}", single_line(key), single_line(value))?;
    }
    writeln!(out, "{DATA_MARKER}")?;
    writeln!(out, "{COLUMNS}")?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(out);
    for row in dataset.rows() {
        let [x, dx] = width_fields(row.x);
        let [y, dy] = width_fields(row.y);
        writer.write_record([format_value(row.position_mm), x, dx, y, dy])?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = dataset.len(), "data written");
    Ok(())
}

fn parse_header(path: &Path) -> AppResult<(Option<NaiveDateTime>, Vec<(String, String)>)> {
    let reader = BufReader::new(File::open(path)?);
    let mut written = None;
    let mut metadata = Vec::new();
    let mut in_metadata = false;

    for line in reader.lines() {
        let line = line?;
        if !line.starts_with('#') {
            break;
        }
        if let Some(stamp) = line.strip_prefix(WRITTEN_PREFIX) {
            written = NaiveDateTime::parse_from_str(stamp.trim(), TIMESTAMP_FORMAT).ok();
        } else if line.starts_with(METADATA_MARKER) {
            in_metadata = true;
        } else if line.starts_with(DATA_MARKER) {
            in_metadata = false;
        } else if in_metadata {
            let entry = line.trim_start_matches('#').trim();
            if let Some((key, value)) = entry.split_once(':') {
                metadata.push((key.trim().to_string(), value.trim().to_string()));
            }
        }
    }

    Ok((written, metadata))
}

fn parse_field(field: &str, line: u64, column: &str) -> AppResult<f64> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|_| AppError::InvalidInput(format!("line {line}: invalid {column} '{field}'")))
}

fn parse_width(mean: f64, std_dev: f64) -> Option<WidthStat> {
    mean.is_finite().then_some(WidthStat {
        mean,
        std_dev: if std_dev.is_finite() { std_dev } else { 0.0 },
    })
}

/// Read a file written by [`write_dataset`].
pub fn read_dataset(path: &Path) -> AppResult<DataFile> {
    let file = File::open(path)
        .map_err(|e| AppError::InvalidInput(format!("Failed to open data file '{}': {e}", path.display())))?;
    let (written, metadata) = parse_header(path)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut dataset = ScanDataset::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        if record.len() != 5 {
            return Err(AppError::InvalidInput(format!(
                "line {line}: expected 5 columns, found {}",
                record.len()
            )));
        }
        let f = |i: usize, column: &str| parse_field(&record[i], line, column);
        let position_mm = f(0, "position")?;
        if !position_mm.is_finite() {
            return Err(AppError::InvalidInput(format!("line {line}: position must be finite")));
        }
        dataset.insert(ScanRow {
            position_mm,
            x: parse_width(f(1, "x_diam")?, f(2, "dx_diam")?),
            y: parse_width(f(3, "y_diam")?, f(4, "dy_diam")?),
        });
    }

    if dataset.is_empty() {
        return Err(AppError::InvalidInput(format!("no data rows in '{}'", path.display())));
    }

    Ok(DataFile {
        written,
        metadata,
        dataset,
    })
}
