//! Snapshot loading from CSV.
//!
//! Layout: `timestamp,open,high,low,close[,volume][,<indicator>...]`. Every
//! column after the OHLCV block is an indicator named by its header. Empty
//! cells and `NaN` are missing values. Timestamps are RFC 3339 or Unix epoch
//! (seconds, or milliseconds when the number is too large to be seconds).

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use tradepilot_core::domain::FeatureSnapshot;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),
    #[error("row {row}: unparseable timestamp '{value}'")]
    BadTimestamp { row: usize, value: String },
    #[error("row {row}: column '{column}' has non-numeric value '{value}'")]
    BadValue { row: usize, column: String, value: String },
    #[error("row {row}: timestamp not after the previous row")]
    OutOfOrder { row: usize },
    #[error("no data rows")]
    Empty,
}

/// Epoch values above this are taken as milliseconds (year 5138 in seconds).
const MILLIS_CUTOFF: i64 = 100_000_000_000;

const REQUIRED: [&str; 5] = ["timestamp", "open", "high", "low", "close"];

pub fn load_snapshots(path: &Path) -> Result<Vec<FeatureSnapshot>, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshots = read_snapshots(file)?;
    debug!(path = %path.display(), bars = snapshots.len(), "snapshots loaded");
    Ok(snapshots)
}

pub fn read_snapshots<R: Read>(reader: R) -> Result<Vec<FeatureSnapshot>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_ascii_lowercase()).collect();

    let position = |name: &'static str| headers.iter().position(|h| h == name);
    let mut cols = [0usize; 5];
    for (slot, name) in cols.iter_mut().zip(REQUIRED) {
        *slot = position(name).ok_or(LoadError::MissingColumn(name))?;
    }
    let [ts_col, open_col, high_col, low_col, close_col] = cols;
    let volume_col = position("volume");
    let indicator_cols: Vec<(usize, &str)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| !cols.contains(i) && Some(*i) != volume_col)
        .map(|(i, h)| (i, h.as_str()))
        .collect();

    let mut out: Vec<FeatureSnapshot> = Vec::new();
    let mut skipped = 0usize;
    for (idx, record) in rdr.records().enumerate() {
        let record = record?;
        // Header is line 1.
        let row = idx + 2;
        let cell = |i: usize| record.get(i).unwrap_or("");

        let timestamp = parse_timestamp(cell(ts_col)).ok_or_else(|| LoadError::BadTimestamp {
            row,
            value: cell(ts_col).to_string(),
        })?;
        if out.last().is_some_and(|prev| prev.timestamp >= timestamp) {
            return Err(LoadError::OutOfOrder { row });
        }

        let number = |i: usize| parse_number(cell(i), row, &headers[i]);
        let price = |i: usize| number(i).map(|v| v.unwrap_or(f64::NAN));
        let mut snapshot = FeatureSnapshot::new(
            timestamp,
            price(open_col)?,
            price(high_col)?,
            price(low_col)?,
            price(close_col)?,
            match volume_col {
                Some(i) => number(i)?.unwrap_or(0.0),
                None => 0.0,
            },
        );
        let mut indicators = BTreeMap::new();
        for &(i, name) in &indicator_cols {
            if let Some(v) = number(i)? {
                indicators.insert(name.to_string(), v);
            }
        }
        snapshot.indicators = indicators;
        if snapshot.is_void() {
            skipped += 1;
        }
        out.push(snapshot);
    }

    if out.is_empty() {
        return Err(LoadError::Empty);
    }
    if skipped > 0 {
        warn!(rows = skipped, "rows with missing OHLC values");
    }
    Ok(out)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let n: i64 = raw.parse().ok()?;
    if n.abs() >= MILLIS_CUTOFF {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

/// `Ok(None)` for an empty cell or NaN.
fn parse_number(raw: &str, row: usize, column: &str) -> Result<Option<f64>, LoadError> {
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_nan() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(_) => Err(LoadError::BadValue {
            row,
            column: column.to_string(),
            value: raw.to_string(),
        }),
    }
}
