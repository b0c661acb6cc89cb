//! Data loading
//!
//! Reads OHLCV bars from CSV. The first column is the bar time, given as
//! epoch milliseconds, RFC3339 or `%Y-%m-%d %H:%M:%S` (UTC); the remaining
//! columns are `open,high,low,close,volume`. Invalid candles are skipped
//! with a warning, out-of-order timestamps are an error.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Candle, Symbol};

/// Parse a bar time in any of the accepted formats
pub fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(millis) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis)
            .with_context(|| format!("Timestamp out of range: {}", raw));
    }

    if let Ok(dt) = raw.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        .with_context(|| format!("Failed to parse datetime: {}", raw))
}

/// Load OHLCV data from CSV file with validation
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles: Vec<Candle> = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Missing {} column", name))?
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse {} at row {}", name, row_idx + 1))
        };

        let datetime = parse_time(record.get(0).context("Missing time column")?)?;
        let open = field(1, "open")?;
        let high = field(2, "high")?;
        let low = field(3, "low")?;
        let close = field(4, "close")?;
        let volume = field(5, "volume")?;

        if let Some(prev) = candles.last() {
            if datetime <= prev.datetime {
                anyhow::bail!(
                    "Timestamps not strictly increasing at row {} in {}: {} after {}",
                    row_idx + 2,
                    path.display(),
                    datetime,
                    prev.datetime
                );
            }
        }

        match Candle::new(datetime, open, high, low, close, volume) {
            Ok(candle) => candles.push(candle),
            Err(e) => {
                invalid_count += 1;
                warn!(
                    "Skipping invalid candle at row {} in {:?}: {}",
                    row_idx + 2, // +2 for 1-indexed and header row
                    path.file_name().unwrap_or_default(),
                    e
                );
            }
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid candles out of {} in {:?}",
            invalid_count,
            invalid_count + candles.len(),
            path.file_name().unwrap_or_default()
        );
    }

    Ok(candles)
}

/// Symbol from a data file name (`BONK.csv` -> `BONK`)
pub fn symbol_from_path(path: &Path) -> Symbol {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Symbol::new(stem)
}

/// CSV files in a directory, sorted by name
pub fn list_csv_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read data directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();
    Ok(files)
}

/// Load one file or every CSV in a directory, one entry per asset.
/// Files that fail to load are skipped with a warning.
pub fn load_assets(path: impl AsRef<Path>) -> Result<Vec<(Symbol, Vec<Candle>)>> {
    let path = path.as_ref();
    if path.is_file() {
        let candles = load_csv(path)?;
        return Ok(vec![(symbol_from_path(path), candles)]);
    }

    let mut assets = Vec::new();
    for file in list_csv_files(path)? {
        match load_csv(&file) {
            Ok(candles) if candles.is_empty() => {
                warn!("No valid candles in {}", file.display());
            }
            Ok(candles) => assets.push((symbol_from_path(&file), candles)),
            Err(e) => warn!("Skipping {}: {:#}", file.display(), e),
        }
    }
    info!("Loaded {} assets from {}", assets.len(), path.display());
    Ok(assets)
}
