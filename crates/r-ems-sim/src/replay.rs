//! ---
//! ems_section: "11-simulation-test-harness"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Loaders turning recorded player and CSV files into time series."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, TimeDelta};
use csv::ReaderBuilder;
use r_ems_common::time::{parse_timestamp, seconds_to_delta};
use r_ems_msg::{parse_complex, ParamValue};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::timeseries::TimeSeries;

pub type Result<T> = std::result::Result<T, ReplayError>;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported series format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("invalid csv in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Row layout of CSV series files.
#[derive(Debug, Deserialize)]
pub struct SeriesRow {
    pub timestamp: String,
    pub value: String,
}

/// Load a series, dispatching on the file extension.
///
/// `.player` and `.csv` are understood. Everything else, `.glm` schedules
/// included, is rejected.
pub fn load_series(path: &Path) -> Result<TimeSeries> {
    let series = match path.extension().and_then(|ext| ext.to_str()) {
        Some("player") => from_player(path)?,
        Some("csv") => from_csv(path)?,
        _ => return Err(ReplayError::UnsupportedFormat(path.to_path_buf())),
    };
    debug!(path = %path.display(), samples = series.len(), "series loaded");
    Ok(series)
}

/// Parse a recorded value. Plain numbers stay real; anything else is read
/// as a complex literal.
pub fn parse_series_value(raw: &str) -> Option<ParamValue> {
    let trimmed = raw.trim();
    if let Ok(real) = trimmed.parse::<f64>() {
        return Some(ParamValue::Real(real));
    }
    parse_complex(trimmed).ok().map(ParamValue::Complex)
}

fn from_player(path: &Path) -> Result<TimeSeries> {
    let contents = fs::read_to_string(path).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_err = |line: usize, message: String| ReplayError::Parse {
        path: path.to_path_buf(),
        line,
        message,
    };

    let mut samples = Vec::new();
    let mut previous: Option<NaiveDateTime> = None;
    for (index, raw_line) in contents.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim().trim_end_matches([';', ',']);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((time_token, value_token)) = line.split_once(',') else {
            return Err(parse_err(line_no, format!("expected 'time,value', got '{line}'")));
        };
        let time_token = time_token.trim();
        let ts = if let Some(delta) = time_token.strip_prefix('+') {
            let base = previous.ok_or_else(|| {
                parse_err(line_no, "relative time without a preceding sample".to_owned())
            })?;
            base + parse_delta(delta).map_err(|message| parse_err(line_no, message))?
        } else {
            parse_timestamp(time_token)
                .ok_or_else(|| parse_err(line_no, format!("invalid timestamp '{time_token}'")))?
        };
        let value = parse_series_value(value_token)
            .ok_or_else(|| parse_err(line_no, format!("invalid value '{}'", value_token.trim())))?;
        samples.push((ts, value));
        previous = Some(ts);
    }
    Ok(TimeSeries::from_samples(samples))
}

fn parse_delta(raw: &str) -> std::result::Result<TimeDelta, String> {
    let raw = raw.trim();
    let unit_index = raw
        .char_indices()
        .last()
        .map(|(i, _)| i)
        .ok_or_else(|| "empty time delta".to_owned())?;
    let (amount, unit) = raw.split_at(unit_index);
    let amount: f64 = amount
        .trim()
        .parse()
        .map_err(|_| format!("invalid time delta '{raw}'"))?;
    let scale = match unit {
        "s" => 1.0,
        "m" => 60.0,
        "h" => 3_600.0,
        "d" => 86_400.0,
        other => return Err(format!("unknown time delta unit '{other}'")),
    };
    Ok(seconds_to_delta(amount * scale))
}

fn from_csv(path: &Path) -> Result<TimeSeries> {
    let file = fs::File::open(path).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(file);
    let mut samples = Vec::new();
    for (index, row) in reader.deserialize::<SeriesRow>().enumerate() {
        let row = row.map_err(|source| ReplayError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        // header occupies line 1
        let line = index + 2;
        let ts = parse_timestamp(&row.timestamp).ok_or_else(|| ReplayError::Parse {
            path: path.to_path_buf(),
            line,
            message: format!("invalid timestamp '{}'", row.timestamp),
        })?;
        let value = parse_series_value(&row.value).ok_or_else(|| ReplayError::Parse {
            path: path.to_path_buf(),
            line,
            message: format!("invalid value '{}'", row.value),
        })?;
        samples.push((ts, value));
    }
    Ok(TimeSeries::from_samples(samples))
}
