//! Tabular inputs of the `field` command.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use nimbus_core::{Observation, SurveyField};
use serde::de::DeserializeOwned;

/// Julian date of the Unix epoch.
const UNIX_EPOCH_JD: f64 = 2440587.5;

fn read_csv<T: DeserializeOwned>(path: &Path, what: &str) -> Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open {what} file {}", path.display()))?;
    let mut rows = Vec::new();
    for (i, rec) in rdr.deserialize().enumerate() {
        // +2: header line and 1-based numbering
        let row: T =
            rec.with_context(|| format!("{what} file {}: bad row {}", path.display(), i + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Observation log, header `field,jd,fid,status,scimaglim`.
pub fn read_observations(path: &Path) -> Result<Vec<Observation>> {
    read_csv(path, "observation")
}

/// Survey field table, header `field_ID,ebv,A_g,A_r,A_i,ipix`.
pub fn read_survey(path: &Path) -> Result<Vec<SurveyField>> {
    read_csv(path, "survey")
}

pub fn find_field(survey: &[SurveyField], field: i64) -> Result<&SurveyField> {
    survey
        .iter()
        .find(|f| f.field_id == field)
        .with_context(|| format!("field {field} not found in the survey file"))
}

/// Parameter samples: whitespace-separated rows, `#` comments.
pub fn read_samples(path: &Path) -> Result<Vec<Vec<f64>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read sample file {}", path.display()))?;
    parse_samples(&text).with_context(|| format!("sample file {}", path.display()))
}

pub fn parse_samples(text: &str) -> Result<Vec<Vec<f64>>> {
    let mut samples: Vec<Vec<f64>> = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>()
                    .with_context(|| format!("line {}: invalid number '{tok}'", lineno + 1))
            })
            .collect::<Result<Vec<f64>>>()?;
        if let Some(first) = samples.first()
            && first.len() != row.len()
        {
            anyhow::bail!("line {}: {} values, expected {}", lineno + 1, row.len(), first.len());
        }
        samples.push(row);
    }
    Ok(samples)
}

/// Julian date of a UTC ISOT timestamp (`YYYY-MM-DDTHH:MM:SS[.fff]` or a bare date).
pub fn isot_to_jd(s: &str) -> Result<f64> {
    let s = s.trim();
    let dt = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .with_context(|| format!("invalid ISOT time '{s}' (expected YYYY-MM-DDTHH:MM:SS[.fff])"))?
        .and_utc();
    let seconds = dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) * 1e-9;
    Ok(seconds / 86400.0 + UNIX_EPOCH_JD)
}
