use std::collections::HashMap;

use chrono::NaiveDate;
use polars::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, EngineConfig};

/// A loosely-typed input or output record, one JSON object per observation.
pub type Record = Map<String, Value>;

/// Original batch position of each surviving row; used as the ordering tie-break.
pub const INPUT_ROW_COLUMN: &str = "__input_row";

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Rows removed by the normalizer, by the first check each one failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DropReport {
    pub input_rows: usize,
    pub missing_key: usize,
    pub invalid_timestamp: usize,
    pub invalid_value: usize,
}

impl DropReport {
    pub fn total_dropped(&self) -> usize {
        self.missing_key + self.invalid_timestamp + self.invalid_value
    }

    pub fn kept_rows(&self) -> usize {
        self.input_rows - self.total_dropped()
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub dataframe: DataFrame,
    pub dropped: DropReport,
}

/// Coerces raw records into a typed frame with one column per grouping field, the parsed
/// date, the numeric value, any optional passthrough fields present in the batch and the
/// input position. Rows that cannot be typed are dropped and counted, never reported as errors.
pub fn normalize_records(
    records: &[Record],
    config: &EngineConfig,
) -> Result<NormalizedBatch, NormalizeError> {
    let canonical: Vec<HashMap<String, &Value>> = records.iter().map(canonical_record).collect();
    let grouping_fields = config.grouping_fields();

    if !canonical.is_empty() {
        for field in &grouping_fields {
            if !canonical.iter().any(|record| record.contains_key(field)) {
                return Err(ConfigError::UnknownGroupKey {
                    field: field.clone(),
                }
                .into());
            }
        }
    }

    let optional_fields: Vec<&String> = config
        .optional_fields
        .iter()
        .filter(|field| canonical.iter().any(|record| record.contains_key(*field)))
        .collect();

    let mut dropped = DropReport {
        input_rows: records.len(),
        ..DropReport::default()
    };

    let mut key_columns: Vec<Vec<String>> = vec![Vec::with_capacity(records.len()); grouping_fields.len()];
    let mut optional_columns: Vec<Vec<Option<String>>> =
        vec![Vec::with_capacity(records.len()); optional_fields.len()];
    let mut dates: Vec<NaiveDate> = Vec::with_capacity(records.len());
    let mut values = Vec::with_capacity(records.len());
    let mut input_rows: Vec<u32> = Vec::with_capacity(records.len());

    for (position, record) in canonical.iter().enumerate() {
        let keys: Option<Vec<String>> = grouping_fields
            .iter()
            .map(|field| record.get(field).and_then(|value| key_text(value)))
            .collect();
        let Some(keys) = keys else {
            dropped.missing_key += 1;
            continue;
        };

        let Some(date) = record
            .get(&config.timestamp_field)
            .and_then(|value| parse_date(value, &config.timestamp_format))
        else {
            dropped.invalid_timestamp += 1;
            continue;
        };

        let Some(value) = record
            .get(&config.value_field)
            .and_then(|value| parse_value(value))
        else {
            dropped.invalid_value += 1;
            continue;
        };

        for (column, key) in key_columns.iter_mut().zip(keys) {
            column.push(key);
        }
        for (column, field) in optional_columns.iter_mut().zip(&optional_fields) {
            column.push(record.get(*field).and_then(|value| passthrough_text(value)));
        }
        dates.push(date);
        values.push(value);
        input_rows.push(position as u32);
    }

    debug!(
        input_rows = dropped.input_rows,
        missing_key = dropped.missing_key,
        invalid_timestamp = dropped.invalid_timestamp,
        invalid_value = dropped.invalid_value,
        "normalized records"
    );

    let mut columns: Vec<Column> = Vec::with_capacity(grouping_fields.len() + optional_fields.len() + 3);
    for (field, column) in grouping_fields.iter().zip(key_columns) {
        columns.push(Series::new(field.as_str().into(), column).into());
    }
    for (field, column) in optional_fields.iter().zip(optional_columns) {
        columns.push(Series::new(field.as_str().into(), column).into());
    }
    columns.push(
        DateChunked::from_naive_date(config.timestamp_field.as_str().into(), dates)
            .into_series()
            .into(),
    );
    columns.push(Series::new(config.value_field.as_str().into(), values).into());
    columns.push(Series::new(INPUT_ROW_COLUMN.into(), input_rows).into());

    Ok(NormalizedBatch {
        dataframe: DataFrame::new(columns)?,
        dropped,
    })
}

/// Upper-cases field names; on a collision the first field wins.
fn canonical_record(record: &Record) -> HashMap<String, &Value> {
    let mut canonical = HashMap::with_capacity(record.len());
    for (key, value) in record {
        canonical.entry(key.trim().to_uppercase()).or_insert(value);
    }
    canonical
}

fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Passthrough fields keep any non-null value, rendered as text.
fn passthrough_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

pub fn parse_date(value: &Value, format: &str) -> Option<NaiveDate> {
    match value {
        Value::String(text) => NaiveDate::parse_from_str(text.trim(), format).ok(),
        _ => None,
    }
}

pub fn parse_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}
