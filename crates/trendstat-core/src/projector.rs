use std::fmt::Write as _;

use polars::prelude::*;
use serde_json::{Number, Value};

use crate::config::{EngineConfig, WindowColumns};
use crate::records::Record;
use crate::rolling::round2;

pub const DATE_COLUMN: &str = "date";

/// Output columns in presentation order: date, entity keys, optional passthrough fields, value,
/// metric name, then the derived blocks (means, stds, pct changes, z-scores) per window.
pub fn canonical_columns(config: &EngineConfig) -> Vec<String> {
    let windows: Vec<WindowColumns> = config.windows.iter().map(|&w| WindowColumns::new(w)).collect();

    let mut columns = vec![DATE_COLUMN.to_string()];
    columns.extend(config.group_keys.iter().cloned());
    columns.extend(config.optional_fields.iter().cloned());
    columns.push(config.value_field.clone());
    columns.push(config.metric_field.clone());
    columns.extend(windows.iter().map(|w| w.mean.clone()));
    columns.extend(windows.iter().map(|w| w.std.clone()));
    columns.extend(windows.iter().map(|w| w.pct_change.clone()));
    columns.extend(windows.iter().map(|w| w.z_score.clone()));
    columns
}

/// Formats the date, rounds the value, re-sorts newest first within each group and keeps the
/// canonical columns the frame actually carries.
pub fn project_results(df: &DataFrame, config: &EngineConfig) -> PolarsResult<DataFrame> {
    let mut by = config.grouping_fields();
    let mut descending = vec![false; by.len()];
    by.push(config.timestamp_field.clone());
    descending.push(true);

    let mut sorted = df.sort(
        by,
        SortMultipleOptions::default()
            .with_order_descending_multi(descending)
            .with_maintain_order(true),
    )?;

    let dates = sorted
        .column(&config.timestamp_field)?
        .as_materialized_series()
        .date()?
        .as_date_iter()
        .map(|date| date.map(|date| format_date(date, &config.timestamp_format)).transpose())
        .collect::<PolarsResult<Vec<Option<String>>>>()?;

    let rounded: Vec<Option<f64>> = sorted
        .column(&config.value_field)?
        .f64()?
        .into_iter()
        .map(|value| value.map(round2))
        .collect();

    sorted.with_column(Series::new(config.value_field.as_str().into(), rounded))?;
    sorted.with_column(Series::new(DATE_COLUMN.into(), dates))?;

    let present: Vec<String> = canonical_columns(config)
        .into_iter()
        .filter(|name| sorted.get_column_index(name).is_some())
        .collect();

    sorted.select(present)
}

fn format_date(date: chrono::NaiveDate, format: &str) -> PolarsResult<String> {
    let mut rendered = String::new();
    write!(rendered, "{}", date.format(format))
        .map_err(|_| {
            PolarsError::ComputeError(format!("timestamp format {format:?} cannot render a date").into())
        })?;
    Ok(rendered)
}

/// Converts a projected frame back into JSON object records, column order preserved.
pub fn frame_to_records(df: &DataFrame) -> PolarsResult<Vec<Record>> {
    let columns = df.get_columns();
    let mut records = Vec::with_capacity(df.height());

    for idx in 0..df.height() {
        let mut record = Record::new();
        for column in columns {
            record.insert(column.name().to_string(), any_value_to_json(column.get(idx)?));
        }
        records.push(record);
    }

    Ok(records)
}

fn any_value_to_json(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(flag) => Value::Bool(flag),
        AnyValue::String(text) => Value::String(text.to_string()),
        AnyValue::StringOwned(text) => Value::String(text.to_string()),
        AnyValue::Float64(number) => float_to_json(number),
        AnyValue::Float32(number) => float_to_json(f64::from(number)),
        AnyValue::Int32(number) => Value::from(number),
        AnyValue::Int64(number) => Value::from(number),
        AnyValue::UInt32(number) => Value::from(number),
        AnyValue::UInt64(number) => Value::from(number),
        other => Value::String(other.to_string()),
    }
}

fn float_to_json(number: f64) -> Value {
    Number::from_f64(number)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
