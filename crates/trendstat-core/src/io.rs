use std::io::{Read, Write};

use serde_json::Value;
use thiserror::Error;

use crate::records::Record;

const ENVELOPE_KEY: &str = "json";

#[derive(Debug, Error)]
pub enum RecordIoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("expected a JSON array of records, found {found}")]
    NotAnArray { found: &'static str },
    #[error("element {index} is not a JSON object")]
    NotAnObject { index: usize },
    #[error("element {index} does not use the same envelope as the first element")]
    MixedEnvelope { index: usize },
}

/// How records were wrapped on the way in; output is written back the same way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Envelope {
    /// `[{...}, {...}]`
    #[default]
    Plain,
    /// `[{"json": {...}}, ...]`, as emitted by workflow-node transports.
    Wrapped,
}

#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub records: Vec<Record>,
    pub envelope: Envelope,
}

pub fn read_json_records<R: Read>(reader: R) -> Result<RecordBatch, RecordIoError> {
    let document: Value = serde_json::from_reader(reader)?;
    parse_json_document(document)
}

pub fn parse_json_document(document: Value) -> Result<RecordBatch, RecordIoError> {
    let items = match document {
        Value::Array(items) => items,
        other => {
            return Err(RecordIoError::NotAnArray {
                found: json_kind(&other),
            })
        }
    };

    let envelope = match items.first() {
        Some(first) if unwrap_envelope(first).is_some() => Envelope::Wrapped,
        _ => Envelope::Plain,
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let record = match (envelope, item) {
            (Envelope::Wrapped, Value::Object(mut outer)) => match outer.remove(ENVELOPE_KEY) {
                Some(Value::Object(inner)) if outer.is_empty() => inner,
                _ => return Err(RecordIoError::MixedEnvelope { index }),
            },
            (Envelope::Plain, Value::Object(object)) => object,
            _ => return Err(RecordIoError::NotAnObject { index }),
        };
        records.push(record);
    }

    Ok(RecordBatch { records, envelope })
}

pub fn write_json_records<W: Write>(
    writer: W,
    records: &[Record],
    envelope: Envelope,
    pretty: bool,
) -> Result<(), RecordIoError> {
    let items: Vec<Value> = records
        .iter()
        .map(|record| match envelope {
            Envelope::Plain => Value::Object(record.clone()),
            Envelope::Wrapped => {
                let mut outer = Record::new();
                outer.insert(ENVELOPE_KEY.to_string(), Value::Object(record.clone()));
                Value::Object(outer)
            }
        })
        .collect();

    if pretty {
        serde_json::to_writer_pretty(writer, &items)?;
    } else {
        serde_json::to_writer(writer, &items)?;
    }
    Ok(())
}

/// Reads a headed CSV file; every cell becomes a JSON string and empty cells are left out so
/// they read as missing fields.
pub fn read_csv_records<R: Read>(reader: R) -> Result<RecordBatch, RecordIoError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let mut records = Vec::new();
    for row in csv_reader.records() {
        let row = row?;
        let mut record = Record::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            if cell.is_empty() {
                continue;
            }
            record.insert(header.to_string(), Value::String(cell.to_string()));
        }
        records.push(record);
    }

    Ok(RecordBatch {
        records,
        envelope: Envelope::Plain,
    })
}

/// Writes records as CSV using the first record's field order as the header.
pub fn write_csv_records<W: Write>(writer: W, records: &[Record]) -> Result<(), RecordIoError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let Some(first) = records.first() else {
        csv_writer.flush()?;
        return Ok(());
    };

    let headers: Vec<&String> = first.keys().collect();
    csv_writer.write_record(headers.iter().map(|h| h.as_str()))?;
    for record in records {
        let row: Vec<String> = headers
            .iter()
            .map(|header| record.get(*header).map(cell_text).unwrap_or_default())
            .collect();
        csv_writer.write_record(&row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn unwrap_envelope(item: &Value) -> Option<&Record> {
    match item {
        Value::Object(outer) if outer.len() == 1 => match outer.get(ENVELOPE_KEY) {
            Some(Value::Object(inner)) => Some(inner),
            _ => None,
        },
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
