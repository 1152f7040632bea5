use std::ops::Range;

use polars::prelude::*;

use crate::config::EngineConfig;
use crate::records::INPUT_ROW_COLUMN;

/// Orders rows by grouping fields then date ascending, breaking ties on input position so the
/// result is fully determined by the batch and re-sorting it is a no-op.
pub fn sequence_groups(df: &DataFrame, config: &EngineConfig) -> PolarsResult<DataFrame> {
    let mut by = config.grouping_fields();
    by.push(config.timestamp_field.clone());
    by.push(INPUT_ROW_COLUMN.to_string());

    df.sort(by, SortMultipleOptions::default().with_maintain_order(true))
}

/// Contiguous row ranges sharing the same grouping-field values. Expects a sequenced frame.
pub fn group_runs(df: &DataFrame, fields: &[String]) -> PolarsResult<Vec<Range<usize>>> {
    let len = df.height();
    let mut key_columns = Vec::with_capacity(fields.len());
    for field in fields {
        key_columns.push(df.column(field)?.str()?);
    }

    let same_group = |a: usize, b: usize| key_columns.iter().all(|keys| keys.get(a) == keys.get(b));

    let mut runs = Vec::new();
    let mut start = 0;
    for idx in 1..len {
        if !same_group(idx - 1, idx) {
            runs.push(start..idx);
            start = idx;
        }
    }
    if len > 0 {
        runs.push(start..len);
    }

    Ok(runs)
}
