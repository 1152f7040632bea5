use polars::prelude::*;
use serde_json::{json, Value};
use trendstat_core::records::{normalize_records, parse_value, NormalizeError, INPUT_ROW_COLUMN};
use trendstat_core::{ConfigError, DropReport, EngineConfig, Record};

fn records(value: Value) -> Vec<Record> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => map,
                other => panic!("not an object: {other}"),
            })
            .collect(),
        other => panic!("not an array: {other}"),
    }
}

fn config() -> EngineConfig {
    EngineConfig::default().validate().expect("valid config")
}

#[test]
fn field_names_are_case_insensitive() -> PolarsResult<()> {
    let input = records(json!([
        {"tim_day_id": "01/02/2024", "Skill_Name": "mlcx", "metric_name": "QTY", "metric_value": "12.5"},
    ]));
    let batch = normalize_records(&input, &config()).expect("normalize");

    assert_eq!(batch.dataframe.height(), 1);
    assert_eq!(batch.dataframe.column("SKILL_NAME")?.str()?.get(0), Some("mlcx"));
    assert_eq!(batch.dataframe.column("METRIC_VALUE")?.f64()?.get(0), Some(12.5));
    assert_eq!(batch.dropped.total_dropped(), 0);
    Ok(())
}

#[test]
fn unusable_rows_are_dropped_and_counted() -> PolarsResult<()> {
    let input = records(json!([
        {"TIM_DAY_ID": "01/02/2024", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY", "METRIC_VALUE": 1},
        {"TIM_DAY_ID": "2024-02-02", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY", "METRIC_VALUE": 2},
        {"TIM_DAY_ID": "31/02/2024", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY", "METRIC_VALUE": 2},
        {"TIM_DAY_ID": "03/02/2024", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY", "METRIC_VALUE": "abc"},
        {"TIM_DAY_ID": "04/02/2024", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY", "METRIC_VALUE": "NaN"},
        {"TIM_DAY_ID": "05/02/2024", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY"},
        {"TIM_DAY_ID": "06/02/2024", "METRIC_NAME": "QTY", "METRIC_VALUE": 6},
        {"TIM_DAY_ID": "07/02/2024", "SKILL_NAME": "mlcx", "METRIC_NAME": null, "METRIC_VALUE": 7},
        {"TIM_DAY_ID": "08/02/2024", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY", "METRIC_VALUE": " 8.25 "},
    ]));
    let batch = normalize_records(&input, &config()).expect("normalize");

    assert_eq!(
        batch.dropped,
        DropReport {
            input_rows: 9,
            missing_key: 2,
            invalid_timestamp: 2,
            invalid_value: 3,
        }
    );
    assert_eq!(batch.dropped.kept_rows(), 2);

    let values: Vec<Option<f64>> = batch.dataframe.column("METRIC_VALUE")?.f64()?.into_iter().collect();
    assert_eq!(values, vec![Some(1.0), Some(8.25)]);

    let positions: Vec<Option<u32>> = batch.dataframe.column(INPUT_ROW_COLUMN)?.u32()?.into_iter().collect();
    assert_eq!(positions, vec![Some(0), Some(8)]);
    Ok(())
}

#[test]
fn group_key_missing_from_every_record_is_a_config_error() {
    let input = records(json!([
        {"TIM_DAY_ID": "01/02/2024", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY", "METRIC_VALUE": 1},
    ]));
    let config = EngineConfig::default()
        .with_group_keys(["SKILL_NAME", "queue"])
        .validate()
        .expect("valid config");

    let err = normalize_records(&input, &config).expect_err("unknown key");
    assert!(matches!(
        err,
        NormalizeError::Config(ConfigError::UnknownGroupKey { ref field }) if field.as_str() == "QUEUE"
    ));
}

#[test]
fn numeric_keys_and_optional_fields_are_carried_as_text() -> PolarsResult<()> {
    let input = records(json!([
        {"TIM_DAY_ID": "01/02/2024", "SKILL_NAME": 42, "METRIC_NAME": "QTY", "METRIC_VALUE": 1, "sit_site_id": "MLB"},
        {"TIM_DAY_ID": "02/02/2024", "SKILL_NAME": 42, "METRIC_NAME": "QTY", "METRIC_VALUE": 2},
    ]));
    let batch = normalize_records(&input, &config()).expect("normalize");

    let skills = batch.dataframe.column("SKILL_NAME")?.str()?;
    assert_eq!(skills.get(0), Some("42"));
    let sites = batch.dataframe.column("SIT_SITE_ID")?.str()?;
    assert_eq!(sites.get(0), Some("MLB"));
    assert_eq!(sites.get(1), None);
    Ok(())
}

#[test]
fn optional_fields_keep_non_text_values() -> PolarsResult<()> {
    let input = records(json!([
        {"TIM_DAY_ID": "01/02/2024", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY", "METRIC_VALUE": 1, "SIT_SITE_ID": true},
        {"TIM_DAY_ID": "02/02/2024", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY", "METRIC_VALUE": 2, "SIT_SITE_ID": {"code": "MLB"}},
        {"TIM_DAY_ID": "03/02/2024", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY", "METRIC_VALUE": 3, "SIT_SITE_ID": null},
    ]));
    let batch = normalize_records(&input, &config()).expect("normalize");

    let sites: Vec<Option<&str>> = batch.dataframe.column("SIT_SITE_ID")?.str()?.into_iter().collect();
    assert_eq!(sites, vec![Some("true"), Some(r#"{"code":"MLB"}"#), None]);
    Ok(())
}

#[test]
fn timestamps_become_a_date_column() -> PolarsResult<()> {
    let input = records(json!([
        {"TIM_DAY_ID": "29/02/2024", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY", "METRIC_VALUE": 1},
        {"TIM_DAY_ID": "31/12/1969", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY", "METRIC_VALUE": 2},
    ]));
    let batch = normalize_records(&input, &config()).expect("normalize");

    let column = batch.dataframe.column("TIM_DAY_ID")?;
    assert_eq!(column.dtype(), &DataType::Date);
    let dates: Vec<Option<chrono::NaiveDate>> = column.as_materialized_series().date()?.as_date_iter().collect();
    assert_eq!(
        dates,
        vec![
            chrono::NaiveDate::from_ymd_opt(2024, 2, 29),
            chrono::NaiveDate::from_ymd_opt(1969, 12, 31),
        ]
    );
    Ok(())
}

#[test]
fn optional_field_absent_from_batch_adds_no_column() {
    let input = records(json!([
        {"TIM_DAY_ID": "01/02/2024", "SKILL_NAME": "mlcx", "METRIC_NAME": "QTY", "METRIC_VALUE": 1},
    ]));
    let batch = normalize_records(&input, &config()).expect("normalize");
    assert!(batch.dataframe.get_column_index("SIT_SITE_ID").is_none());
}

#[test]
fn empty_batch_normalizes_to_empty_frame() {
    let batch = normalize_records(&[], &config()).expect("normalize");
    assert_eq!(batch.dataframe.height(), 0);
    assert_eq!(batch.dropped, DropReport::default());
}

#[test]
fn value_parsing_accepts_numbers_and_numeric_text_only() {
    assert_eq!(parse_value(&json!(3)), Some(3.0));
    assert_eq!(parse_value(&json!("-1.5e2")), Some(-150.0));
    assert_eq!(parse_value(&json!("inf")), None);
    assert_eq!(parse_value(&json!(true)), None);
    assert_eq!(parse_value(&json!(null)), None);
    assert_eq!(parse_value(&json!("")), None);
}
