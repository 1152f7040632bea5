// crates/trendstat-core/src/config.rs

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_WINDOWS: [usize; 3] = [7, 14, 30];
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one window length must be configured")]
    NoWindows,
    #[error("window length must be positive")]
    ZeroWindow,
    #[error("window length {0} configured more than once")]
    DuplicateWindow(usize),
    #[error("at least one group key must be configured")]
    NoGroupKeys,
    #[error("{role} field name is empty")]
    EmptyField { role: &'static str },
    #[error("timestamp format {format:?} cannot render a calendar date")]
    InvalidTimestampFormat { format: String },
    #[error("field {field} is configured more than once")]
    DuplicateField { field: String },
    #[error("group key {field} is not present in any record of the batch")]
    UnknownGroupKey { field: String },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Knobs for one engine instance. Field names are matched case-insensitively and stored
/// upper-cased once [`EngineConfig::validate`] has run.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub windows: Vec<usize>,
    pub group_keys: Vec<String>,
    pub metric_field: String,
    pub value_field: String,
    pub timestamp_field: String,
    pub timestamp_format: String,
    pub optional_fields: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            windows: DEFAULT_WINDOWS.to_vec(),
            group_keys: vec!["SKILL_NAME".to_string()],
            metric_field: "METRIC_NAME".to_string(),
            value_field: "METRIC_VALUE".to_string(),
            timestamp_field: "TIM_DAY_ID".to_string(),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            optional_fields: vec!["SIT_SITE_ID".to_string()],
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn with_windows(mut self, windows: Vec<usize>) -> Self {
        self.windows = windows;
        self
    }

    pub fn with_group_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Normalises field names and rejects configurations that indicate a caller defect.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.windows.is_empty() {
            return Err(ConfigError::NoWindows);
        }
        let mut seen_windows = HashSet::new();
        for &window in &self.windows {
            if window == 0 {
                return Err(ConfigError::ZeroWindow);
            }
            if !seen_windows.insert(window) {
                return Err(ConfigError::DuplicateWindow(window));
            }
        }

        if self.group_keys.is_empty() {
            return Err(ConfigError::NoGroupKeys);
        }

        self.group_keys = self
            .group_keys
            .iter()
            .map(|key| canonical_field(key, "group key"))
            .collect::<Result<_, _>>()?;
        self.metric_field = canonical_field(&self.metric_field, "metric")?;
        self.value_field = canonical_field(&self.value_field, "value")?;
        self.timestamp_field = canonical_field(&self.timestamp_field, "timestamp")?;
        self.optional_fields = self
            .optional_fields
            .iter()
            .map(|key| canonical_field(key, "optional"))
            .collect::<Result<_, _>>()?;

        if self.timestamp_format.trim().is_empty() {
            return Err(ConfigError::EmptyField {
                role: "timestamp format",
            });
        }
        check_timestamp_format(&self.timestamp_format)?;

        // A passthrough field promoted to a group key is carried once, as a key.
        let required: HashSet<String> = self.required_fields().cloned().collect();
        self.optional_fields.retain(|field| !required.contains(field));

        self.check_duplicate_fields()?;
        Ok(self)
    }

    /// Entity keys followed by the metric name: the full tuple a rolling window is scoped to.
    pub fn grouping_fields(&self) -> Vec<String> {
        let mut fields = self.group_keys.clone();
        fields.push(self.metric_field.clone());
        fields
    }

    fn check_duplicate_fields(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for field in self.required_fields().chain(self.optional_fields.iter()) {
            if !seen.insert(field.as_str()) {
                return Err(ConfigError::DuplicateField {
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }

    fn required_fields(&self) -> impl Iterator<Item = &String> {
        self.group_keys.iter().chain([
            &self.metric_field,
            &self.value_field,
            &self.timestamp_field,
        ])
    }
}

fn canonical_field(raw: &str, role: &'static str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyField { role });
    }
    Ok(trimmed.to_uppercase())
}

/// Dates are parsed and re-rendered with the same format, so it must not need time fields.
fn check_timestamp_format(format: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidTimestampFormat {
        format: format.to_string(),
    };
    let sample = NaiveDate::from_ymd_opt(2024, 1, 31).ok_or_else(invalid)?;
    let mut rendered = String::new();
    write!(rendered, "{}", sample.format(format)).map_err(|_| invalid())?;
    Ok(())
}

/// Output column names for one window length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowColumns {
    pub window: usize,
    pub mean: String,
    pub std: String,
    pub z_score: String,
    pub pct_change: String,
}

impl WindowColumns {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            mean: format!("rolling_mean_{window}"),
            std: format!("rolling_std_{window}"),
            z_score: format!("z_score_{window}"),
            pct_change: format!("pct_change_{window}"),
        }
    }
}
