use polars::prelude::{DataFrame, PolarsError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::projector;
use crate::records::{self, DropReport, NormalizeError, Record};
use crate::rolling;
use crate::sequencer;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("record normalization failed: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// Projected rows, newest first within each group.
    pub dataframe: DataFrame,
    pub dropped: DropReport,
    pub group_count: usize,
}

impl EngineOutput {
    pub fn to_records(&self) -> Result<Vec<Record>, EngineError> {
        Ok(projector::frame_to_records(&self.dataframe)?)
    }
}

/// Batch rolling-statistics engine. Holds only its validated configuration, so every call to
/// [`RollingStatsEngine::run`] is a pure function of the batch it is given.
#[derive(Debug, Clone)]
pub struct RollingStatsEngine {
    config: EngineConfig,
}

impl RollingStatsEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            config: config.validate()?,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self, records: &[Record]) -> Result<EngineOutput, EngineError> {
        let normalized = records::normalize_records(records, &self.config)?;
        let dropped = normalized.dropped;
        if dropped.total_dropped() > 0 {
            warn!(
                dropped = dropped.total_dropped(),
                missing_key = dropped.missing_key,
                invalid_timestamp = dropped.invalid_timestamp,
                invalid_value = dropped.invalid_value,
                "excluded records that could not be normalized"
            );
        }

        let sequenced = sequencer::sequence_groups(&normalized.dataframe, &self.config)?;
        let group_count = sequencer::group_runs(&sequenced, &self.config.grouping_fields())?.len();
        debug!(rows = sequenced.height(), groups = group_count, "sequenced groups");

        let enriched = rolling::apply_rolling_stats(&sequenced, &self.config)?;
        let dataframe = projector::project_results(&enriched, &self.config)?;

        info!(
            input_rows = dropped.input_rows,
            output_rows = dataframe.height(),
            groups = group_count,
            windows = ?self.config.windows,
            "computed rolling statistics"
        );

        Ok(EngineOutput {
            dataframe,
            dropped,
            group_count,
        })
    }

    /// Convenience wrapper returning JSON records instead of a frame.
    pub fn run_records(&self, records: &[Record]) -> Result<Vec<Record>, EngineError> {
        self.run(records)?.to_records()
    }
}
