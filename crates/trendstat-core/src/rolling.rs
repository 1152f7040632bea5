use std::collections::VecDeque;

use polars::prelude::*;

use crate::config::{EngineConfig, WindowColumns};
use crate::sequencer::group_runs;

/// Up to `capacity` most recent values of one group, oldest first.
#[derive(Debug, Clone)]
pub struct TrailingWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl TrailingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Mean and population standard deviation of the buffered values, `None` while empty.
    pub fn summary(&self) -> Option<WindowSummary> {
        let first = *self.values.front()?;
        if self.values.iter().all(|&value| value == first) {
            return Some(WindowSummary {
                mean: first,
                std: 0.0,
            });
        }

        // Running mean and deviations scaled by the largest one keep values near f64::MAX finite.
        let mut mean = 0.0_f64;
        for (idx, value) in self.values.iter().enumerate() {
            mean += (value - mean) / (idx + 1) as f64;
        }
        let scale = self
            .values
            .iter()
            .map(|value| (value - mean).abs())
            .fold(0.0, f64::max);
        if scale == 0.0 {
            return Some(WindowSummary { mean, std: 0.0 });
        }
        let count = self.values.len() as f64;
        let variance = self
            .values
            .iter()
            .map(|value| ((value - mean) / scale).powi(2))
            .sum::<f64>()
            / count;

        Some(WindowSummary {
            mean,
            std: scale * variance.sqrt(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSummary {
    pub mean: f64,
    pub std: f64,
}

impl WindowSummary {
    /// Zero for a flat window.
    pub fn z_score(&self, value: f64) -> f64 {
        if self.std == 0.0 {
            0.0
        } else {
            (value - self.mean) / self.std
        }
    }

    /// Zero when the trailing mean is zero.
    pub fn pct_change(&self, value: f64) -> f64 {
        if self.mean == 0.0 {
            0.0
        } else {
            (value - self.mean) / self.mean * 100.0
        }
    }
}

/// Half away from zero. Magnitudes too large to scale by 100 have no fractional part and
/// are returned unchanged.
pub fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    if scaled.is_finite() {
        scaled.round() / 100.0
    } else {
        value
    }
}

struct WindowAccumulator {
    columns: WindowColumns,
    buffer: TrailingWindow,
    means: Vec<Option<f64>>,
    stds: Vec<Option<f64>>,
    z_scores: Vec<Option<f64>>,
    pct_changes: Vec<Option<f64>>,
}

impl WindowAccumulator {
    fn new(window: usize, rows: usize) -> Self {
        Self {
            columns: WindowColumns::new(window),
            buffer: TrailingWindow::new(window),
            means: Vec::with_capacity(rows),
            stds: Vec::with_capacity(rows),
            z_scores: Vec::with_capacity(rows),
            pct_changes: Vec::with_capacity(rows),
        }
    }

    // The buffer is read before the current value enters it.
    fn observe(&mut self, value: Option<f64>) {
        match (self.buffer.summary(), value) {
            (Some(summary), Some(value)) => {
                self.means.push(Some(round2(summary.mean)));
                self.stds.push(Some(round2(summary.std)));
                self.z_scores.push(Some(round2(summary.z_score(value))));
                self.pct_changes.push(Some(round2(summary.pct_change(value))));
            }
            (Some(summary), None) => {
                self.means.push(Some(round2(summary.mean)));
                self.stds.push(Some(round2(summary.std)));
                self.z_scores.push(None);
                self.pct_changes.push(None);
            }
            (None, _) => {
                self.means.push(None);
                self.stds.push(None);
                self.z_scores.push(None);
                self.pct_changes.push(None);
            }
        }

        if let Some(value) = value {
            self.buffer.push(value);
        }
    }

    fn into_columns(self) -> [Column; 4] {
        [
            Series::new(self.columns.mean.as_str().into(), self.means).into(),
            Series::new(self.columns.std.as_str().into(), self.stds).into(),
            Series::new(self.columns.z_score.as_str().into(), self.z_scores).into(),
            Series::new(self.columns.pct_change.as_str().into(), self.pct_changes).into(),
        ]
    }
}

/// Attaches `rolling_mean_w`, `rolling_std_w`, `z_score_w` and `pct_change_w` for every
/// configured window. The frame must already be sequenced; each group is scanned in order and
/// row `i` only ever sees rows strictly before it within its own group.
pub fn apply_rolling_stats(df: &DataFrame, config: &EngineConfig) -> PolarsResult<DataFrame> {
    let len = df.height();
    let values = df.column(&config.value_field)?.f64()?;
    let runs = group_runs(df, &config.grouping_fields())?;

    let mut accumulators: Vec<WindowAccumulator> = config
        .windows
        .iter()
        .map(|&window| WindowAccumulator::new(window, len))
        .collect();

    for run in runs {
        for accumulator in accumulators.iter_mut() {
            accumulator.buffer.clear();
        }
        for idx in run {
            let value = values.get(idx);
            for accumulator in accumulators.iter_mut() {
                accumulator.observe(value);
            }
        }
    }

    let mut columns: Vec<Column> = accumulators
        .into_iter()
        .flat_map(WindowAccumulator::into_columns)
        .collect();

    let mut output = df.clone();
    output.hstack_mut(columns.as_mut_slice())?;

    Ok(output)
}
