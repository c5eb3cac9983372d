//! Per-epoch metric tracking.
//!
//! `EpochLogs` is what the training loop reports for one epoch; `TrackedMetrics` accumulates
//! those reports into one ordered series per metric name for the lifetime of a run.

use crate::error::EpochcastError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

/// Prefix the training loop puts in front of held-out-data metrics.
pub const VALIDATION_PREFIX: &str = "val_";

/// Key of the learning-rate series, charted on a secondary axis.
pub const LEARNING_RATE_KEY: &str = "lr";

/// Metric values reported for one epoch, in the order the training loop reported them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochLogs {
    entries: Vec<(String, f64)>,
}

impl EpochLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, keeping the original position if the key is already present.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for EpochLogs {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut logs = EpochLogs::new();
        for (name, value) in iter {
            logs.insert(name, value);
        }
        logs
    }
}

/// Which end of a series counts as "best".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtremumPolicy {
    Minimum,
    Maximum,
}

impl ExtremumPolicy {
    /// Loss and error metrics are minimized; everything else (accuracy, AUC, ...) is maximized.
    ///
    /// The rule looks at the base name, so `val_loss` follows `loss`.
    pub fn for_metric(name: &str) -> Self {
        let base = base_metric_name(name);
        if base == "loss" || base.ends_with("_loss") || base.ends_with("error") {
            ExtremumPolicy::Minimum
        } else {
            ExtremumPolicy::Maximum
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExtremumPolicy::Minimum => "min",
            ExtremumPolicy::Maximum => "max",
        }
    }
}

/// The best value of a series and where it occurred.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremum {
    pub policy: ExtremumPolicy,
    /// Position within the series.
    pub index: usize,
    pub value: f64,
}

impl Extremum {
    /// Scan `values` under `policy`. NaNs are skipped and ties keep the first occurrence.
    pub fn find(values: &[f64], policy: ExtremumPolicy) -> Option<Self> {
        let mut best: Option<(usize, f64)> = None;
        for (index, &value) in values.iter().enumerate() {
            if value.is_nan() {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, current)) => match policy {
                    ExtremumPolicy::Minimum => value < current,
                    ExtremumPolicy::Maximum => value > current,
                },
            };
            if better {
                best = Some((index, value));
            }
        }
        best.map(|(index, value)| Extremum {
            policy,
            index,
            value,
        })
    }
}

/// Strip the validation prefix, if any.
pub fn base_metric_name(name: &str) -> &str {
    name.strip_prefix(VALIDATION_PREFIX).unwrap_or(name)
}

pub fn validation_name(base: &str) -> String {
    format!("{VALIDATION_PREFIX}{base}")
}

/// Every epoch's reported metrics, one series per name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedMetrics {
    epochs: Vec<usize>,
    series: BTreeMap<String, Vec<f64>>,
}

impl TrackedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one epoch. Keys seen for the first time start a new series; no schema is enforced.
    pub fn record(&mut self, epoch: usize, logs: &EpochLogs) {
        self.epochs.push(epoch);
        for (name, value) in logs.iter() {
            self.series.entry(name.to_string()).or_default().push(value);
        }
        tracing::debug!(epoch, metrics = logs.len(), "Recorded epoch metrics");
    }

    /// Recorded epochs, in call order.
    pub fn epochs(&self) -> &[usize] {
        &self.epochs
    }

    pub fn series(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.series.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Number of recorded epochs.
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn has_validation(&self, base: &str) -> bool {
        self.contains(&validation_name(base))
    }

    pub fn has_learning_rate(&self) -> bool {
        self.contains(LEARNING_RATE_KEY)
    }

    /// Tracked names that are neither validation counterparts nor the learning rate, sorted.
    pub fn base_metric_names(&self) -> Vec<String> {
        self.names()
            .filter(|name| !name.starts_with(VALIDATION_PREFIX) && *name != LEARNING_RATE_KEY)
            .map(str::to_string)
            .collect()
    }

    pub fn extremum(&self, name: &str) -> Option<Extremum> {
        self.series(name)
            .and_then(|values| Extremum::find(values, ExtremumPolicy::for_metric(name)))
    }
}

/// One line of a JSON-lines training history: `{"epoch": 0, "logs": {"loss": 0.5}}`.
#[derive(Debug, Clone, Deserialize)]
struct HistoryLine {
    epoch: usize,
    logs: serde_json::Map<String, serde_json::Value>,
}

/// Parse a JSON-lines history file into `(epoch, logs)` pairs, keeping each line's key order.
///
/// Blank lines are skipped; non-numeric values are dropped with a warning.
pub fn load_history(path: &Path) -> Result<Vec<(usize, EpochLogs)>, EpochcastError> {
    let file = std::fs::File::open(path)?;
    read_history(std::io::BufReader::new(file))
}

pub fn read_history<R: BufRead>(reader: R) -> Result<Vec<(usize, EpochLogs)>, EpochcastError> {
    let mut history = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: HistoryLine = serde_json::from_str(&line)?;
        let mut logs = EpochLogs::new();
        for (name, value) in parsed.logs {
            match value.as_f64() {
                Some(v) => logs.insert(name, v),
                None => tracing::warn!(epoch = parsed.epoch, metric = %name, "Skipping non-numeric metric value"),
            }
        }
        history.push((parsed.epoch, logs));
    }
    Ok(history)
}
