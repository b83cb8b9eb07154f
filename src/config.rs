//! Configuration system for simulation runs.
//!
//! A configuration picks a throttling preset, optionally overrides any of its
//! coefficients, and selects the metrics to extract.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! preset: mobile_slow_4g
//!
//! calibration:
//!   rtt_ms: 120
//!   server_response_time_ms: 30
//!   download_model: tcp_slow_start
//!   h2_origins: ["https://cdn.example.com"]
//!   origin_overrides:
//!     "https://example.com":
//!       rtt_ms: 40
//!
//! graph:
//!   min_task_duration_ms: 10
//!
//! simulation:
//!   log_level: info
//!   record_breakdown: true
//!   collect_stats: true
//!
//! metrics: [first-contentful-paint, interactive]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

use crate::calibration::{Calibration, DownloadModel, LinearAdjustment, OriginOverride, ThrottlingPreset};
use crate::graph::GraphOptions;
use crate::metrics::ALL_METRICS;
use crate::registry::create_default_registry;
use crate::simulator::SimulationOptions;
use crate::types::{Origin, SimTime};

/// Failures while reading configuration or artifact files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Run-level parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Attach a timing breakdown to every node
    #[serde(default = "default_true")]
    pub record_breakdown: bool,

    /// Keep the start/complete event timeline
    #[serde(default = "default_true")]
    pub record_timeline: bool,

    /// Whether to collect run statistics
    #[serde(default)]
    pub collect_stats: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics() -> Vec<String> {
    ALL_METRICS.iter().map(|m| m.to_string()).collect()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            record_breakdown: true,
            record_timeline: true,
            collect_stats: false,
        }
    }
}

/// Coefficients that replace the preset's values when set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<SimTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput_kbps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_slowdown_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_task_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_response_time_ms: Option<SimTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_rtt_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections_per_origin_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_connections: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_model: Option<DownloadModel>,
    #[serde(default)]
    pub origin_overrides: BTreeMap<Origin, OriginOverride>,
    #[serde(default)]
    pub h2_origins: BTreeSet<Origin>,
    #[serde(default)]
    pub metric_adjustments: BTreeMap<String, LinearAdjustment>,
}

impl CalibrationConfig {
    /// Applies the set fields on top of `base`.
    pub fn apply(&self, base: Calibration) -> Calibration {
        let mut calibration = base;
        if let Some(v) = self.rtt_ms {
            calibration.rtt_ms = v;
        }
        if let Some(v) = self.throughput_kbps {
            calibration.throughput_kbps = v;
        }
        if let Some(v) = self.cpu_slowdown_multiplier {
            calibration.cpu_slowdown_multiplier = v;
        }
        if let Some(v) = self.layout_task_multiplier {
            calibration.layout_task_multiplier = v;
        }
        if let Some(v) = self.server_response_time_ms {
            calibration.server_response_time_ms = v;
        }
        if let Some(v) = self.dns_rtt_multiplier {
            calibration.dns_rtt_multiplier = v;
        }
        if let Some(v) = self.connections_per_origin_limit {
            calibration.connections_per_origin_limit = v;
        }
        if let Some(v) = self.max_concurrent_connections {
            calibration.max_concurrent_connections = v;
        }
        if let Some(v) = self.download_model {
            calibration.download_model = v;
        }
        for (origin, entry) in &self.origin_overrides {
            calibration = calibration.with_origin_override(origin.clone(), entry.clone());
        }
        calibration.h2_origins.extend(self.h2_origins.iter().cloned());
        calibration
            .metric_adjustments
            .extend(self.metric_adjustments.iter().map(|(k, v)| (k.clone(), *v)));
        calibration
    }
}

/// Everything needed to turn recorded artifacts into metrics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Throttling profile the calibration starts from
    #[serde(default)]
    pub preset: ThrottlingPreset,

    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default)]
    pub graph: GraphOptions,

    #[serde(default)]
    pub simulation: SimulationParams,

    /// Metrics to extract after the run
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
}

impl SimConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and validates a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Picks the parser from the file extension (`.yaml`, `.yml` or `.json`).
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// The calibration described by the preset and its overrides.
    pub fn calibration(&self) -> Calibration {
        self.calibration.apply(self.preset.calibration())
    }

    pub fn simulation_options(&self) -> SimulationOptions {
        SimulationOptions {
            record_breakdown: self.simulation.record_breakdown,
            record_timeline: self.simulation.record_timeline,
        }
    }

    /// Metric names as string slices, for [`MetricRegistry::extract_all`].
    ///
    /// [`MetricRegistry::extract_all`]: crate::registry::MetricRegistry::extract_all
    pub fn metric_names(&self) -> Vec<&str> {
        self.metrics.iter().map(String::as_str).collect()
    }

    /// Checks the derived calibration, graph options, log level and metric list.
    pub fn validate(&self) -> ConfigResult<()> {
        self.calibration()
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let min_task = self.graph.min_task_duration_ms;
        if !min_task.is_finite() || min_task < 0.0 {
            return Err(ConfigError::Validation(format!(
                "graph.min_task_duration_ms must be non-negative, got {min_task}"
            )));
        }

        if !LOG_LEVELS.contains(&self.simulation.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "Unknown log level: {}",
                self.simulation.log_level
            )));
        }

        let registry = create_default_registry();
        let mut seen = BTreeSet::new();
        for metric in &self.metrics {
            if !registry.contains(metric) {
                return Err(ConfigError::Validation(format!("Unknown metric: {metric}")));
            }
            if !seen.insert(metric) {
                return Err(ConfigError::Validation(format!("Duplicate metric: {metric}")));
            }
        }

        Ok(())
    }

    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            preset: ThrottlingPreset::default(),
            calibration: CalibrationConfig::default(),
            graph: GraphOptions::default(),
            simulation: SimulationParams::default(),
            metrics: default_metrics(),
        }
    }
}

/// Fluent construction of a [`SimConfig`], validated on [`build`](Self::build).
#[derive(Default)]
pub struct SimConfigBuilder {
    config: SimConfig,
}

impl SimConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preset(mut self, preset: ThrottlingPreset) -> Self {
        self.config.preset = preset;
        self
    }

    pub fn rtt_ms(mut self, rtt: SimTime) -> Self {
        self.config.calibration.rtt_ms = Some(rtt);
        self
    }

    pub fn throughput_kbps(mut self, kbps: f64) -> Self {
        self.config.calibration.throughput_kbps = Some(kbps);
        self
    }

    pub fn cpu_slowdown(mut self, multiplier: f64) -> Self {
        self.config.calibration.cpu_slowdown_multiplier = Some(multiplier);
        self
    }

    pub fn download_model(mut self, model: DownloadModel) -> Self {
        self.config.calibration.download_model = Some(model);
        self
    }

    pub fn origin_override(mut self, origin: impl Into<Origin>, entry: OriginOverride) -> Self {
        self.config.calibration.origin_overrides.insert(origin.into(), entry);
        self
    }

    pub fn h2_origin(mut self, origin: impl Into<Origin>) -> Self {
        self.config.calibration.h2_origins.insert(origin.into());
        self
    }

    /// Sets the minimum duration of CPU tasks kept in the graph.
    pub fn min_task_duration(mut self, ms: SimTime) -> Self {
        self.config.graph.min_task_duration_ms = ms;
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    pub fn record_breakdown(mut self, enable: bool) -> Self {
        self.config.simulation.record_breakdown = enable;
        self
    }

    pub fn collect_stats(mut self, enable: bool) -> Self {
        self.config.simulation.collect_stats = enable;
        self
    }

    /// Replaces the metric selection.
    pub fn metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> ConfigResult<SimConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
