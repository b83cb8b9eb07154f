//! Calibration coefficients and throttling presets.
//!
//! A [`Calibration`] describes the synthetic device/network condition being
//! simulated plus any observed per-origin timings that should take precedence
//! over the synthetic formulas. It is never mutated by a run: every `with_*`
//! method returns a new value, and a new calibration means a new simulation.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{Result, SimulationError};
use crate::trace::TaskCategory;
use crate::types::{Origin, SimTime};

/// How the download phase of a request is modeled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadModel {
    /// `transfer_size / throughput`
    #[default]
    Throughput,
    /// Round trips with a congestion window that doubles up to the
    /// bandwidth-delay product.
    TcpSlowStart,
}

/// Observed timings for one origin.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<SimTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput_kbps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_response_time_ms: Option<SimTime>,
    /// Full cold-connection setup time (DNS + TCP + TLS) as observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_setup_ms: Option<SimTime>,
}

impl OriginOverride {
    /// Fills unset fields from `other`.
    pub fn or(self, other: &OriginOverride) -> OriginOverride {
        OriginOverride {
            rtt_ms: self.rtt_ms.or(other.rtt_ms),
            throughput_kbps: self.throughput_kbps.or(other.throughput_kbps),
            server_response_time_ms: self.server_response_time_ms.or(other.server_response_time_ms),
            connection_setup_ms: self.connection_setup_ms.or(other.connection_setup_ms),
        }
    }
}

/// `timing * multiplier + intercept`, applied to an extracted metric.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearAdjustment {
    #[serde(default)]
    pub intercept: SimTime,
    #[serde(default = "default_one")]
    pub multiplier: f64,
}

impl LinearAdjustment {
    pub fn apply(&self, timing: SimTime) -> SimTime {
        (timing * self.multiplier + self.intercept).max(0.0)
    }
}

/// Named throttling profiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThrottlingPreset {
    #[default]
    #[serde(rename = "mobile_slow_4g", alias = "mobile-slow-4g")]
    MobileSlow4g,
    #[serde(rename = "mobile_regular_3g", alias = "mobile-regular-3g")]
    MobileRegular3g,
    #[serde(rename = "desktop_dense_4g", alias = "desktop-dense-4g")]
    DesktopDense4g,
}

impl ThrottlingPreset {
    pub fn calibration(&self) -> Calibration {
        let (rtt_ms, throughput_kbps, cpu_slowdown_multiplier) = match self {
            ThrottlingPreset::MobileSlow4g => (150.0, 1.6 * 1024.0, 4.0),
            ThrottlingPreset::MobileRegular3g => (300.0, 700.0, 4.0),
            ThrottlingPreset::DesktopDense4g => (40.0, 10.0 * 1024.0, 1.0),
        };
        Calibration {
            rtt_ms,
            throughput_kbps,
            cpu_slowdown_multiplier,
            ..Calibration::base()
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ThrottlingPreset::MobileSlow4g => "mobile_slow_4g",
            ThrottlingPreset::MobileRegular3g => "mobile_regular_3g",
            ThrottlingPreset::DesktopDense4g => "desktop_dense_4g",
        }
    }
}

impl FromStr for ThrottlingPreset {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "mobile_slow_4g" => Ok(ThrottlingPreset::MobileSlow4g),
            "mobile_regular_3g" => Ok(ThrottlingPreset::MobileRegular3g),
            "desktop_dense_4g" => Ok(ThrottlingPreset::DesktopDense4g),
            other => Err(SimulationError::InvalidCalibration(format!(
                "unknown throttling preset '{other}'"
            ))),
        }
    }
}

fn default_one() -> f64 {
    1.0
}

fn default_layout_task_multiplier() -> f64 {
    0.5
}

fn default_dns_rtt_multiplier() -> f64 {
    2.0
}

fn default_connections_per_origin() -> usize {
    6
}

fn default_max_concurrent_connections() -> usize {
    10
}

/// Coefficients consumed by the connection pool and the scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Default round-trip time
    pub rtt_ms: SimTime,
    /// Default bandwidth
    pub throughput_kbps: f64,
    #[serde(default = "default_one")]
    pub cpu_slowdown_multiplier: f64,
    /// Fraction of the CPU slowdown applied to layout and paint work
    #[serde(default = "default_layout_task_multiplier")]
    pub layout_task_multiplier: f64,
    /// Server think time used when no observation exists for an origin
    #[serde(default)]
    pub server_response_time_ms: SimTime,
    /// DNS resolution cost, in round trips
    #[serde(default = "default_dns_rtt_multiplier")]
    pub dns_rtt_multiplier: f64,
    #[serde(default = "default_connections_per_origin")]
    pub connections_per_origin_limit: usize,
    /// Cap on simultaneously busy connections across all origins
    #[serde(default = "default_max_concurrent_connections")]
    pub max_concurrent_connections: usize,
    #[serde(default)]
    pub download_model: DownloadModel,
    #[serde(default)]
    pub origin_overrides: BTreeMap<Origin, OriginOverride>,
    /// Origins known to multiplex requests over HTTP/2
    #[serde(default)]
    pub h2_origins: BTreeSet<Origin>,
    #[serde(default)]
    pub metric_adjustments: BTreeMap<String, LinearAdjustment>,
}

impl Default for Calibration {
    fn default() -> Self {
        ThrottlingPreset::default().calibration()
    }
}

impl Calibration {
    fn base() -> Self {
        Self {
            rtt_ms: 150.0,
            throughput_kbps: 1.6 * 1024.0,
            cpu_slowdown_multiplier: 1.0,
            layout_task_multiplier: default_layout_task_multiplier(),
            server_response_time_ms: 0.0,
            dns_rtt_multiplier: default_dns_rtt_multiplier(),
            connections_per_origin_limit: default_connections_per_origin(),
            max_concurrent_connections: default_max_concurrent_connections(),
            download_model: DownloadModel::default(),
            origin_overrides: BTreeMap::new(),
            h2_origins: BTreeSet::new(),
            metric_adjustments: BTreeMap::new(),
        }
    }

    /// Creates a calibration with the given network condition and defaults
    /// for everything else.
    pub fn new(rtt_ms: SimTime, throughput_kbps: f64, cpu_slowdown_multiplier: f64) -> Self {
        Self {
            rtt_ms,
            throughput_kbps,
            cpu_slowdown_multiplier,
            ..Self::base()
        }
    }

    pub fn with_cpu_slowdown(mut self, multiplier: f64) -> Self {
        self.cpu_slowdown_multiplier = multiplier;
        self
    }

    pub fn with_server_response_time(mut self, ms: SimTime) -> Self {
        self.server_response_time_ms = ms;
        self
    }

    pub fn with_connections_per_origin(mut self, limit: usize) -> Self {
        self.connections_per_origin_limit = limit;
        self
    }

    pub fn with_max_concurrent_connections(mut self, limit: usize) -> Self {
        self.max_concurrent_connections = limit;
        self
    }

    pub fn with_download_model(mut self, model: DownloadModel) -> Self {
        self.download_model = model;
        self
    }

    /// Adds (or merges into) the override for `origin`; fields already set
    /// in `entry` win over existing ones.
    pub fn with_origin_override(mut self, origin: impl Into<Origin>, entry: OriginOverride) -> Self {
        let origin = origin.into();
        let merged = match self.origin_overrides.get(&origin) {
            Some(existing) => entry.or(existing),
            None => entry,
        };
        self.origin_overrides.insert(origin, merged);
        self
    }

    pub fn with_h2_origin(mut self, origin: impl Into<Origin>) -> Self {
        self.h2_origins.insert(origin.into());
        self
    }

    pub fn with_metric_adjustment(mut self, metric: impl Into<String>, adjustment: LinearAdjustment) -> Self {
        self.metric_adjustments.insert(metric.into(), adjustment);
        self
    }

    pub fn origin_override(&self, origin: &str) -> Option<&OriginOverride> {
        self.origin_overrides.get(origin)
    }

    /// Round-trip time for `origin`, preferring the observed value.
    pub fn rtt_for(&self, origin: &str) -> SimTime {
        self.origin_override(origin)
            .and_then(|o| o.rtt_ms)
            .unwrap_or(self.rtt_ms)
    }

    /// Bandwidth for `origin`, preferring the observed value.
    pub fn throughput_for(&self, origin: &str) -> f64 {
        self.origin_override(origin)
            .and_then(|o| o.throughput_kbps)
            .unwrap_or(self.throughput_kbps)
    }

    /// Server think time for `origin`, preferring the observed value.
    pub fn server_response_time_for(&self, origin: &str) -> SimTime {
        self.origin_override(origin)
            .and_then(|o| o.server_response_time_ms)
            .unwrap_or(self.server_response_time_ms)
    }

    pub fn connection_setup_for(&self, origin: &str) -> Option<SimTime> {
        self.origin_override(origin).and_then(|o| o.connection_setup_ms)
    }

    pub fn is_h2_origin(&self, origin: &str) -> bool {
        self.h2_origins.contains(origin)
    }

    /// Slowdown applied to a task of the given category.
    pub fn cpu_multiplier_for(&self, category: TaskCategory) -> f64 {
        if category.is_rendering() {
            (self.cpu_slowdown_multiplier * self.layout_task_multiplier).max(1.0)
        } else {
            self.cpu_slowdown_multiplier
        }
    }

    pub fn metric_adjustment(&self, metric: &str) -> Option<&LinearAdjustment> {
        self.metric_adjustments.get(metric)
    }

    /// Rejects coefficients the cost model cannot work with.
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(SimulationError::InvalidCalibration(format!("{name} must be positive, got {value}")))
            }
        };
        let non_negative = |name: &str, value: f64| {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(SimulationError::InvalidCalibration(format!("{name} must be non-negative, got {value}")))
            }
        };

        positive("rtt_ms", self.rtt_ms)?;
        positive("throughput_kbps", self.throughput_kbps)?;
        positive("cpu_slowdown_multiplier", self.cpu_slowdown_multiplier)?;
        positive("layout_task_multiplier", self.layout_task_multiplier)?;
        non_negative("server_response_time_ms", self.server_response_time_ms)?;
        non_negative("dns_rtt_multiplier", self.dns_rtt_multiplier)?;

        if self.connections_per_origin_limit == 0 {
            return Err(SimulationError::InvalidCalibration(
                "connections_per_origin_limit must be at least 1".into(),
            ));
        }
        if self.max_concurrent_connections == 0 {
            return Err(SimulationError::InvalidCalibration(
                "max_concurrent_connections must be at least 1".into(),
            ));
        }

        for (origin, entry) in &self.origin_overrides {
            if let Some(rtt) = entry.rtt_ms {
                positive(&format!("{origin} rtt_ms"), rtt)?;
            }
            if let Some(throughput) = entry.throughput_kbps {
                positive(&format!("{origin} throughput_kbps"), throughput)?;
            }
            if let Some(srt) = entry.server_response_time_ms {
                non_negative(&format!("{origin} server_response_time_ms"), srt)?;
            }
            if let Some(setup) = entry.connection_setup_ms {
                non_negative(&format!("{origin} connection_setup_ms"), setup)?;
            }
        }
        Ok(())
    }

    /// A stable hash of every coefficient.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        serde_json::to_vec(self).unwrap_or_default().hash(&mut hasher);
        hasher.finish()
    }
}
