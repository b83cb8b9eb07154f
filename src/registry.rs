//! Metric registry for name-based extraction.
//!
//! The registry maps metric names to implementations and carries the
//! per-metric linear adjustments applied to extracted timings.
//!
//! # Example
//!
//! ```
//! use lantern::metrics::{Estimate, Metric, MetricContext};
//! use lantern::registry::MetricRegistry;
//!
//! struct Zero;
//! impl Metric for Zero {
//!     fn name(&self) -> &'static str {
//!         "zero"
//!     }
//!     fn compute(&self, _context: &MetricContext<'_>) -> lantern::Result<Estimate> {
//!         Ok(Estimate::at(0.0))
//!     }
//! }
//!
//! let mut registry = MetricRegistry::new();
//! registry.register(Zero);
//! assert!(registry.contains("zero"));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::calibration::{Calibration, LinearAdjustment};
use crate::error::{Result, SimulationError};
use crate::graph::DependencyGraph;
use crate::metrics::{
    FirstContentfulPaint, Interactive, LargestContentfulPaint, MaxPotentialFid, Metric, MetricContext,
    MetricReport, MetricResult, PageLoad, TotalBlockingTime,
};
use crate::result::SimulationResult;

/// A registry of metric implementations.
#[derive(Clone, Default)]
pub struct MetricRegistry {
    metrics: BTreeMap<&'static str, Arc<dyn Metric>>,
    adjustments: BTreeMap<String, LinearAdjustment>,
}

impl MetricRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the calibration's per-metric adjustments.
    pub fn with_calibration(mut self, calibration: &Calibration) -> Self {
        self.adjustments = calibration.metric_adjustments.clone();
        self
    }

    /// Registers a metric under its own name, replacing any previous one.
    pub fn register<M: Metric + 'static>(&mut self, metric: M) {
        self.metrics.insert(metric.name(), Arc::new(metric));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Metric>> {
        self.metrics.get(name)
    }

    /// Returns true if a metric is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Registered metric names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.metrics.keys().copied()
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.metrics.remove(name).is_some()
    }

    /// Computes one metric.
    pub fn extract(&self, name: &str, result: &SimulationResult, graph: &DependencyGraph) -> Result<MetricResult> {
        let metric = self.metrics.get(name).ok_or_else(|| SimulationError::UnknownMetric {
            metric: name.to_string(),
        })?;
        let estimate = metric.compute(&MetricContext::new(result, graph))?;

        let timing = match self.adjustments.get(name) {
            Some(adjustment) => adjustment.apply(estimate.timing),
            None => estimate.timing,
        };
        Ok(MetricResult {
            metric: name.to_string(),
            timing,
            timestamp: estimate.anchor.unwrap_or(timing) + graph.time_origin(),
        })
    }

    /// Computes several metrics from one result. Metrics that do not apply
    /// are listed in the report; any other error aborts.
    pub fn extract_all(
        &self,
        names: &[&str],
        result: &SimulationResult,
        graph: &DependencyGraph,
    ) -> Result<MetricReport> {
        let mut report = MetricReport::default();
        for &name in names {
            match self.extract(name, result, graph) {
                Ok(value) => {
                    report.values.insert(name.to_string(), value);
                }
                Err(err) if err.is_recoverable() => {
                    tracing::debug!(metric = name, "{err}");
                    report.not_computable.push(name.to_string());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("metrics", &self.metrics.keys().collect::<Vec<_>>())
            .field("adjustments", &self.adjustments)
            .finish()
    }
}

/// Creates a registry with every built-in metric.
pub fn create_default_registry() -> MetricRegistry {
    let mut registry = MetricRegistry::new();
    registry.register(FirstContentfulPaint);
    registry.register(LargestContentfulPaint);
    registry.register(Interactive);
    registry.register(TotalBlockingTime);
    registry.register(MaxPotentialFid);
    registry.register(PageLoad);
    registry
}
