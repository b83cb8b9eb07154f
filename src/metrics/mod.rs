//! Metric extraction from a finished simulation.
//!
//! A metric is a pure function of a [`SimulationResult`] and the graph it was
//! produced from. Timings are relative to the simulated clock; timestamps add
//! the graph's time origin so they line up with the recording.
//!
//! ```rust,ignore
//! let result = lantern::simulate(&graph, &calibration)?;
//! let fcp = lantern::metrics::extract("first-contentful-paint", &result, &graph)?;
//! println!("FCP: {:.0} ms", fcp.timing);
//! ```

pub mod interactive;
pub mod load;
pub mod paint;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::node::{CpuNode, NetworkNode, Node};
use crate::registry::create_default_registry;
use crate::result::{NodeTiming, SimulationResult};
use crate::types::SimTime;

pub use interactive::{Interactive, MaxPotentialFid, TotalBlockingTime, LONG_TASK_THRESHOLD_MS};
pub use load::PageLoad;
pub use paint::{FirstContentfulPaint, LargestContentfulPaint};

pub const FIRST_CONTENTFUL_PAINT: &str = "first-contentful-paint";
pub const LARGEST_CONTENTFUL_PAINT: &str = "largest-contentful-paint";
pub const INTERACTIVE: &str = "interactive";
pub const TOTAL_BLOCKING_TIME: &str = "total-blocking-time";
pub const MAX_POTENTIAL_FID: &str = "max-potential-fid";
pub const PAGE_LOAD: &str = "page-load";

/// Every metric the default registry knows about.
pub const ALL_METRICS: [&str; 6] = [
    FIRST_CONTENTFUL_PAINT,
    LARGEST_CONTENTFUL_PAINT,
    INTERACTIVE,
    TOTAL_BLOCKING_TIME,
    MAX_POTENTIAL_FID,
    PAGE_LOAD,
];

/// A computed metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric: String,
    /// Value in simulated milliseconds
    pub timing: SimTime,
    /// Point on the recording's clock the metric refers to
    pub timestamp: SimTime,
}

/// Raw output of [`Metric::compute`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Estimate {
    pub timing: SimTime,
    /// Simulated time the metric is anchored at, when that is not `timing`
    /// itself
    pub anchor: Option<SimTime>,
}

impl Estimate {
    pub fn at(timing: SimTime) -> Self {
        Self { timing, anchor: None }
    }

    pub fn anchored(timing: SimTime, anchor: SimTime) -> Self {
        Self {
            timing,
            anchor: Some(anchor),
        }
    }
}

/// Read-only view over a simulation used by metric implementations.
#[derive(Clone, Copy, Debug)]
pub struct MetricContext<'a> {
    pub result: &'a SimulationResult,
    pub graph: &'a DependencyGraph,
}

impl<'a> MetricContext<'a> {
    pub fn new(result: &'a SimulationResult, graph: &'a DependencyGraph) -> Self {
        Self { result, graph }
    }

    /// CPU nodes paired with their simulated timing.
    pub fn cpu_tasks(&self) -> impl Iterator<Item = (&'a CpuNode, &'a NodeTiming)> + 'a {
        let result = self.result;
        self.graph
            .nodes()
            .iter()
            .filter_map(Node::as_cpu)
            .filter_map(move |task| result.timing(task.id).map(|timing| (task, timing)))
    }

    /// Network nodes paired with their simulated timing.
    pub fn requests(&self) -> impl Iterator<Item = (&'a NetworkNode, &'a NodeTiming)> + 'a {
        let result = self.result;
        self.graph
            .nodes()
            .iter()
            .filter_map(Node::as_network)
            .filter_map(move |request| result.timing(request.id).map(|timing| (request, timing)))
    }
}

/// A named metric.
pub trait Metric: Send + Sync {
    fn name(&self) -> &'static str;

    /// Computes the metric, or fails with `MetricNotComputable` when the
    /// simulation has nothing it can be read from.
    fn compute(&self, context: &MetricContext<'_>) -> Result<Estimate>;
}

/// Output of [`MetricRegistry::extract_all`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub values: BTreeMap<String, MetricResult>,
    /// Metrics that did not apply to this simulation
    pub not_computable: Vec<String>,
}

impl MetricReport {
    pub fn get(&self, metric: &str) -> Option<&MetricResult> {
        self.values.get(metric)
    }

    pub fn timing(&self, metric: &str) -> Option<SimTime> {
        self.values.get(metric).map(|m| m.timing)
    }
}

/// Extracts one metric with the default registry.
pub fn extract(metric: &str, result: &SimulationResult, graph: &DependencyGraph) -> Result<MetricResult> {
    create_default_registry().extract(metric, result, graph)
}

/// Extracts one metric with the default registry and the calibration's
/// per-metric adjustments.
pub fn extract_calibrated(
    metric: &str,
    result: &SimulationResult,
    graph: &DependencyGraph,
    calibration: &Calibration,
) -> Result<MetricResult> {
    create_default_registry()
        .with_calibration(calibration)
        .extract(metric, result, graph)
}

/// Extracts several metrics with the default registry.
pub fn extract_all(metrics: &[&str], result: &SimulationResult, graph: &DependencyGraph) -> Result<MetricReport> {
    create_default_registry().extract_all(metrics, result, graph)
}

/// The earliest-ending entry, ties broken by node id.
pub(crate) fn first_ending<'a, T>(
    items: impl Iterator<Item = (T, &'a NodeTiming)>,
) -> Option<(T, &'a NodeTiming)> {
    items.min_by(|(_, a), (_, b)| a.end.total_cmp(&b.end).then(a.node_id.cmp(&b.node_id)))
}

/// The latest-ending entry, ties broken by node id.
pub(crate) fn last_ending<'a, T>(
    items: impl Iterator<Item = (T, &'a NodeTiming)>,
) -> Option<(T, &'a NodeTiming)> {
    items.max_by(|(_, a), (_, b)| a.end.total_cmp(&b.end).then(b.node_id.cmp(&a.node_id)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::graph::{DependencyGraph, NodeDependency};
    use crate::node::{CpuNode, NetworkNode, Node};
    use crate::record::{NetworkRecord, ResourceType};
    use crate::result::{NodeTiming, SimulationResult};
    use crate::trace::{PaintMarker, TaskCategory, TraceEvent};
    use crate::types::SimTime;

    /// Builds a graph of a root document followed by the given CPU tasks,
    /// together with a result placing each node at the given times.
    pub fn fixture(
        document_end: SimTime,
        tasks: &[(TaskCategory, Option<PaintMarker>, SimTime, SimTime)],
    ) -> (DependencyGraph, SimulationResult) {
        let record = NetworkRecord::new("doc", "https://example.com/", 1000.0, 1100.0)
            .with_resource_type(ResourceType::Document)
            .normalize()
            .unwrap();
        let mut nodes = vec![Node::Network(NetworkNode::from_record(
            0,
            &record,
            record.url.clone(),
        ))];
        let mut timings = vec![NodeTiming {
            node_id: 0,
            start: 0.0,
            end: document_end,
            connection_id: Some(0),
            breakdown: None,
        }];
        let mut edges = Vec::new();

        for (index, &(category, marker, start, end)) in tasks.iter().enumerate() {
            let id = index + 1;
            let mut event = TraceEvent::new(1100.0, end - start, category);
            if let Some(marker) = marker {
                event = event.with_paint_marker(marker);
            }
            nodes.push(Node::Cpu(CpuNode::from_event(id, index, &event)));
            timings.push(NodeTiming {
                node_id: id,
                start,
                end,
                connection_id: None,
                breakdown: None,
            });
            edges.push(NodeDependency::new(id, 0));
        }

        let total_end_time = timings.iter().map(|t| t.end).fold(0.0, f64::max);
        let graph = DependencyGraph::new(nodes, &edges).unwrap();
        let result = SimulationResult {
            timings,
            timeline: Vec::new(),
            total_end_time,
            clock_jumps: 0,
        };
        (graph, result)
    }
}
