//! Error taxonomy for graph construction, simulation and metric extraction.

use thiserror::Error;

use crate::types::NodeId;

/// Errors produced by the simulator core.
///
/// Every variant except [`SimulationError::MetricNotComputable`] is fatal for
/// the run that produced it: no partial results are returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("malformed network record '{request_id}': {reason}")]
    MalformedRecord { request_id: String, reason: String },

    #[error("malformed trace event #{index}: {reason}")]
    MalformedTraceEvent { index: usize, reason: String },

    #[error("network log has no main document request")]
    NoRootDocument,

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("dependency cycle detected at node {node_id}")]
    GraphCycle { node_id: NodeId },

    #[error("node {node_id} can never be scheduled")]
    UnreachableNode { node_id: NodeId },

    #[error("metric '{metric}' is not computable for this simulation")]
    MetricNotComputable { metric: String },

    #[error("unknown metric '{metric}'")]
    UnknownMetric { metric: String },

    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),
}

impl SimulationError {
    pub(crate) fn malformed_record(request_id: impl Into<String>, reason: impl Into<String>) -> Self {
        SimulationError::MalformedRecord {
            request_id: request_id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed_trace(index: usize, reason: impl Into<String>) -> Self {
        SimulationError::MalformedTraceEvent {
            index,
            reason: reason.into(),
        }
    }

    pub(crate) fn not_computable(metric: impl Into<String>) -> Self {
        SimulationError::MetricNotComputable {
            metric: metric.into(),
        }
    }

    /// Returns true if the caller may treat this error as "not applicable"
    /// rather than a failed run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SimulationError::MetricNotComputable { .. })
    }
}

/// Result type for simulator operations.
pub type Result<T> = std::result::Result<T, SimulationError>;
