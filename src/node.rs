//! Dependency graph nodes.
//!
//! A node is either a network request or a main-thread CPU task. Nodes are
//! created once by the graph builder and never change afterwards; simulated
//! timing lives in the [`SimulationResult`](crate::result::SimulationResult).

use serde::{Deserialize, Serialize};

use crate::record::{NormalizedRecord, Priority, ResourceType};
use crate::trace::{PaintMarker, TaskCategory, TraceEvent};
use crate::types::{NodeId, Origin, SimTime};

/// Which kind of resource a node needs in order to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Network,
    Cpu,
}

/// A network request node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    pub id: NodeId,
    pub request_id: String,
    pub url: String,
    /// URL at the end of the redirect chain starting at this request
    pub final_url: String,
    pub origin: Origin,
    pub resource_type: ResourceType,
    pub transfer_size: u64,
    pub is_https: bool,
    pub is_h2: bool,
    pub is_non_network: bool,
    pub from_cache: bool,
    /// Node this request redirected to, if any
    pub redirects_to: Option<NodeId>,
    /// URL of the document or script that issued the request
    pub initiator_url: Option<String>,
    /// Connection id observed in the recording
    pub observed_connection_id: Option<u64>,
    pub priority: Option<Priority>,
    pub observed_start: SimTime,
    pub observed_end: SimTime,
    pub observed_headers_end: SimTime,
}

impl NetworkNode {
    pub(crate) fn from_record(id: NodeId, record: &NormalizedRecord, final_url: String) -> Self {
        Self {
            id,
            request_id: record.request_id.clone(),
            url: record.url.clone(),
            final_url,
            origin: record.origin.clone(),
            resource_type: record.resource_type,
            transfer_size: record.transfer_size,
            is_https: record.is_https,
            is_h2: record.is_h2,
            is_non_network: record.is_non_network,
            from_cache: record.from_cache,
            redirects_to: None,
            initiator_url: record.initiator_url.clone(),
            observed_connection_id: record.connection_id,
            priority: record.priority,
            observed_start: record.start_time,
            observed_end: record.end_time,
            observed_headers_end: record.headers_end_time,
        }
    }

    pub fn is_redirect(&self) -> bool {
        self.redirects_to.is_some()
    }

    /// Returns true if the request has to go through the connection pool.
    pub fn needs_connection(&self) -> bool {
        !self.from_cache && !self.is_non_network
    }
}

/// A main-thread task node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CpuNode {
    pub id: NodeId,
    /// Position of the task in the processed trace
    pub trace_index: usize,
    pub category: TaskCategory,
    /// Observed duration before any slowdown
    pub duration: SimTime,
    pub observed_start: SimTime,
    pub paint_marker: Option<PaintMarker>,
    pub initiator: Option<String>,
}

impl CpuNode {
    pub(crate) fn from_event(id: NodeId, trace_index: usize, event: &TraceEvent) -> Self {
        Self {
            id,
            trace_index,
            category: event.category,
            duration: event.duration,
            observed_start: event.start_time,
            paint_marker: event.paint_marker,
            initiator: event.initiator.clone(),
        }
    }

    pub fn observed_end(&self) -> SimTime {
        self.observed_start + self.duration
    }
}

/// A node of the dependency graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Network(NetworkNode),
    Cpu(CpuNode),
}

impl Node {
    pub fn id(&self) -> NodeId {
        match self {
            Node::Network(n) => n.id,
            Node::Cpu(n) => n.id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Network(_) => NodeKind::Network,
            Node::Cpu(_) => NodeKind::Cpu,
        }
    }

    pub fn observed_start(&self) -> SimTime {
        match self {
            Node::Network(n) => n.observed_start,
            Node::Cpu(n) => n.observed_start,
        }
    }

    pub fn observed_end(&self) -> SimTime {
        match self {
            Node::Network(n) => n.observed_end,
            Node::Cpu(n) => n.observed_end(),
        }
    }

    pub fn as_network(&self) -> Option<&NetworkNode> {
        match self {
            Node::Network(n) => Some(n),
            Node::Cpu(_) => None,
        }
    }

    pub fn as_cpu(&self) -> Option<&CpuNode> {
        match self {
            Node::Cpu(n) => Some(n),
            Node::Network(_) => None,
        }
    }

    /// Short human-readable label used in logs.
    pub fn label(&self) -> String {
        match self {
            Node::Network(n) => format!("#{} {}", n.id, n.url),
            Node::Cpu(n) => format!("#{} {:?} task", n.id, n.category),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NetworkRecord;

    #[test]
    fn test_network_node_from_record() {
        let record = NetworkRecord::new("r1", "https://example.com/app.js", 10.0, 40.0)
            .with_resource_type(ResourceType::Script)
            .with_transfer_size(2048)
            .normalize()
            .unwrap();
        let node = Node::Network(NetworkNode::from_record(
            3,
            &record,
            "https://example.com/app.js".into(),
        ));

        assert_eq!(node.id(), 3);
        assert_eq!(node.kind(), NodeKind::Network);
        assert_eq!(node.observed_start(), 10.0);
        assert_eq!(node.observed_end(), 40.0);

        let network = node.as_network().unwrap();
        assert!(network.needs_connection());
        assert!(!network.is_redirect());
        assert!(node.as_cpu().is_none());
    }

    #[test]
    fn test_cached_request_needs_no_connection() {
        let record = NetworkRecord::new("r1", "https://example.com/a.png", 0.0, 1.0)
            .from_cache()
            .normalize()
            .unwrap();
        let node = NetworkNode::from_record(0, &record, record.url.clone());
        assert!(!node.needs_connection());
    }

    #[test]
    fn test_cpu_node_from_event() {
        let event = TraceEvent::new(100.0, 25.0, TaskCategory::Paint)
            .with_paint_marker(PaintMarker::FirstContentfulPaint);
        let node = Node::Cpu(CpuNode::from_event(7, 2, &event));

        assert_eq!(node.kind(), NodeKind::Cpu);
        assert_eq!(node.observed_end(), 125.0);
        let cpu = node.as_cpu().unwrap();
        assert_eq!(cpu.trace_index, 2);
        assert_eq!(cpu.paint_marker, Some(PaintMarker::FirstContentfulPaint));
        assert!(node.label().contains("Paint"));
    }
}
