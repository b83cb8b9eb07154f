//! Output of a simulation run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::event::TimelineEvent;
use crate::types::{ConnectionId, NodeId, SimTime};

/// Where a node's simulated time went.
///
/// For network nodes `connection_setup + time_to_first_byte + download`
/// equals the node's simulated duration. CPU nodes only report `queueing`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingBreakdown {
    /// Time between becoming ready and starting
    pub queueing: SimTime,
    pub connection_setup: SimTime,
    pub time_to_first_byte: SimTime,
    pub download: SimTime,
}

/// Simulated timing of one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeTiming {
    pub node_id: NodeId,
    pub start: SimTime,
    pub end: SimTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<TimingBreakdown>,
}

impl NodeTiming {
    pub fn duration(&self) -> SimTime {
        self.end - self.start
    }
}

/// Complete schedule produced by the simulator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Per-node timing, indexed by node id
    pub timings: Vec<NodeTiming>,
    /// Start and completion events in scheduling order
    pub timeline: Vec<TimelineEvent>,
    /// End of the last node to complete
    pub total_end_time: SimTime,
    /// Number of times the clock advanced
    pub clock_jumps: u64,
}

impl SimulationResult {
    pub fn timing(&self, id: NodeId) -> Option<&NodeTiming> {
        self.timings.get(id)
    }

    pub fn len(&self) -> usize {
        self.timings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timings.is_empty()
    }

    /// Nodes ordered by simulated start time, ties broken by id.
    pub fn by_start_time(&self) -> Vec<&NodeTiming> {
        let mut ordered: Vec<&NodeTiming> = self.timings.iter().collect();
        ordered.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.node_id.cmp(&b.node_id)));
        ordered
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
