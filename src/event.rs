//! Scheduling events recorded during a simulation run.
//!
//! Every node produces exactly one `Started` and one `Completed` event. The
//! timeline is ordered by time, with completions at a given instant listed
//! before the starts they unblock.

use serde::{Deserialize, Serialize};

use crate::types::{ConnectionId, NodeId, SimTime};

/// A single entry of the simulation timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// The simulation time at which this event occurs
    pub time: SimTime,
    pub node_id: NodeId,
    pub kind: TimelineEventKind,
}

impl TimelineEvent {
    pub fn started(time: SimTime, node_id: NodeId, connection_id: Option<ConnectionId>) -> Self {
        Self {
            time,
            node_id,
            kind: TimelineEventKind::Started { connection_id },
        }
    }

    pub fn completed(time: SimTime, node_id: NodeId) -> Self {
        Self {
            time,
            node_id,
            kind: TimelineEventKind::Completed,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self.kind, TimelineEventKind::Started { .. })
    }
}

/// What happened to the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEventKind {
    /// The node left the queue. Network nodes carry the connection they
    /// were assigned, if any.
    Started { connection_id: Option<ConnectionId> },
    Completed,
}
