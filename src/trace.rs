//! Processed CPU trace model.
//!
//! The trace is a list of top-level main-thread tasks that the gatherer already
//! extracted from the raw trace. Each task knows which input it consumed and
//! which requests it issued, which is all the graph builder needs to wire it
//! into the dependency graph.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimulationError};
use crate::types::SimTime;

/// The kind of main-thread work a task performed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskCategory {
    ParseHtml,
    ScriptEvaluation,
    Layout,
    Paint,
    #[default]
    Other,
}

impl TaskCategory {
    /// Returns true for rendering work, which scales differently under CPU
    /// throttling than script execution.
    pub fn is_rendering(&self) -> bool {
        matches!(self, TaskCategory::Layout | TaskCategory::Paint)
    }
}

/// Paint milestones recorded inside a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaintMarker {
    FirstContentfulPaint,
    LargestContentfulPaint,
}

/// One top-level task of the processed trace.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Observed task start (absolute ms, same clock as the network log)
    pub start_time: SimTime,
    /// Observed wall-clock duration (ms)
    pub duration: SimTime,
    #[serde(default)]
    pub category: TaskCategory,
    /// URL or request id of the response this task consumed
    #[serde(default)]
    pub initiator: Option<String>,
    /// Request ids of the requests issued while this task ran
    #[serde(default)]
    pub initiated_request_ids: Vec<String>,
    #[serde(default)]
    pub paint_marker: Option<PaintMarker>,
}

impl TraceEvent {
    /// Creates a task event.
    pub fn new(start_time: SimTime, duration: SimTime, category: TaskCategory) -> Self {
        Self {
            start_time,
            duration,
            category,
            ..Self::default()
        }
    }

    pub fn with_initiator(mut self, url_or_request_id: impl Into<String>) -> Self {
        self.initiator = Some(url_or_request_id.into());
        self
    }

    pub fn with_initiated_request(mut self, request_id: impl Into<String>) -> Self {
        self.initiated_request_ids.push(request_id.into());
        self
    }

    pub fn with_paint_marker(mut self, marker: PaintMarker) -> Self {
        self.paint_marker = Some(marker);
        self
    }

    /// Observed end of the task.
    pub fn end_time(&self) -> SimTime {
        self.start_time + self.duration
    }

    /// Checks the task's timing fields; `index` is the task's position in the
    /// trace and is only used for error context.
    pub fn validate(&self, index: usize) -> Result<()> {
        if !self.start_time.is_finite() {
            return Err(SimulationError::malformed_trace(index, "start_time is not finite"));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(SimulationError::malformed_trace(
                index,
                format!("invalid duration {}", self.duration),
            ));
        }
        Ok(())
    }
}

/// The processed trace: an ordered sequence of main-thread tasks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTrace {
    #[serde(default)]
    pub events: Vec<TraceEvent>,
}

impl ProcessedTrace {
    pub fn new(events: Vec<TraceEvent>) -> Self {
        Self { events }
    }

    pub fn validate(&self) -> Result<()> {
        self.events
            .iter()
            .enumerate()
            .try_for_each(|(index, event)| event.validate(index))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
