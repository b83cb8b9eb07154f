//! Loading recorded page-load artifacts.
//!
//! Both inputs of the graph builder live in one JSON document:
//!
//! ```json
//! {
//!   "records": [
//!     { "request_id": "1", "url": "https://example.com/", "start_time": 0,
//!       "end_time": 120, "resource_type": "Document" }
//!   ],
//!   "trace": { "events": [
//!     { "start_time": 125, "duration": 30, "category": "ParseHtml",
//!       "initiator": "https://example.com/" }
//!   ] }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigResult};
use crate::error::Result;
use crate::graph::{build_graph, DependencyGraph, GraphOptions};
use crate::record::{normalize_records, NetworkRecord, NormalizedRecord};
use crate::trace::ProcessedTrace;

/// A network log and the processed trace recorded with it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    pub records: Vec<NetworkRecord>,
    #[serde(default)]
    pub trace: ProcessedTrace,
}

impl Artifacts {
    pub fn new(records: Vec<NetworkRecord>, trace: ProcessedTrace) -> Self {
        Self { records, trace }
    }

    /// Parses artifacts from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let artifacts: Artifacts = serde_json::from_str(json)?;
        if artifacts.records.is_empty() {
            return Err(ConfigError::Validation("artifacts contain no network records".into()));
        }
        Ok(artifacts)
    }

    /// Loads artifacts from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Normalized copies of the records, for analysis.
    pub fn normalized_records(&self) -> Result<Vec<NormalizedRecord>> {
        normalize_records(&self.records)
    }

    /// Builds the dependency graph for these artifacts.
    pub fn build_graph(&self, options: &GraphOptions) -> Result<DependencyGraph> {
        build_graph(&self.records, &self.trace, options)
    }
}
