//! Statistics collection and export for simulation runs.
//!
//! [`StatsCollector`] is a [`SimulationObserver`] that aggregates scheduling
//! counters while a run progresses; the resulting [`SimulationStats`] can be
//! exported as JSON, CSV or a human-readable summary.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::graph::DependencyGraph;
use crate::node::{Node, NodeKind};
use crate::observer::SimulationObserver;
use crate::result::{NodeTiming, SimulationResult};
use crate::types::SimTime;

/// Counters gathered while a graph was scheduled.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationStats {
    pub metadata: SimulationMetadata,
    pub run: RunStats,
    /// Cost of the run itself, in host time
    pub timing: TimingStats,
}

/// Labels identifying a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetadata {
    pub name: String,
    /// Host clock when scheduling began, as `<unix seconds>s`
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    /// Version of this crate
    pub version: String,
}

/// Scheduler-level statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub node_count: usize,
    pub network_nodes: usize,
    pub cpu_nodes: usize,
    pub edge_count: usize,

    /// Simulated end time of the last node
    pub final_time: SimTime,

    pub nodes_started: u64,
    pub nodes_completed: u64,
    pub clock_jumps: u64,

    /// Largest number of nodes waiting for a resource at once
    pub peak_queue_size: usize,

    /// Largest number of simultaneously busy connections
    pub peak_busy_connections: usize,

    /// Sum of per-node queueing time, when breakdowns are recorded
    pub total_queueing_ms: SimTime,

    /// Total simulated main-thread busy time
    pub cpu_busy_ms: SimTime,
}

/// Host-side cost of a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    pub wall_time_ms: f64,

    /// Nodes scheduled per wall-clock second
    pub nodes_per_second: f64,
}

impl SimulationStats {
    pub fn new() -> Self {
        Self {
            metadata: SimulationMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    pub fn mark_started(&mut self) {
        self.metadata.started_at = Some(unix_timestamp());
    }

    pub fn mark_finished(&mut self) {
        self.metadata.finished_at = Some(unix_timestamp());
    }

    /// Stores the host time the run took and derives the scheduling rate.
    pub fn set_wall_time(&mut self, elapsed_ms: f64) {
        self.timing.wall_time_ms = elapsed_ms;
        if elapsed_ms > 0.0 {
            self.timing.nodes_per_second = self.run.nodes_completed as f64 * 1000.0 / elapsed_ms;
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// One `metric,value` row per counter.
    pub fn to_csv(&self) -> String {
        let run = &self.run;
        let rows: [(&str, String); 14] = [
            ("node_count", run.node_count.to_string()),
            ("network_nodes", run.network_nodes.to_string()),
            ("cpu_nodes", run.cpu_nodes.to_string()),
            ("edge_count", run.edge_count.to_string()),
            ("final_time", format!("{:.3}", run.final_time)),
            ("nodes_started", run.nodes_started.to_string()),
            ("nodes_completed", run.nodes_completed.to_string()),
            ("clock_jumps", run.clock_jumps.to_string()),
            ("peak_queue_size", run.peak_queue_size.to_string()),
            ("peak_busy_connections", run.peak_busy_connections.to_string()),
            ("total_queueing_ms", format!("{:.3}", run.total_queueing_ms)),
            ("cpu_busy_ms", format!("{:.3}", run.cpu_busy_ms)),
            ("wall_time_ms", format!("{:.2}", self.timing.wall_time_ms)),
            ("nodes_per_second", format!("{:.2}", self.timing.nodes_per_second)),
        ];

        let mut csv = String::from("metric,value\n");
        for (name, value) in rows {
            csv.push_str(name);
            csv.push(',');
            csv.push_str(&value);
            csv.push('\n');
        }
        csv
    }

    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Writes a plain-text report.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        match self.metadata.name.as_str() {
            "" => writeln!(w, "=== Page-load simulation ===")?,
            name => writeln!(w, "=== Page-load simulation: {name} ===")?,
        }
        writeln!(w, "Version: {}", self.metadata.version)?;
        if let (Some(started), Some(finished)) = (&self.metadata.started_at, &self.metadata.finished_at) {
            writeln!(w, "Host clock: {started} .. {finished}")?;
        }
        writeln!(w)?;

        let run = &self.run;
        writeln!(w, "--- Graph ---")?;
        writeln!(
            w,
            "Nodes: {} ({} network, {} cpu)",
            run.node_count, run.network_nodes, run.cpu_nodes
        )?;
        writeln!(w, "Edges: {}", run.edge_count)?;
        writeln!(w)?;

        writeln!(w, "--- Scheduler ---")?;
        writeln!(w, "Final simulated time: {:.1} ms", run.final_time)?;
        writeln!(w, "Nodes completed: {}/{}", run.nodes_completed, run.node_count)?;
        writeln!(w, "Clock jumps: {}", run.clock_jumps)?;
        writeln!(w, "Peak queue size: {}", run.peak_queue_size)?;
        writeln!(w, "Peak busy connections: {}", run.peak_busy_connections)?;
        writeln!(w, "Total queueing: {:.1} ms", run.total_queueing_ms)?;
        writeln!(w, "Main thread busy: {:.1} ms", run.cpu_busy_ms)?;
        writeln!(w)?;

        writeln!(w, "--- Host ---")?;
        writeln!(
            w,
            "{:.2} ms, {:.0} nodes/s",
            self.timing.wall_time_ms, self.timing.nodes_per_second
        )?;

        Ok(())
    }

    pub fn summary(&self) -> String {
        let mut out = Vec::new();
        match self.write_summary(&mut out) {
            Ok(()) => String::from_utf8_lossy(&out).into_owned(),
            Err(_) => String::new(),
        }
    }
}

/// Measures host time spent in a run.
#[derive(Debug)]
pub struct Timer {
    started: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self { started: Instant::now() }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1e3
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

fn unix_timestamp() -> String {
    let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    format!("{}s", since_epoch.as_secs())
}

/// Observer that fills a [`SimulationStats`] as the scheduler runs.
#[derive(Debug, Default)]
pub struct StatsCollector {
    stats: SimulationStats,
    timer: Option<Timer>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            stats: SimulationStats::new(),
            timer: None,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.stats.metadata.name = name.into();
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn into_stats(self) -> SimulationStats {
        self.stats
    }
}

impl SimulationObserver for StatsCollector {
    fn on_run_start(&mut self, graph: &DependencyGraph) {
        self.stats.mark_started();
        self.timer = Some(Timer::start());

        let run = &mut self.stats.run;
        run.node_count = graph.len();
        run.network_nodes = graph.network_nodes().count();
        run.cpu_nodes = graph.cpu_nodes().count();
        run.edge_count = graph.edge_count();
    }

    fn on_node_start(&mut self, node: &Node, timing: &NodeTiming) {
        let run = &mut self.stats.run;
        run.nodes_started += 1;
        if let Some(breakdown) = &timing.breakdown {
            run.total_queueing_ms += breakdown.queueing;
        }
        if node.kind() == NodeKind::Cpu {
            run.cpu_busy_ms += timing.duration();
        }
    }

    fn on_node_complete(&mut self, _node: &Node, _time: SimTime) {
        self.stats.run.nodes_completed += 1;
    }

    fn on_clock_advance(&mut self, _from: SimTime, _to: SimTime) {
        self.stats.run.clock_jumps += 1;
    }

    fn on_step(&mut self, queued: usize, busy_connections: usize) {
        let run = &mut self.stats.run;
        run.peak_queue_size = run.peak_queue_size.max(queued);
        run.peak_busy_connections = run.peak_busy_connections.max(busy_connections);
    }

    fn on_run_end(&mut self, result: &SimulationResult) {
        self.stats.run.final_time = result.total_end_time;
        if let Some(timer) = self.timer.take() {
            self.stats.set_wall_time(timer.elapsed_ms());
        }
        self.stats.mark_finished();
    }
}
