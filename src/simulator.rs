//! The scheduler: replays a dependency graph under a calibration.
//!
//! Nodes move through `Pending -> Queued -> InProgress -> Complete`. Each
//! scheduling pass starts every queued node whose resource is free, in
//! discovery order. The main thread is a single resource; network nodes need
//! a lease from the [`ConnectionPool`]. The clock then jumps to the earliest
//! end among in-progress nodes and everything due at that instant completes,
//! which may queue new nodes.
//!
//! A run is deterministic: ordered containers only, no randomness and no
//! wall-clock reads.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::connection::{disk_cache_time, RequestCost};
use crate::error::{Result, SimulationError};
use crate::event::TimelineEvent;
use crate::graph::DependencyGraph;
use crate::node::{CpuNode, NetworkNode, Node};
use crate::observer::{NoopObserver, SimulationObserver};
use crate::pool::{ConnectionPool, Lease};
use crate::result::{NodeTiming, SimulationResult, TimingBreakdown};
use crate::types::{NodeId, SimTime, TIME_EPSILON};

/// Knobs that change what a run records, never how it schedules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    /// Attach a [`TimingBreakdown`] to every node timing
    pub record_breakdown: bool,
    /// Record start and completion events
    pub record_timeline: bool,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            record_breakdown: true,
            record_timeline: true,
        }
    }
}

/// Lifecycle of a node during a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Queued,
    InProgress,
    Complete,
}

/// Simulates one graph under one calibration.
#[derive(Clone, Debug)]
pub struct Simulator<'a> {
    graph: &'a DependencyGraph,
    calibration: &'a Calibration,
    options: SimulationOptions,
}

impl<'a> Simulator<'a> {
    pub fn new(graph: &'a DependencyGraph, calibration: &'a Calibration) -> Self {
        Self {
            graph,
            calibration,
            options: SimulationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SimulationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn graph(&self) -> &DependencyGraph {
        self.graph
    }

    pub fn calibration(&self) -> &Calibration {
        self.calibration
    }

    pub fn options(&self) -> &SimulationOptions {
        &self.options
    }

    /// Runs the simulation to completion.
    pub fn run(&self) -> Result<SimulationResult> {
        self.run_with_observer(&mut NoopObserver)
    }

    /// Runs the simulation, reporting every scheduling decision to `observer`.
    pub fn run_with_observer(&self, observer: &mut dyn SimulationObserver) -> Result<SimulationResult> {
        self.calibration.validate()?;
        self.schedule(observer)
    }

    fn schedule(&self, observer: &mut dyn SimulationObserver) -> Result<SimulationResult> {
        let mut run = Run::new(self.graph, self.calibration, &self.options);
        observer.on_run_start(self.graph);

        while run.completed < self.graph.len() {
            run.start_eligible(observer);
            observer.on_step(run.queued.len(), run.pool.busy_count());

            let Some(next) = run.next_completion() else {
                let node_id = run
                    .states
                    .iter()
                    .position(|state| *state != NodeState::Complete)
                    .unwrap_or_default();
                tracing::warn!(node = node_id, time = run.clock, "no node can make progress");
                return Err(SimulationError::UnreachableNode { node_id });
            };

            if next > run.clock {
                observer.on_clock_advance(run.clock, next);
                run.clock = next;
                run.clock_jumps += 1;
            }
            run.complete_due(observer);
        }

        let result = run.finish();
        tracing::info!(
            nodes = result.len(),
            total_end_time = result.total_end_time,
            clock_jumps = result.clock_jumps,
            "simulation complete"
        );
        observer.on_run_end(&result);
        Ok(result)
    }
}

/// Simulates `graph` under `calibration` with default options.
pub fn simulate(graph: &DependencyGraph, calibration: &Calibration) -> Result<SimulationResult> {
    Simulator::new(graph, calibration).run()
}

struct InFlight {
    end: SimTime,
    lease: Option<Lease>,
    is_cpu: bool,
}

struct Started {
    duration: SimTime,
    lease: Option<Lease>,
    cost: Option<RequestCost>,
}

/// Mutable state of a single run.
struct Run<'a> {
    graph: &'a DependencyGraph,
    calibration: &'a Calibration,
    options: &'a SimulationOptions,
    pool: ConnectionPool,
    states: Vec<NodeState>,
    /// Incomplete dependencies per node
    remaining: Vec<usize>,
    queued: BTreeSet<NodeId>,
    queued_at: Vec<SimTime>,
    in_progress: BTreeMap<NodeId, InFlight>,
    cpu_busy: bool,
    clock: SimTime,
    clock_jumps: u64,
    completed: usize,
    timings: Vec<Option<NodeTiming>>,
    timeline: Vec<TimelineEvent>,
}

impl<'a> Run<'a> {
    fn new(graph: &'a DependencyGraph, calibration: &'a Calibration, options: &'a SimulationOptions) -> Self {
        let len = graph.len();
        let remaining: Vec<usize> = (0..len).map(|id| graph.dependencies(id).len()).collect();

        let mut states = vec![NodeState::Pending; len];
        let mut queued = BTreeSet::new();
        for (id, _) in remaining.iter().enumerate().filter(|(_, deps)| **deps == 0) {
            states[id] = NodeState::Queued;
            queued.insert(id);
        }

        Self {
            graph,
            calibration,
            options,
            pool: ConnectionPool::for_requests(calibration, graph.network_nodes()),
            states,
            remaining,
            queued,
            queued_at: vec![0.0; len],
            in_progress: BTreeMap::new(),
            cpu_busy: false,
            clock: 0.0,
            clock_jumps: 0,
            completed: 0,
            timings: vec![None; len],
            timeline: Vec::new(),
        }
    }

    fn start_eligible(&mut self, observer: &mut dyn SimulationObserver) {
        let graph = self.graph;
        let candidates: Vec<NodeId> = self.queued.iter().copied().collect();

        for id in candidates {
            let Some(node) = graph.node(id) else {
                continue;
            };
            let started = match node {
                Node::Cpu(task) => self.start_cpu(task),
                Node::Network(request) => self.start_network(request),
            };
            let Some(started) = started else {
                continue;
            };

            let start = self.clock;
            let end = start + started.duration;
            let breakdown = self.options.record_breakdown.then(|| {
                let cost = started.cost.unwrap_or_default();
                TimingBreakdown {
                    queueing: start - self.queued_at[id],
                    connection_setup: cost.connection_setup,
                    time_to_first_byte: cost.time_to_first_byte,
                    download: cost.download,
                }
            });
            let connection_id = started.lease.as_ref().map(|lease| lease.connection_id);
            let timing = NodeTiming {
                node_id: id,
                start,
                end,
                connection_id,
                breakdown,
            };

            tracing::debug!(node = id, start, end, connection = ?connection_id, "started {}", node.label());
            if self.options.record_timeline {
                self.timeline.push(TimelineEvent::started(start, id, connection_id));
            }
            observer.on_node_start(node, &timing);

            self.queued.remove(&id);
            self.states[id] = NodeState::InProgress;
            self.in_progress.insert(
                id,
                InFlight {
                    end,
                    lease: started.lease,
                    is_cpu: matches!(node, Node::Cpu(_)),
                },
            );
            self.timings[id] = Some(timing);
        }
    }

    fn start_cpu(&mut self, task: &CpuNode) -> Option<Started> {
        if self.cpu_busy {
            return None;
        }
        self.cpu_busy = true;
        Some(Started {
            duration: task.duration * self.calibration.cpu_multiplier_for(task.category),
            lease: None,
            cost: None,
        })
    }

    fn start_network(&mut self, request: &NetworkNode) -> Option<Started> {
        if !request.needs_connection() {
            let download = if request.from_cache {
                disk_cache_time(request.transfer_size)
            } else {
                0.0
            };
            return Some(Started {
                duration: download,
                lease: None,
                cost: Some(RequestCost {
                    download,
                    ..Default::default()
                }),
            });
        }

        let lease = self.pool.acquire(&request.origin, self.clock)?;
        let cost = self.pool.estimate(&lease, request, self.calibration, self.clock);
        Some(Started {
            duration: cost.total(),
            lease: Some(lease),
            cost: Some(cost),
        })
    }

    fn next_completion(&self) -> Option<SimTime> {
        self.in_progress
            .values()
            .map(|flight| flight.end)
            .min_by(|a, b| a.total_cmp(b))
    }

    fn complete_due(&mut self, observer: &mut dyn SimulationObserver) {
        let graph = self.graph;
        let due: Vec<NodeId> = self
            .in_progress
            .iter()
            .filter(|(_, flight)| flight.end <= self.clock + TIME_EPSILON)
            .map(|(&id, _)| id)
            .collect();

        for id in due {
            let Some(flight) = self.in_progress.remove(&id) else {
                continue;
            };
            if let Some(lease) = &flight.lease {
                self.pool.release(lease, self.clock);
            }
            if flight.is_cpu {
                self.cpu_busy = false;
            }
            self.states[id] = NodeState::Complete;
            self.completed += 1;

            if self.options.record_timeline {
                self.timeline.push(TimelineEvent::completed(flight.end, id));
            }
            if let Some(node) = graph.node(id) {
                observer.on_node_complete(node, flight.end);
            }

            for &dependent in graph.dependents(id) {
                self.remaining[dependent] -= 1;
                if self.remaining[dependent] == 0 {
                    self.states[dependent] = NodeState::Queued;
                    self.queued.insert(dependent);
                    self.queued_at[dependent] = self.clock;
                }
            }
        }
    }

    fn finish(self) -> SimulationResult {
        let timings: Vec<NodeTiming> = self.timings.into_iter().flatten().collect();
        let total_end_time = timings.iter().map(|t| t.end).fold(0.0, f64::max);
        SimulationResult {
            timings,
            timeline: self.timeline,
            total_end_time,
            clock_jumps: self.clock_jumps,
        }
    }
}
