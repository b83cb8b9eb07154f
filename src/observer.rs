//! Hooks into a running simulation.
//!
//! Observers see every scheduling decision without being able to change it.
//! All methods have empty default implementations.

use crate::graph::DependencyGraph;
use crate::node::Node;
use crate::result::{NodeTiming, SimulationResult};
use crate::types::SimTime;

/// Receives scheduling callbacks from [`Simulator::run_with_observer`].
///
/// [`Simulator::run_with_observer`]: crate::simulator::Simulator::run_with_observer
pub trait SimulationObserver {
    fn on_run_start(&mut self, _graph: &DependencyGraph) {}

    /// A node left the queue; `timing` holds its simulated start and end.
    fn on_node_start(&mut self, _node: &Node, _timing: &NodeTiming) {}

    fn on_node_complete(&mut self, _node: &Node, _time: SimTime) {}

    fn on_clock_advance(&mut self, _from: SimTime, _to: SimTime) {}

    /// Called once per scheduling pass, after eligible nodes were started.
    fn on_step(&mut self, _queued: usize, _busy_connections: usize) {}

    fn on_run_end(&mut self, _result: &SimulationResult) {}
}

/// Observer that ignores every callback.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl SimulationObserver for NoopObserver {}
