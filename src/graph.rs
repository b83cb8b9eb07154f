//! Dependency graph construction.
//!
//! [`build_graph`] turns a normalized network log and a processed trace into a
//! DAG of network and CPU nodes. The graph is immutable once built; the
//! scheduler only reads it.
//!
//! Edge rules, for a network request (first match wins):
//! 1. a redirect destination depends on the request that redirected to it;
//! 2. a request issued by a CPU task depends on that task;
//! 3. a request whose initiator URL matches a known request depends on it;
//! 4. anything else depends on the main document.
//!
//! A CPU task depends on the network response it consumed, and paint tasks
//! also depend on every stylesheet that finished before they ran.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use crate::error::{Result, SimulationError};
use crate::node::{CpuNode, NetworkNode, Node};
use crate::record::{normalize_records, resolve_redirects, NetworkRecord, ResourceType};
use crate::trace::{ProcessedTrace, TaskCategory};
use crate::types::{NodeId, SimTime};

/// A dependency edge between two nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeDependency {
    /// The node that depends on another
    pub from: NodeId,
    /// The node being depended upon
    pub to: NodeId,
}

impl NodeDependency {
    /// Creates a new dependency: `from` depends on `to`.
    pub fn new(from: NodeId, to: NodeId) -> Self {
        Self { from, to }
    }
}

/// Options controlling graph construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphOptions {
    /// CPU tasks shorter than this are dropped unless they issue requests or paint
    #[serde(default = "default_min_task_duration")]
    pub min_task_duration_ms: SimTime,
}

fn default_min_task_duration() -> SimTime {
    10.0
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            min_task_duration_ms: default_min_task_duration(),
        }
    }
}

/// An immutable DAG of network and CPU nodes.
///
/// Serialized as its nodes and edges; deserializing re-runs
/// [`DependencyGraph::new`], so a stored graph is validated like a built one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "GraphData", try_from = "GraphData")]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    dependencies: Vec<Vec<NodeId>>,
    dependents: Vec<Vec<NodeId>>,
    root: NodeId,
    topological_order: Vec<NodeId>,
}

#[derive(Serialize, Deserialize)]
struct GraphData {
    nodes: Vec<Node>,
    edges: Vec<NodeDependency>,
}

impl From<DependencyGraph> for GraphData {
    fn from(graph: DependencyGraph) -> Self {
        let edges = graph.edges().collect();
        Self {
            nodes: graph.nodes,
            edges,
        }
    }
}

impl TryFrom<GraphData> for DependencyGraph {
    type Error = SimulationError;

    fn try_from(data: GraphData) -> Result<Self> {
        DependencyGraph::new(data.nodes, &data.edges)
    }
}

impl DependencyGraph {
    /// Assembles a graph from nodes and dependency edges.
    ///
    /// Node ids must match their position in `nodes`. The root is the
    /// lowest-id node without dependencies.
    pub fn new(nodes: Vec<Node>, edges: &[NodeDependency]) -> Result<Self> {
        if nodes.is_empty() {
            return Err(SimulationError::InvalidGraph("graph has no nodes".into()));
        }
        if let Some((index, node)) = nodes.iter().enumerate().find(|(i, n)| n.id() != *i) {
            return Err(SimulationError::InvalidGraph(format!(
                "node at position {index} has id {}",
                node.id()
            )));
        }

        let mut dependencies: Vec<BTreeSet<NodeId>> = vec![BTreeSet::new(); nodes.len()];
        let mut dependents: Vec<BTreeSet<NodeId>> = vec![BTreeSet::new(); nodes.len()];
        for edge in edges {
            if edge.from >= nodes.len() || edge.to >= nodes.len() {
                return Err(SimulationError::InvalidGraph(format!(
                    "edge {} -> {} references an unknown node",
                    edge.from, edge.to
                )));
            }
            dependencies[edge.from].insert(edge.to);
            dependents[edge.to].insert(edge.from);
        }

        let dependencies: Vec<Vec<NodeId>> = dependencies.into_iter().map(|d| d.into_iter().collect()).collect();
        let dependents: Vec<Vec<NodeId>> = dependents.into_iter().map(|d| d.into_iter().collect()).collect();

        let topological_order = topological_sort(&dependencies, &dependents)?;
        let root = (0..nodes.len())
            .find(|&id| dependencies[id].is_empty())
            .ok_or(SimulationError::GraphCycle { node_id: 0 })?;

        Ok(Self {
            nodes,
            dependencies,
            dependents,
            root,
            topological_order,
        })
    }

    /// All nodes, indexed by id.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes that `id` depends on, in ascending id order.
    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes that depend on `id`, in ascending id order.
    pub fn dependents(&self, id: NodeId) -> &[NodeId] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.iter().map(Vec::len).sum()
    }

    /// All edges, ordered by dependent then dependency.
    pub fn edges(&self) -> impl Iterator<Item = NodeDependency> + '_ {
        self.dependencies
            .iter()
            .enumerate()
            .flat_map(|(from, deps)| deps.iter().map(move |&to| NodeDependency::new(from, to)))
    }

    /// The main document node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn topological_order(&self) -> &[NodeId] {
        &self.topological_order
    }

    pub fn network_nodes(&self) -> impl Iterator<Item = &NetworkNode> + '_ {
        self.nodes.iter().filter_map(Node::as_network)
    }

    pub fn cpu_nodes(&self) -> impl Iterator<Item = &CpuNode> + '_ {
        self.nodes.iter().filter_map(Node::as_cpu)
    }

    /// Observed start of the root request; metric timestamps are expressed
    /// relative to the recording's clock through this offset.
    pub fn time_origin(&self) -> SimTime {
        self.nodes[self.root].observed_start()
    }

    /// A stable hash of the graph's nodes and edges.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        serde_json::to_vec(&self.nodes).unwrap_or_default().hash(&mut hasher);
        self.dependencies.hash(&mut hasher);
        hasher.finish()
    }
}

/// Kahn's algorithm, always releasing the lowest ready id first.
fn topological_sort(dependencies: &[Vec<NodeId>], dependents: &[Vec<NodeId>]) -> Result<Vec<NodeId>> {
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<NodeId> = (0..in_degree.len()).filter(|&id| in_degree[id] == 0).collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &next in &dependents[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() != in_degree.len() {
        let node_id = (0..in_degree.len()).find(|&id| in_degree[id] > 0).unwrap_or(0);
        return Err(SimulationError::GraphCycle { node_id });
    }
    Ok(order)
}

/// Builds the dependency graph from a network log and a processed trace.
pub fn build_graph(
    records: &[NetworkRecord],
    trace: &ProcessedTrace,
    options: &GraphOptions,
) -> Result<DependencyGraph> {
    let records = normalize_records(records)?;
    trace.validate()?;
    let final_urls = resolve_redirects(&records)?;

    let mut nodes: Vec<Node> = Vec::with_capacity(records.len() + trace.len());
    let mut id_by_request: BTreeMap<&str, NodeId> = BTreeMap::new();
    for (id, record) in records.iter().enumerate() {
        let final_url = final_urls
            .get(&record.request_id)
            .cloned()
            .unwrap_or_else(|| record.url.clone());
        nodes.push(Node::Network(NetworkNode::from_record(id, record, final_url)));
        id_by_request.insert(record.request_id.as_str(), id);
    }

    let mut redirect_source: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    for (src, record) in records.iter().enumerate() {
        if let Some(dest_id) = record.redirect_destination_id.as_deref() {
            if let Some(&dest) = id_by_request.get(dest_id) {
                redirect_source.insert(dest, src);
                if let Node::Network(node) = &mut nodes[src] {
                    node.redirects_to = Some(dest);
                }
            }
        }
    }

    let root = records
        .iter()
        .enumerate()
        .find(|(id, r)| r.resource_type == ResourceType::Document && !redirect_source.contains_key(id))
        .map(|(id, _)| id)
        .ok_or(SimulationError::NoRootDocument)?;

    let mut initiating_task: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    let mut pruned = 0usize;
    for (index, event) in trace.events.iter().enumerate() {
        let keep = event.duration >= options.min_task_duration_ms
            || !event.initiated_request_ids.is_empty()
            || event.paint_marker.is_some()
            || event.category == TaskCategory::Paint;
        if !keep {
            pruned += 1;
            continue;
        }

        let id = nodes.len();
        for request_id in &event.initiated_request_ids {
            match id_by_request.get(request_id.as_str()) {
                Some(&request) => {
                    initiating_task.entry(request).or_insert(id);
                }
                None => tracing::warn!(
                    "Trace event #{} initiated unknown request '{}'",
                    index,
                    request_id
                ),
            }
        }
        nodes.push(Node::Cpu(CpuNode::from_event(id, index, event)));
    }

    let mut edges = Vec::new();
    for node in &nodes {
        match node {
            Node::Network(request) if request.id == root => {}
            Node::Network(request) => {
                let dependency = redirect_source
                    .get(&request.id)
                    .or_else(|| initiating_task.get(&request.id))
                    .copied()
                    .or_else(|| {
                        request
                            .initiator_url
                            .as_deref()
                            .and_then(|url| find_initiator(&nodes, request, url))
                    })
                    .unwrap_or(root);
                edges.push(NodeDependency::new(request.id, dependency));
            }
            Node::Cpu(task) => {
                let input = task
                    .initiator
                    .as_deref()
                    .and_then(|reference| find_consumed_response(&nodes, task, reference))
                    .unwrap_or(root);
                edges.push(NodeDependency::new(task.id, input));

                if task.category == TaskCategory::Paint {
                    for sheet in nodes.iter().filter_map(Node::as_network) {
                        if sheet.resource_type == ResourceType::Stylesheet
                            && sheet.observed_end <= task.observed_start
                        {
                            edges.push(NodeDependency::new(task.id, sheet.id));
                        }
                    }
                }
            }
        }
    }

    let graph = DependencyGraph::new(nodes, &edges)?;
    tracing::info!(
        "Built dependency graph: {} nodes ({} network, {} cpu), {} edges, {} tasks pruned",
        graph.len(),
        graph.network_nodes().count(),
        graph.cpu_nodes().count(),
        graph.edge_count(),
        pruned
    );
    Ok(graph)
}

/// Picks the request matching `url` that most recently started before
/// `request`, falling back to the first request with that URL.
fn find_initiator(nodes: &[Node], request: &NetworkNode, url: &str) -> Option<NodeId> {
    let candidates: Vec<&NetworkNode> = nodes
        .iter()
        .filter_map(Node::as_network)
        .filter(|n| n.id != request.id && n.url == url)
        .collect();

    candidates
        .iter()
        .filter(|n| n.observed_start <= request.observed_start)
        .max_by(|a, b| a.observed_start.total_cmp(&b.observed_start).then(a.id.cmp(&b.id)))
        .or_else(|| candidates.first())
        .map(|n| n.id)
}

/// Picks the latest response matching `reference` (a URL or request id) that
/// finished before `task` started, falling back to the earliest match.
fn find_consumed_response(nodes: &[Node], task: &CpuNode, reference: &str) -> Option<NodeId> {
    let candidates: Vec<&NetworkNode> = nodes
        .iter()
        .filter_map(Node::as_network)
        .filter(|n| n.url == reference || n.request_id == reference)
        .collect();

    candidates
        .iter()
        .filter(|n| n.observed_end <= task.observed_start)
        .max_by(|a, b| a.observed_end.total_cmp(&b.observed_end).then(a.id.cmp(&b.id)))
        .or_else(|| {
            candidates
                .iter()
                .min_by(|a, b| a.observed_start.total_cmp(&b.observed_start).then(a.id.cmp(&b.id)))
        })
        .map(|n| n.id)
}
