//! Property tests for the scheduler.
//!
//! Random pages (chains and fans of requests across a few origins, with CPU
//! tasks hanging off the responses) are simulated under random calibrations
//! and the resulting schedules are checked for:
//! - Causality along every dependency edge
//! - Per-origin connection limits and main-thread exclusivity
//! - Non-decreasing timeline
//! - Determinism of the schedule and of metric extraction

use proptest::prelude::*;

use lantern::event::TimelineEventKind;
use lantern::metrics::{self, ALL_METRICS};
use lantern::record::ResourceType;
use lantern::trace::TaskCategory;
use lantern::{
    build_graph, simulate, Calibration, DependencyGraph, DownloadModel, GraphOptions, NetworkRecord, NodeKind,
    ProcessedTrace, SimulationResult, TraceEvent,
};

const TOLERANCE: f64 = 1e-6;

// ============================================================================
// Strategies
// ============================================================================

type RequestShape = (usize, u64, prop::sample::Index);
type TaskShape = (prop::sample::Index, f64, usize);

fn request_url(id: usize, origin: usize) -> String {
    if id == 0 {
        "https://o0.test/".to_string()
    } else {
        format!("https://o{}.test/r{}", origin, id)
    }
}

fn build_page(requests: Vec<RequestShape>, tasks: Vec<TaskShape>) -> (Vec<NetworkRecord>, Vec<TraceEvent>) {
    let mut urls = vec![request_url(0, 0)];
    let mut records = vec![NetworkRecord::new("0", urls[0].clone(), 0.0, 5.0)
        .with_resource_type(ResourceType::Document)
        .with_transfer_size(20_000)];

    for (i, (origin, bytes, parent)) in requests.into_iter().enumerate() {
        let id = i + 1;
        let url = request_url(id, origin);
        let start = id as f64 * 10.0;
        let resource_type = if bytes % 2 == 0 { ResourceType::Script } else { ResourceType::Image };
        records.push(
            NetworkRecord::new(id.to_string(), url.clone(), start, start + 5.0)
                .with_resource_type(resource_type)
                .with_transfer_size(bytes)
                .with_initiator(urls[parent.index(id)].clone()),
        );
        urls.push(url);
    }

    let events = tasks
        .into_iter()
        .map(|(input, duration, category)| {
            let request = input.index(urls.len());
            let category = match category {
                0 => TaskCategory::ParseHtml,
                1 => TaskCategory::ScriptEvaluation,
                _ => TaskCategory::Layout,
            };
            TraceEvent::new(request as f64 * 10.0 + 6.0, duration, category).with_initiator(urls[request].clone())
        })
        .collect();

    (records, events)
}

fn page() -> impl Strategy<Value = (Vec<NetworkRecord>, Vec<TraceEvent>)> {
    let requests = prop::collection::vec((0usize..3, 0u64..150_000, any::<prop::sample::Index>()), 0..16);
    let tasks = prop::collection::vec((any::<prop::sample::Index>(), 10.0f64..200.0, 0usize..3), 0..10);
    (requests, tasks).prop_map(|(requests, tasks)| build_page(requests, tasks))
}

fn calibration() -> impl Strategy<Value = Calibration> {
    (1.0f64..300.0, 100.0f64..20_000.0, 1.0f64..6.0, 1usize..7, 1usize..20, any::<bool>()).prop_map(
        |(rtt, kbps, cpu, per_origin, global, slow_start)| {
            let model = if slow_start { DownloadModel::TcpSlowStart } else { DownloadModel::Throughput };
            Calibration::new(rtt, kbps, cpu)
                .with_connections_per_origin(per_origin)
                .with_max_concurrent_connections(global)
                .with_download_model(model)
        },
    )
}

fn graph_of(records: &[NetworkRecord], events: Vec<TraceEvent>) -> DependencyGraph {
    build_graph(records, &ProcessedTrace::new(events), &GraphOptions::default()).unwrap()
}

// ============================================================================
// Checks
// ============================================================================

fn max_per_origin_overlap(graph: &DependencyGraph, result: &SimulationResult) -> usize {
    let requests: Vec<_> = graph
        .network_nodes()
        .filter_map(|node| {
            let timing = result.timing(node.id)?;
            timing.connection_id.map(|_| (node.origin.as_str(), timing.start, timing.end))
        })
        .collect();

    requests
        .iter()
        .map(|&(origin, start, _)| {
            requests
                .iter()
                .filter(|&&(other, s, e)| other == origin && s <= start && e > start + TOLERANCE)
                .count()
        })
        .max()
        .unwrap_or(0)
}

fn cpu_intervals(graph: &DependencyGraph, result: &SimulationResult) -> Vec<(f64, f64)> {
    let mut intervals: Vec<(f64, f64)> = graph
        .nodes()
        .iter()
        .filter(|node| node.kind() == NodeKind::Cpu)
        .filter_map(|node| result.timing(node.id()))
        .map(|timing| (timing.start, timing.end))
        .collect();
    intervals.sort_by(|a, b| a.0.total_cmp(&b.0));
    intervals
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    /// Every node starts after all of its dependencies end.
    #[test]
    fn test_dependencies_end_before_dependents_start((records, events) in page(), calibration in calibration()) {
        let graph = graph_of(&records, events);
        let result = simulate(&graph, &calibration).unwrap();

        prop_assert_eq!(result.len(), graph.len());
        for edge in graph.edges() {
            let dependent = result.timing(edge.from).unwrap();
            let dependency = result.timing(edge.to).unwrap();
            prop_assert!(dependency.end <= dependent.start + TOLERANCE);
        }
        for timing in &result.timings {
            prop_assert!(timing.start >= 0.0);
            prop_assert!(timing.end >= timing.start);
            prop_assert!(timing.end <= result.total_end_time);
        }
    }

    /// Connection and main-thread limits hold at every instant.
    #[test]
    fn test_resource_limits_hold((records, events) in page(), calibration in calibration()) {
        let graph = graph_of(&records, events);
        let result = simulate(&graph, &calibration).unwrap();

        prop_assert!(max_per_origin_overlap(&graph, &result) <= calibration.connections_per_origin_limit);

        let cpu = cpu_intervals(&graph, &result);
        for pair in cpu.windows(2) {
            prop_assert!(pair[1].0 >= pair[0].1 - TOLERANCE);
        }
    }

    /// The timeline never moves backwards and pairs every start with a completion.
    #[test]
    fn test_timeline_is_ordered((records, events) in page(), calibration in calibration()) {
        let graph = graph_of(&records, events);
        let result = simulate(&graph, &calibration).unwrap();

        for pair in result.timeline.windows(2) {
            prop_assert!(pair[1].time >= pair[0].time - TOLERANCE);
        }
        let completions = result
            .timeline
            .iter()
            .filter(|event| event.kind == TimelineEventKind::Completed)
            .count();
        prop_assert_eq!(completions, graph.len());
        prop_assert_eq!(result.timeline.len(), graph.len() * 2);
    }

    /// Same inputs, same schedule, same metrics.
    #[test]
    fn test_runs_are_reproducible((records, events) in page(), calibration in calibration()) {
        let graph = graph_of(&records, events);
        let first = simulate(&graph, &calibration).unwrap();
        let second = simulate(&graph, &calibration).unwrap();
        prop_assert_eq!(&first, &second);

        let report = metrics::extract_all(&ALL_METRICS, &first, &graph).unwrap();
        let again = metrics::extract_all(&ALL_METRICS, &first, &graph).unwrap();
        prop_assert_eq!(report, again);
    }
}
