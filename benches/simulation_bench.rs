//! Performance benchmarks for the page-load simulator.
//!
//! Run with: `cargo bench`
//! Or for specific bench: `cargo bench --bench simulation_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use lantern::metrics::ALL_METRICS;
use lantern::record::ResourceType;
use lantern::trace::TaskCategory;
use lantern::{
    build_graph, create_default_registry, simulate, simulate_profiles, Calibration, DependencyGraph, DownloadModel,
    GraphOptions, NetworkRecord, ProcessedTrace, SimulationCache, ThrottlingPreset, TraceEvent,
};

// ============================================================================
// Synthetic Pages
// ============================================================================

/// A page with `requests` subresources spread over 8 origins, each script
/// followed by an evaluation task.
fn synthetic_page(requests: usize) -> (Vec<NetworkRecord>, ProcessedTrace) {
    let mut records = vec![NetworkRecord::new("0", "https://example.com/", 0.0, 200.0)
        .with_resource_type(ResourceType::Document)
        .with_transfer_size(40_000)];
    let mut events = vec![TraceEvent::new(210.0, 40.0, TaskCategory::ParseHtml).with_initiator("https://example.com/")];

    for i in 1..=requests {
        let url = format!("https://cdn{}.example.com/asset-{}", i % 8, i);
        let start = 220.0 + i as f64;
        let is_script = i % 3 == 0;
        let resource_type = if is_script { ResourceType::Script } else { ResourceType::Image };
        // every fourth request is issued by an earlier script
        let initiator = if i % 4 == 0 && i > 3 {
            let script = (i - 1) / 3 * 3;
            format!("https://cdn{}.example.com/asset-{}", script % 8, script)
        } else {
            "https://example.com/".to_string()
        };

        records.push(
            NetworkRecord::new(i.to_string(), url.clone(), start, start + 80.0)
                .with_resource_type(resource_type)
                .with_transfer_size(5_000 + (i as u64 * 7_919) % 90_000)
                .with_initiator(initiator),
        );
        if is_script {
            let duration = 15.0 + (i % 7) as f64 * 10.0;
            events.push(TraceEvent::new(start + 90.0, duration, TaskCategory::ScriptEvaluation).with_initiator(url));
        }
    }

    (records, ProcessedTrace::new(events))
}

fn synthetic_graph(requests: usize) -> DependencyGraph {
    let (records, trace) = synthetic_page(requests);
    build_graph(&records, &trace, &GraphOptions::default()).unwrap()
}

// ============================================================================
// Graph Construction Benchmarks
// ============================================================================

fn bench_build_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_graph");

    for requests in [10, 100, 500].iter() {
        let (records, trace) = synthetic_page(*requests);
        group.throughput(Throughput::Elements(records.len() as u64 + trace.len() as u64));
        group.bench_with_input(BenchmarkId::new("requests", requests), requests, |b, _| {
            b.iter(|| black_box(build_graph(&records, &trace, &GraphOptions::default()).unwrap()));
        });
    }

    group.finish();
}

// ============================================================================
// Scheduler Benchmarks
// ============================================================================

fn bench_simulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulate");
    let calibration = Calibration::default();

    for requests in [10, 100, 1000].iter() {
        let graph = synthetic_graph(*requests);
        group.throughput(Throughput::Elements(graph.len() as u64));
        group.bench_with_input(BenchmarkId::new("nodes", graph.len()), &graph, |b, graph| {
            b.iter(|| black_box(simulate(graph, &calibration).unwrap()));
        });
    }

    group.finish();
}

fn bench_download_models(c: &mut Criterion) {
    let mut group = c.benchmark_group("download_model");
    let graph = synthetic_graph(200);

    for model in [DownloadModel::Throughput, DownloadModel::TcpSlowStart] {
        let calibration = Calibration::default().with_download_model(model);
        group.bench_function(format!("{model:?}"), |b| {
            b.iter(|| black_box(simulate(&graph, &calibration).unwrap()));
        });
    }

    group.finish();
}

// ============================================================================
// Metrics, Cache and Profiles
// ============================================================================

fn bench_extract_metrics(c: &mut Criterion) {
    let graph = synthetic_graph(200);
    let result = simulate(&graph, &Calibration::default()).unwrap();
    let registry = create_default_registry();

    c.bench_function("extract_all_metrics", |b| {
        b.iter(|| black_box(registry.extract_all(&ALL_METRICS, &result, &graph).unwrap()));
    });
}

fn bench_cache_hit(c: &mut Criterion) {
    let graph = synthetic_graph(200);
    let calibration = Calibration::default();
    let cache = SimulationCache::new();
    cache.get_or_simulate(&graph, &calibration).unwrap();

    c.bench_function("cache_hit", |b| {
        b.iter(|| black_box(cache.get_or_simulate(&graph, &calibration).unwrap()));
    });
}

fn bench_profiles(c: &mut Criterion) {
    let mut group = c.benchmark_group("profiles");
    let graph = synthetic_graph(200);
    let calibrations: Vec<Calibration> = (1..=16)
        .map(|i| {
            ThrottlingPreset::MobileSlow4g
                .calibration()
                .with_cpu_slowdown(1.0 + i as f64 * 0.25)
        })
        .collect();

    group.throughput(Throughput::Elements(calibrations.len() as u64));
    group.bench_function("sequential", |b| {
        b.iter(|| {
            let results: Vec<_> = calibrations.iter().map(|c| simulate(&graph, c)).collect();
            black_box(results)
        });
    });
    group.bench_function("batch", |b| {
        b.iter(|| black_box(simulate_profiles(&graph, &calibrations)));
    });

    group.finish();
}

// ============================================================================
// Criterion Groups
// ============================================================================

criterion_group!(
    benches,
    bench_build_graph,
    bench_simulate,
    bench_download_models,
    bench_extract_metrics,
    bench_cache_hit,
    bench_profiles,
);

criterion_main!(benches);
