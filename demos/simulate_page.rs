//! Page Load Simulation Example
//!
//! Loads a recorded page (network log plus main-thread trace) and a
//! simulation config, then replays the page under the config's calibration
//! and under each throttling preset.
//!
//! ```text
//! cargo run --example simulate_page -- [page.json] [simulation.yaml]
//! ```
//!
//! Without arguments a small built-in page and the default config are used.

use std::error::Error;

use lantern::metrics::ALL_METRICS;
use lantern::{
    create_default_registry, Artifacts, Calibration, DependencyGraph, SimConfig, Simulator, StatsCollector,
    ThrottlingPreset,
};

// ============================================================================
// Built-in Page
// ============================================================================

const SAMPLE_PAGE: &str = r#"{
    "records": [
        { "request_id": "1", "url": "https://shop.example/", "start_time": 0, "end_time": 180,
          "headers_end_time": 150, "resource_type": "Document", "transfer_size": 24000, "protocol": "h2" },
        { "request_id": "2", "url": "https://shop.example/site.css", "start_time": 190, "end_time": 260,
          "resource_type": "Stylesheet", "transfer_size": 12000, "initiator_url": "https://shop.example/",
          "protocol": "h2" },
        { "request_id": "3", "url": "https://cdn.shop.example/app.js", "start_time": 195, "end_time": 420,
          "resource_type": "Script", "transfer_size": 180000, "initiator_url": "https://shop.example/" },
        { "request_id": "4", "url": "https://cdn.shop.example/hero.jpg", "start_time": 430, "end_time": 610,
          "resource_type": "Image", "transfer_size": 95000, "initiator_url": "https://cdn.shop.example/app.js" }
    ],
    "trace": { "events": [
        { "start_time": 185, "duration": 25, "category": "ParseHtml", "initiator": "https://shop.example/" },
        { "start_time": 425, "duration": 140, "category": "ScriptEvaluation",
          "initiator": "https://cdn.shop.example/app.js",
          "initiated_request_ids": ["4"] },
        { "start_time": 270, "duration": 12, "category": "Paint", "initiator": "https://shop.example/",
          "paint_marker": "FirstContentfulPaint" },
        { "start_time": 620, "duration": 15, "category": "Paint", "initiator": "https://cdn.shop.example/hero.jpg",
          "paint_marker": "LargestContentfulPaint" }
    ] }
}"#;

// ============================================================================
// Reporting
// ============================================================================

fn report(
    label: &str,
    graph: &DependencyGraph,
    calibration: &Calibration,
    config: &SimConfig,
) -> Result<(), Box<dyn Error>> {
    let mut collector = StatsCollector::new();
    collector.set_name(label);

    let result = Simulator::new(graph, calibration)
        .with_options(config.simulation_options())
        .run_with_observer(&mut collector)?;

    let metrics = create_default_registry()
        .with_calibration(calibration)
        .extract_all(&config.metric_names(), &result, graph)?;

    println!("\n--- {label} ---");
    for name in &config.metric_names() {
        match metrics.timing(name) {
            Some(timing) => println!("  {name:<26} {timing:>9.1} ms"),
            None => println!("  {name:<26} {:>12}", "n/a"),
        }
    }
    if config.simulation.collect_stats {
        print!("{}", collector.stats().summary());
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let artifacts = match args.next() {
        Some(path) => Artifacts::from_json_file(path)?,
        None => Artifacts::from_json(SAMPLE_PAGE)?,
    };
    let config = match args.next() {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig::default(),
    };

    lantern::init_logging(&config.simulation.log_level);

    let graph = artifacts.build_graph(&config.graph)?;
    println!("=== Page Load Simulation ===");
    println!(
        "{} nodes ({} requests, {} tasks), {} edges",
        graph.len(),
        graph.network_nodes().count(),
        graph.cpu_nodes().count(),
        graph.edge_count()
    );
    println!("Metrics: {}", config.metrics.join(", "));

    let observed = config.calibration().with_observed(&artifacts.normalized_records()?);
    report("configured + observed", &graph, &observed, &config)?;

    for preset in [
        ThrottlingPreset::MobileSlow4g,
        ThrottlingPreset::MobileRegular3g,
        ThrottlingPreset::DesktopDense4g,
    ] {
        report(preset.name(), &graph, &preset.calibration(), &config)?;
    }

    if config.metrics.len() < ALL_METRICS.len() {
        println!("\n(config selects {} of {} metrics)", config.metrics.len(), ALL_METRICS.len());
    }
    Ok(())
}
