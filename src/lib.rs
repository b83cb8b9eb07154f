//! # Lantern Page-Load Simulator
//!
//! Predicts how a recorded page load would perform under different network
//! and CPU conditions, without loading the page again.
//!
//! ## Design Principles
//!
//! - **Graph-Driven**: the recorded network log and main-thread trace are
//!   turned into a dependency graph of network requests and CPU tasks, which
//!   is the only input of the scheduler.
//! - **Modeled Resources**: network nodes compete for a connection pool with
//!   per-origin and global limits; CPU nodes share a single main thread.
//! - **Deterministic**: the scheduler jumps its clock from one completion to
//!   the next and never reads the wall clock, so the same graph and
//!   calibration always produce the same schedule.
//!
//! ## Features
//!
//! - `parallel` - Simulate several calibrations concurrently using rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use lantern::{build_graph, metrics, Calibration, GraphOptions, NetworkRecord, ProcessedTrace};
//! use lantern::record::ResourceType;
//!
//! let records = vec![
//!     NetworkRecord::new("1", "https://example.com/", 0.0, 300.0)
//!         .with_resource_type(ResourceType::Document)
//!         .with_transfer_size(30_000),
//!     NetworkRecord::new("2", "https://example.com/app.js", 320.0, 600.0)
//!         .with_resource_type(ResourceType::Script)
//!         .with_transfer_size(120_000),
//! ];
//! let graph = build_graph(&records, &ProcessedTrace::default(), &GraphOptions::default()).unwrap();
//!
//! let result = lantern::simulate(&graph, &Calibration::default()).unwrap();
//! let load = metrics::extract(metrics::PAGE_LOAD, &result, &graph).unwrap();
//! println!("Simulated load: {:.0} ms", load.timing);
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use lantern::{Artifacts, SimConfig, Simulator};
//!
//! let config = SimConfig::from_file("simulation.yaml")?;
//! let artifacts = Artifacts::from_json_file("page.json")?;
//! let graph = artifacts.build_graph(&config.graph)?;
//! let calibration = config.calibration();
//! let result = Simulator::new(&graph, &calibration)
//!     .with_options(config.simulation_options())
//!     .run()?;
//! ```

pub mod types;
pub mod error;
pub mod record;
pub mod trace;
pub mod node;
pub mod graph;
pub mod calibration;
pub mod analyzer;
pub mod connection;
pub mod pool;
pub mod event;
pub mod result;
pub mod observer;
pub mod simulator;
pub mod metrics;
pub mod registry;
pub mod cache;
pub mod artifacts;
pub mod config;
pub mod stats;
pub mod parallel;

// Re-export commonly used types
pub use types::{ConnectionId, NodeId, Origin, SimTime};
pub use error::{Result, SimulationError};
pub use record::{NetworkRecord, NormalizedRecord};
pub use trace::{ProcessedTrace, TraceEvent};
pub use node::{CpuNode, NetworkNode, Node, NodeKind};
pub use graph::{build_graph, DependencyGraph, GraphOptions, NodeDependency};
pub use calibration::{Calibration, DownloadModel, LinearAdjustment, OriginOverride, ThrottlingPreset};
pub use pool::{ConnectionPool, Lease};
pub use result::{NodeTiming, SimulationResult, TimingBreakdown};
pub use observer::SimulationObserver;
pub use simulator::{simulate, SimulationOptions, Simulator};
pub use metrics::{Metric, MetricResult};
pub use registry::{create_default_registry, MetricRegistry};
pub use cache::SimulationCache;
pub use artifacts::Artifacts;
pub use config::{ConfigError, SimConfig, SimConfigBuilder};
pub use stats::{SimulationStats, StatsCollector, Timer};
pub use parallel::{simulate_profiles, ProfileRunner};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// takes precedence over `level` when set.
///
/// # Example
///
/// ```rust,ignore
/// lantern::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // a subscriber may already be installed by the host application
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
