//! Runs one graph under several calibrations at once.
//!
//! Each run is independent and single-threaded, so profiles are simulated in
//! parallel with rayon when the `parallel` feature is enabled and one after
//! the other otherwise. Results always come back in input order.
//!
//! # Feature Flag
//!
//! ```toml
//! [dependencies]
//! lantern = { version = "0.1", features = ["parallel"] }
//! ```

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use parking_lot::RwLock;

use crate::calibration::Calibration;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::result::SimulationResult;
use crate::simulator::{SimulationOptions, Simulator};

/// Counters across every batch a runner executed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileRunnerStats {
    pub batches: u64,
    pub runs: u64,
    pub failures: u64,
}

/// Simulates a graph under many calibrations.
#[derive(Debug, Default)]
pub struct ProfileRunner {
    options: SimulationOptions,
    /// Number of worker threads (0 = rayon's default)
    num_threads: usize,
    stats: RwLock<ProfileRunnerStats>,
}

impl ProfileRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: SimulationOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the number of worker threads.
    ///
    /// Pass 0 for automatic detection (uses number of CPUs).
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    /// Simulates `graph` once per calibration.
    pub fn run(&self, graph: &DependencyGraph, calibrations: &[Calibration]) -> Vec<Result<SimulationResult>> {
        let results = self.run_all(graph, calibrations);

        let failures = results.iter().filter(|r| r.is_err()).count() as u64;
        let mut stats = self.stats.write();
        stats.batches += 1;
        stats.runs += results.len() as u64;
        stats.failures += failures;
        tracing::info!(profiles = results.len(), failures, "profile batch complete");

        results
    }

    fn simulate_one(&self, graph: &DependencyGraph, calibration: &Calibration) -> Result<SimulationResult> {
        Simulator::new(graph, calibration)
            .with_options(self.options.clone())
            .run()
    }

    #[cfg(not(feature = "parallel"))]
    fn run_all(&self, graph: &DependencyGraph, calibrations: &[Calibration]) -> Vec<Result<SimulationResult>> {
        calibrations
            .iter()
            .map(|calibration| self.simulate_one(graph, calibration))
            .collect()
    }

    #[cfg(feature = "parallel")]
    fn run_all(&self, graph: &DependencyGraph, calibrations: &[Calibration]) -> Vec<Result<SimulationResult>> {
        let batch = || -> Vec<Result<SimulationResult>> {
            calibrations
                .par_iter()
                .map(|calibration| self.simulate_one(graph, calibration))
                .collect()
        };

        if self.num_threads == 0 {
            return batch();
        }
        match rayon::ThreadPoolBuilder::new().num_threads(self.num_threads).build() {
            Ok(pool) => pool.install(batch),
            Err(err) => {
                tracing::warn!("falling back to the global thread pool: {err}");
                batch()
            }
        }
    }

    pub fn stats(&self) -> ProfileRunnerStats {
        self.stats.read().clone()
    }

    /// Exports statistics as JSON.
    pub fn export_stats(&self) -> serde_json::Value {
        let stats = self.stats.read();
        serde_json::json!({
            "batches": stats.batches,
            "runs": stats.runs,
            "failures": stats.failures,
            "threads": self.num_threads,
            "parallel": cfg!(feature = "parallel"),
        })
    }
}

/// Simulates `graph` under each calibration with default options.
pub fn simulate_profiles(graph: &DependencyGraph, calibrations: &[Calibration]) -> Vec<Result<SimulationResult>> {
    ProfileRunner::new().run(graph, calibrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::ThrottlingPreset;
    use crate::graph::build_graph;
    use crate::record::{NetworkRecord, ResourceType};
    use crate::trace::ProcessedTrace;

    fn graph() -> DependencyGraph {
        let records = vec![
            NetworkRecord::new("1", "https://example.com/", 0.0, 100.0)
                .with_resource_type(ResourceType::Document)
                .with_transfer_size(20_000),
            NetworkRecord::new("2", "https://example.com/app.js", 100.0, 200.0)
                .with_resource_type(ResourceType::Script)
                .with_transfer_size(50_000),
        ];
        build_graph(&records, &ProcessedTrace::default(), &Default::default()).unwrap()
    }

    #[test]
    fn test_results_keep_input_order() {
        let graph = graph();
        let calibrations = vec![
            ThrottlingPreset::DesktopDense4g.calibration(),
            ThrottlingPreset::MobileRegular3g.calibration(),
            ThrottlingPreset::MobileSlow4g.calibration(),
        ];

        let results = simulate_profiles(&graph, &calibrations);
        assert_eq!(results.len(), 3);
        for (result, calibration) in results.iter().zip(&calibrations) {
            let expected = Simulator::new(&graph, calibration).run().unwrap();
            assert_eq!(result.as_ref().unwrap(), &expected);
        }

        let desktop = results[0].as_ref().unwrap().total_end_time;
        let slow_3g = results[1].as_ref().unwrap().total_end_time;
        assert!(desktop < slow_3g);
    }

    #[test]
    fn test_failures_are_counted() {
        let graph = graph();
        let runner = ProfileRunner::new().with_threads(2);
        let calibrations = vec![Calibration::default(), Calibration::new(0.0, 1000.0, 1.0)];

        let results = runner.run(&graph, &calibrations);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());

        let stats = runner.stats();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(runner.export_stats()["failures"], 1);
    }
}
