//! Caller-owned memoization of simulation results.
//!
//! Entries are bucketed by the graph and calibration fingerprints plus the
//! recording options. Each entry keeps the inputs it was computed from and a
//! hit requires them to compare equal, so a fingerprint collision falls
//! through to a fresh run. The cache is shared behind a mutex and hands out
//! `Arc`s.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::calibration::Calibration;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::result::SimulationResult;
use crate::simulator::{SimulationOptions, Simulator};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    graph: u64,
    calibration: u64,
    record_breakdown: bool,
    record_timeline: bool,
}

/// Hit and miss counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug)]
struct CacheEntry {
    graph: DependencyGraph,
    calibration: Calibration,
    result: Arc<SimulationResult>,
}

impl CacheEntry {
    fn matches(&self, graph: &DependencyGraph, calibration: &Calibration) -> bool {
        self.calibration == *calibration && self.graph == *graph
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, Vec<CacheEntry>>,
    hits: u64,
    misses: u64,
}

/// Thread-safe cache of simulation results.
#[derive(Debug, Default)]
pub struct SimulationCache {
    state: Mutex<CacheState>,
}

impl SimulationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached result for `graph` under `calibration`, simulating
    /// it first if needed. Failed runs are not cached.
    pub fn get_or_simulate(&self, graph: &DependencyGraph, calibration: &Calibration) -> Result<Arc<SimulationResult>> {
        self.get_or_run(&Simulator::new(graph, calibration))
    }

    /// Like [`get_or_simulate`](Self::get_or_simulate) for a configured
    /// simulator.
    pub fn get_or_run(&self, simulator: &Simulator<'_>) -> Result<Arc<SimulationResult>> {
        let (graph, calibration) = (simulator.graph(), simulator.calibration());
        let key = Self::key(graph, calibration, simulator.options());

        if let Some(hit) = self.lookup(&key, graph, calibration) {
            return Ok(hit);
        }

        // simulate without holding the lock
        let result = Arc::new(simulator.run()?);
        let mut state = self.state.lock();
        let bucket = state.entries.entry(key).or_default();
        if let Some(entry) = bucket.iter().find(|e| e.matches(graph, calibration)) {
            return Ok(Arc::clone(&entry.result));
        }
        bucket.push(CacheEntry {
            graph: graph.clone(),
            calibration: calibration.clone(),
            result: Arc::clone(&result),
        });
        Ok(result)
    }

    fn lookup(
        &self,
        key: &CacheKey,
        graph: &DependencyGraph,
        calibration: &Calibration,
    ) -> Option<Arc<SimulationResult>> {
        let mut state = self.state.lock();
        let hit = state
            .entries
            .get(key)
            .and_then(|bucket| bucket.iter().find(|e| e.matches(graph, calibration)))
            .map(|e| Arc::clone(&e.result));
        match hit {
            Some(hit) => {
                state.hits += 1;
                tracing::trace!(graph = key.graph, calibration = key.calibration, "simulation cache hit");
                Some(hit)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    fn key(graph: &DependencyGraph, calibration: &Calibration, options: &SimulationOptions) -> CacheKey {
        CacheKey {
            graph: graph.fingerprint(),
            calibration: calibration.fingerprint(),
            record_breakdown: options.record_breakdown,
            record_timeline: options.record_timeline,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.values().map(Vec::len).sum(),
        }
    }
}
