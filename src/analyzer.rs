//! Estimates network characteristics from an observed network log.
//!
//! The recording carries per-request phase timings. Requests that opened a
//! fresh connection reveal the origin's round-trip time through their TCP
//! handshake; every request reveals how long the server took to respond once
//! that round trip is subtracted from its time to first byte.

use std::collections::{BTreeMap, BTreeSet};

use crate::calibration::{Calibration, OriginOverride};
use crate::record::NormalizedRecord;
use crate::types::{Origin, SimTime};

/// Observed round-trip time per origin: the smallest TCP handshake among
/// requests that opened a fresh connection.
pub fn estimate_rtt_by_origin(records: &[NormalizedRecord]) -> BTreeMap<Origin, SimTime> {
    let mut rtts: BTreeMap<Origin, SimTime> = BTreeMap::new();
    for record in records.iter().filter(|r| is_observable(r)) {
        let Some(timing) = &record.timing else {
            continue;
        };
        if timing.connect_ms <= 0.0 {
            continue;
        }
        // the reported connect phase includes the TLS handshake
        let handshake = (timing.connect_ms - timing.ssl_ms.max(0.0)).max(0.0);
        if handshake <= 0.0 {
            continue;
        }
        rtts.entry(record.origin.clone())
            .and_modify(|rtt| *rtt = rtt.min(handshake))
            .or_insert(handshake);
    }
    rtts
}

/// Observed server response time per origin: the median of
/// `ttfb - dns - connect - send - rtt`, clamped at zero.
pub fn estimate_server_response_by_origin(
    records: &[NormalizedRecord],
    rtts: &BTreeMap<Origin, SimTime>,
) -> BTreeMap<Origin, SimTime> {
    let mut samples: BTreeMap<Origin, Vec<SimTime>> = BTreeMap::new();
    for record in records.iter().filter(|r| is_observable(r)) {
        let Some(rtt) = rtts.get(&record.origin) else {
            continue;
        };
        let phases = record
            .timing
            .as_ref()
            .map(|t| t.dns_ms.max(0.0) + t.connect_ms.max(0.0) + t.send_ms.max(0.0))
            .unwrap_or_default();
        let response = (record.observed_ttfb() - phases - rtt).max(0.0);
        samples.entry(record.origin.clone()).or_default().push(response);
    }

    samples
        .into_iter()
        .filter_map(|(origin, values)| median(values).map(|m| (origin, m)))
        .collect()
}

/// Per-origin overrides combining the RTT, server response and throughput
/// estimates.
pub fn estimate_origin_overrides(records: &[NormalizedRecord]) -> BTreeMap<Origin, OriginOverride> {
    let rtts = estimate_rtt_by_origin(records);
    let responses = estimate_server_response_by_origin(records, &rtts);
    let throughputs = estimate_throughput_by_origin(records);

    let origins: BTreeSet<&Origin> = rtts.keys().chain(throughputs.keys()).collect();
    origins
        .into_iter()
        .map(|origin| {
            let entry = OriginOverride {
                rtt_ms: rtts.get(origin).copied(),
                throughput_kbps: throughputs.get(origin).copied(),
                server_response_time_ms: responses.get(origin).copied(),
                ..Default::default()
            };
            (origin.clone(), entry)
        })
        .collect()
}

/// [`estimate_throughput_kbps`] over each origin's requests separately.
pub fn estimate_throughput_by_origin(records: &[NormalizedRecord]) -> BTreeMap<Origin, f64> {
    let mut by_origin: BTreeMap<&Origin, Vec<NormalizedRecord>> = BTreeMap::new();
    for record in records.iter().filter(|r| is_observable(r)) {
        by_origin.entry(&record.origin).or_default().push(record.clone());
    }

    by_origin
        .into_iter()
        .filter_map(|(origin, records)| estimate_throughput_kbps(&records).map(|kbps| (origin.clone(), kbps)))
        .collect()
}

/// Observed throughput: bytes downloaded over the total time at least one
/// download was in flight. `None` when nothing was downloaded.
pub fn estimate_throughput_kbps(records: &[NormalizedRecord]) -> Option<f64> {
    let mut intervals: Vec<(SimTime, SimTime)> = records
        .iter()
        .filter(|r| is_observable(r) && r.transfer_size > 0 && r.end_time > r.headers_end_time)
        .map(|r| (r.headers_end_time, r.end_time))
        .collect();
    let total_bytes: u64 = records
        .iter()
        .filter(|r| is_observable(r) && r.end_time > r.headers_end_time)
        .map(|r| r.transfer_size)
        .sum();
    if intervals.is_empty() || total_bytes == 0 {
        return None;
    }

    intervals.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut busy = 0.0;
    let (mut start, mut end) = intervals[0];
    for &(next_start, next_end) in &intervals[1..] {
        if next_start > end {
            busy += end - start;
            start = next_start;
        }
        end = end.max(next_end);
    }
    busy += end - start;

    (busy > 0.0).then(|| total_bytes as f64 * 8.0 / busy)
}

impl Calibration {
    /// Adds per-origin RTT, server response and throughput overrides
    /// estimated from the observed log. Explicit overrides already present
    /// take precedence.
    pub fn with_observed(mut self, records: &[NormalizedRecord]) -> Self {
        for (origin, observed) in estimate_origin_overrides(records) {
            let merged = match self.origin_overrides.get(&origin) {
                Some(existing) => existing.clone().or(&observed),
                None => observed,
            };
            self.origin_overrides.insert(origin, merged);
        }
        self
    }
}

fn is_observable(record: &NormalizedRecord) -> bool {
    !record.from_cache && !record.is_non_network
}

fn median(mut values: Vec<SimTime>) -> Option<SimTime> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
