//! Simulated TCP/TLS connections and the per-request cost model.
//!
//! A [`Connection`] is cold until its handshake has been paid for once; after
//! that every request on it skips DNS, TCP and TLS setup. The cost of one
//! request is split into the phases reported in the node breakdown:
//!
//! | Phase | Cold connection | Warm connection |
//! |-------|-----------------|-----------------|
//! | `connection_setup` | `dns + rtt + (https ? rtt : 0)` | `0` |
//! | `time_to_first_byte` | `rtt + server_response_time` | same |
//! | `download` | `bytes * 8 / kbps` | same |
//!
//! Observed per-origin values from the calibration replace the synthetic
//! formulas where present.

use serde::{Deserialize, Serialize};

use crate::calibration::{Calibration, DownloadModel};
use crate::node::NetworkNode;
use crate::pool::DnsCache;
use crate::types::{ConnectionId, Origin, SimTime, TIME_EPSILON};

/// Initial congestion window, in segments.
pub const INITIAL_CONGESTION_WINDOW: u32 = 10;

/// TCP segment payload size in bytes.
pub const TCP_SEGMENT_SIZE: u64 = 1460;

/// Whether a connection still has to pay for its handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Cold,
    Warm,
}

/// Simulated cost of a single request, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestCost {
    pub connection_setup: SimTime,
    pub time_to_first_byte: SimTime,
    pub download: SimTime,
}

impl RequestCost {
    pub fn total(&self) -> SimTime {
        self.connection_setup + self.time_to_first_byte + self.download
    }
}

/// One simulated connection bound to an origin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub origin: Origin,
    pub is_h2: bool,
    /// Time the handshake completes; `None` until the first request
    ready_at: Option<SimTime>,
    congestion_window: u32,
    in_flight: usize,
    requests_served: usize,
}

impl Connection {
    pub fn new(id: ConnectionId, origin: impl Into<Origin>, is_h2: bool) -> Self {
        Self {
            id,
            origin: origin.into(),
            is_h2,
            ready_at: None,
            congestion_window: INITIAL_CONGESTION_WINDOW,
            in_flight: 0,
            requests_served: 0,
        }
    }

    /// State of the connection at simulated time `now`.
    pub fn state(&self, now: SimTime) -> ConnectionState {
        match self.ready_at {
            Some(ready) if ready <= now + TIME_EPSILON => ConnectionState::Warm,
            _ => ConnectionState::Cold,
        }
    }

    /// Returns true once a handshake has been started on this connection.
    pub fn is_established(&self) -> bool {
        self.ready_at.is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn requests_served(&self) -> usize {
        self.requests_served
    }

    pub fn congestion_window(&self) -> u32 {
        self.congestion_window
    }

    pub(crate) fn begin_request(&mut self) {
        self.in_flight += 1;
        self.requests_served += 1;
    }

    pub(crate) fn end_request(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Computes the cost of serving `request` on this connection starting at
    /// `now`, and records the handshake and congestion window it leaves behind.
    pub fn estimate(
        &mut self,
        request: &NetworkNode,
        calibration: &Calibration,
        dns: &mut DnsCache,
        now: SimTime,
    ) -> RequestCost {
        let origin = request.origin.as_str();
        let rtt = calibration.rtt_for(origin);

        let connection_setup = match self.ready_at {
            Some(ready) => (ready - now).max(0.0),
            None => {
                let setup = calibration.connection_setup_for(origin).unwrap_or_else(|| {
                    let dns_time = dns.time_until_resolved(origin, now, rtt * calibration.dns_rtt_multiplier);
                    let tls = if request.is_https { rtt } else { 0.0 };
                    dns_time + rtt + tls
                });
                self.ready_at = Some(now + setup);
                setup
            }
        };

        let time_to_first_byte = rtt + calibration.server_response_time_for(origin);
        let throughput = calibration.throughput_for(origin);
        let download = match calibration.download_model {
            DownloadModel::Throughput => transfer_time(request.transfer_size, throughput),
            DownloadModel::TcpSlowStart => self.slow_start_download(request.transfer_size, rtt, throughput),
        };

        RequestCost {
            connection_setup,
            time_to_first_byte,
            download,
        }
    }

    /// Round trips needed to deliver `bytes` while the congestion window
    /// doubles up to the bandwidth-delay product. The first window arrives
    /// with the first byte.
    fn slow_start_download(&mut self, bytes: u64, rtt: SimTime, throughput_kbps: f64) -> SimTime {
        let bytes_per_ms = throughput_kbps / 8.0;
        let max_window = ((bytes_per_ms * rtt) / TCP_SEGMENT_SIZE as f64).floor().max(1.0) as u32;

        let mut window = self.congestion_window.clamp(1, max_window);
        let mut delivered = u64::from(window) * TCP_SEGMENT_SIZE;
        let mut elapsed = 0.0;
        while delivered < bytes {
            elapsed += rtt;
            window = window.saturating_mul(2).min(max_window);
            delivered += u64::from(window) * TCP_SEGMENT_SIZE;
        }

        self.congestion_window = window;
        elapsed
    }
}

/// Time to push `bytes` through a link of `throughput_kbps` (1 kbps = 1 bit/ms).
pub fn transfer_time(bytes: u64, throughput_kbps: f64) -> SimTime {
    if bytes == 0 {
        return 0.0;
    }
    bytes as f64 * 8.0 / throughput_kbps
}

/// Cost of reading a response from the disk cache: a seek plus a read
/// proportional to its size.
pub fn disk_cache_time(bytes: u64) -> SimTime {
    let size_in_mib = bytes as f64 / (1024.0 * 1024.0);
    8.0 + 20.0 * size_in_mib
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NetworkRecord;

    fn request(url: &str, bytes: u64) -> NetworkNode {
        let record = NetworkRecord::new("r", url, 0.0, 1.0)
            .with_transfer_size(bytes)
            .normalize()
            .unwrap();
        NetworkNode::from_record(0, &record, url.to_string())
    }

    #[test]
    fn test_transfer_time() {
        assert_eq!(transfer_time(1000, 1600.0), 5.0);
        assert_eq!(transfer_time(0, 1600.0), 0.0);
        assert_eq!(disk_cache_time(0), 8.0);
        assert_eq!(disk_cache_time(1024 * 1024), 28.0);
    }

    #[test]
    fn test_cold_then_warm() {
        let calibration = Calibration::new(100.0, 1600.0, 1.0);
        let mut dns = DnsCache::default();
        let mut connection = Connection::new(0, "https://example.com", false);
        let req = request("https://example.com/", 1000);

        assert_eq!(connection.state(0.0), ConnectionState::Cold);
        let cold = connection.estimate(&req, &calibration, &mut dns, 0.0);
        // dns (2 rtt) + tcp + tls
        assert_eq!(cold.connection_setup, 400.0);
        assert_eq!(cold.time_to_first_byte, 100.0);
        assert_eq!(cold.download, 5.0);
        assert_eq!(connection.state(400.0), ConnectionState::Warm);

        let warm = connection.estimate(&req, &calibration, &mut dns, 505.0);
        assert_eq!(warm.connection_setup, 0.0);
        assert_eq!(warm.total(), 105.0);
    }

    #[test]
    fn test_http_skips_tls_and_dns_is_cached() {
        let calibration = Calibration::new(50.0, 1600.0, 1.0);
        let mut dns = DnsCache::default();
        let req = request("http://example.com/", 0);

        let mut first = Connection::new(0, "http://example.com", false);
        assert_eq!(first.estimate(&req, &calibration, &mut dns, 0.0).connection_setup, 150.0);

        // a second cold connection opened after resolution pays only TCP
        let mut second = Connection::new(1, "http://example.com", false);
        assert_eq!(second.estimate(&req, &calibration, &mut dns, 200.0).connection_setup, 50.0);
    }

    #[test]
    fn test_observed_setup_override() {
        let calibration = Calibration::new(100.0, 1600.0, 1.0).with_origin_override(
            "https://example.com",
            crate::calibration::OriginOverride {
                connection_setup_ms: Some(42.0),
                server_response_time_ms: Some(8.0),
                ..Default::default()
            },
        );
        let mut dns = DnsCache::default();
        let mut connection = Connection::new(0, "https://example.com", false);
        let cost = connection.estimate(&request("https://example.com/", 0), &calibration, &mut dns, 0.0);

        assert_eq!(cost.connection_setup, 42.0);
        assert_eq!(cost.time_to_first_byte, 108.0);
    }

    #[test]
    fn test_slow_start_window_grows() {
        let calibration =
            Calibration::new(100.0, 16_000.0, 1.0).with_download_model(DownloadModel::TcpSlowStart);
        let mut dns = DnsCache::default();
        let mut connection = Connection::new(0, "https://example.com", false);

        // 10 segments fit in the initial window
        let small = connection.estimate(&request("https://example.com/", 10 * 1460), &calibration, &mut dns, 0.0);
        assert_eq!(small.download, 0.0);

        // 30 more segments need two more round trips (20 + 40 segments)
        let large = connection.estimate(&request("https://example.com/", 40 * 1460), &calibration, &mut dns, 1000.0);
        assert_eq!(large.download, 200.0);
        assert_eq!(connection.congestion_window(), 40);
    }
}
