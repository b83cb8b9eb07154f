//! Connection pool shared by all network nodes of a simulation.
//!
//! The pool enforces two limits: at most `connections_per_origin_limit`
//! HTTP/1.1 connections per origin, and at most `max_concurrent_connections`
//! busy connections overall. HTTP/2 origins get a single multiplexed
//! connection that accepts any number of concurrent streams and counts once
//! toward the global limit while busy.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::connection::{Connection, ConnectionState, RequestCost};
use crate::node::NetworkNode;
use crate::types::{ConnectionId, Origin, SimTime};

/// Hostname resolution times, shared across all connections of a run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DnsCache {
    resolved_at: BTreeMap<String, SimTime>,
}

impl DnsCache {
    /// Time still needed before `origin`'s host is resolved. The first lookup
    /// of a host starts a resolution taking `resolution_time`.
    pub fn time_until_resolved(&mut self, origin: &str, now: SimTime, resolution_time: SimTime) -> SimTime {
        let host = host_of(origin).to_string();
        match self.resolved_at.get(&host) {
            Some(&at) => (at - now).max(0.0),
            None => {
                self.resolved_at.insert(host, now + resolution_time);
                resolution_time
            }
        }
    }

    pub fn len(&self) -> usize {
        self.resolved_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved_at.is_empty()
    }
}

fn host_of(origin: &str) -> &str {
    origin.split_once("://").map_or(origin, |(_, host)| host)
}

/// Exclusive (or, for HTTP/2, shared) use of a pooled connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub connection_id: ConnectionId,
    pub origin: Origin,
    /// True if the connection had already completed its handshake
    pub warm: bool,
}

/// Per-run connection pool.
#[derive(Clone, Debug)]
pub struct ConnectionPool {
    connections: Vec<Connection>,
    by_origin: BTreeMap<Origin, Vec<ConnectionId>>,
    h2_origins: BTreeSet<Origin>,
    dns: DnsCache,
    per_origin_limit: usize,
    max_concurrent: usize,
    busy: usize,
    peak_busy: usize,
}

impl ConnectionPool {
    /// Creates an empty pool. `h2_origins` lists the origins served over a
    /// multiplexed protocol.
    pub fn new(calibration: &Calibration, h2_origins: BTreeSet<Origin>) -> Self {
        Self {
            connections: Vec::new(),
            by_origin: BTreeMap::new(),
            h2_origins,
            dns: DnsCache::default(),
            per_origin_limit: calibration.connections_per_origin_limit,
            max_concurrent: calibration.max_concurrent_connections,
            busy: 0,
            peak_busy: 0,
        }
    }

    /// Creates a pool whose H2 origins are the calibration's plus the ones
    /// the recorded requests used.
    pub fn for_requests<'a>(
        calibration: &Calibration,
        requests: impl IntoIterator<Item = &'a NetworkNode>,
    ) -> Self {
        let mut h2_origins = calibration.h2_origins.clone();
        h2_origins.extend(
            requests
                .into_iter()
                .filter(|request| request.is_h2)
                .map(|request| request.origin.clone()),
        );
        Self::new(calibration, h2_origins)
    }

    /// Tries to obtain a connection to `origin` at time `now`.
    ///
    /// Idle warm connections are preferred over idle cold ones, which are
    /// preferred over opening a new connection. Ties go to the lowest
    /// connection id. Returns `None` when a limit blocks the request.
    pub fn acquire(&mut self, origin: &str, now: SimTime) -> Option<Lease> {
        if self.h2_origins.contains(origin) {
            return self.acquire_multiplexed(origin, now);
        }

        let ids = self.by_origin.get(origin).map(Vec::as_slice).unwrap_or(&[]);
        let idle = |id: &&ConnectionId| self.connections[**id].is_idle();
        let warm = ids
            .iter()
            .filter(idle)
            .find(|id| self.connections[**id].state(now) == ConnectionState::Warm);
        let reusable = warm.or_else(|| ids.iter().find(idle)).copied();
        let open_count = ids.len();

        if self.busy >= self.max_concurrent {
            return None;
        }

        let id = match reusable {
            Some(id) => id,
            None if open_count < self.per_origin_limit => self.open(origin, false),
            None => return None,
        };
        Some(self.lease(id, now))
    }

    fn acquire_multiplexed(&mut self, origin: &str, now: SimTime) -> Option<Lease> {
        let existing = self.by_origin.get(origin).and_then(|ids| ids.first()).copied();
        match existing {
            Some(id) if !self.connections[id].is_idle() => Some(self.lease(id, now)),
            _ if self.busy >= self.max_concurrent => None,
            Some(id) => Some(self.lease(id, now)),
            None => {
                let id = self.open(origin, true);
                Some(self.lease(id, now))
            }
        }
    }

    fn open(&mut self, origin: &str, is_h2: bool) -> ConnectionId {
        let id = self.connections.len();
        self.connections.push(Connection::new(id, origin, is_h2));
        self.by_origin.entry(origin.to_string()).or_default().push(id);
        tracing::trace!(connection = id, origin, "opened connection");
        id
    }

    fn lease(&mut self, id: ConnectionId, now: SimTime) -> Lease {
        let connection = &mut self.connections[id];
        if connection.is_idle() {
            self.busy += 1;
            self.peak_busy = self.peak_busy.max(self.busy);
        }
        connection.begin_request();
        Lease {
            connection_id: id,
            origin: connection.origin.clone(),
            warm: connection.state(now) == ConnectionState::Warm,
        }
    }

    /// Returns a lease. The connection stays open and keeps its warm state.
    pub fn release(&mut self, lease: &Lease, now: SimTime) {
        let Some(connection) = self.connections.get_mut(lease.connection_id) else {
            tracing::warn!(connection = lease.connection_id, "release of unknown connection");
            return;
        };
        if connection.is_idle() {
            tracing::warn!(connection = lease.connection_id, "release of idle connection");
            return;
        }
        connection.end_request();
        if connection.is_idle() {
            self.busy -= 1;
        }
        tracing::trace!(connection = lease.connection_id, time = now, "released connection");
    }

    /// Cost of serving `request` on the leased connection starting at `now`.
    pub fn estimate(
        &mut self,
        lease: &Lease,
        request: &NetworkNode,
        calibration: &Calibration,
        now: SimTime,
    ) -> RequestCost {
        let connection = &mut self.connections[lease.connection_id];
        connection.estimate(request, calibration, &mut self.dns, now)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connections currently carrying at least one request.
    pub fn busy_count(&self) -> usize {
        self.busy
    }

    pub fn peak_busy(&self) -> usize {
        self.peak_busy
    }

    pub fn is_h2(&self, origin: &str) -> bool {
        self.h2_origins.contains(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://example.com";

    fn pool(per_origin: usize, global: usize) -> ConnectionPool {
        let calibration = Calibration::default()
            .with_connections_per_origin(per_origin)
            .with_max_concurrent_connections(global);
        ConnectionPool::new(&calibration, BTreeSet::new())
    }

    #[test]
    fn test_per_origin_limit() {
        let mut pool = pool(2, 10);
        let a = pool.acquire(ORIGIN, 0.0).unwrap();
        let b = pool.acquire(ORIGIN, 0.0).unwrap();
        assert_ne!(a.connection_id, b.connection_id);
        assert!(pool.acquire(ORIGIN, 0.0).is_none());

        // another origin is unaffected
        assert!(pool.acquire("https://cdn.example.com", 0.0).is_some());

        pool.release(&a, 5.0);
        let c = pool.acquire(ORIGIN, 5.0).unwrap();
        assert_eq!(c.connection_id, a.connection_id);
    }

    #[test]
    fn test_global_limit() {
        let mut pool = pool(6, 2);
        let a = pool.acquire("https://a.com", 0.0).unwrap();
        let _b = pool.acquire("https://b.com", 0.0).unwrap();
        assert!(pool.acquire("https://c.com", 0.0).is_none());
        assert_eq!(pool.busy_count(), 2);

        pool.release(&a, 1.0);
        assert!(pool.acquire("https://c.com", 1.0).is_some());
        assert_eq!(pool.peak_busy(), 2);
    }

    #[test]
    fn test_prefers_warm_connection() {
        let calibration = Calibration::new(10.0, 1600.0, 1.0);
        let mut pool = ConnectionPool::new(&calibration, BTreeSet::new());
        let record = crate::record::NetworkRecord::new("r", "https://example.com/", 0.0, 1.0)
            .normalize()
            .unwrap();
        let request = NetworkNode::from_record(0, &record, record.url.clone());

        let a = pool.acquire(ORIGIN, 0.0).unwrap();
        let b = pool.acquire(ORIGIN, 0.0).unwrap();
        // only the second connection pays for its handshake
        pool.estimate(&b, &request, &calibration, 0.0);
        pool.release(&a, 100.0);
        pool.release(&b, 100.0);

        let lease = pool.acquire(ORIGIN, 100.0).unwrap();
        assert_eq!(lease.connection_id, b.connection_id);
        assert!(lease.warm);
    }

    #[test]
    fn test_h2_multiplexing() {
        let calibration = Calibration::default().with_max_concurrent_connections(1);
        let mut pool = ConnectionPool::new(&calibration, BTreeSet::from([ORIGIN.to_string()]));

        let leases: Vec<_> = (0..8).map(|_| pool.acquire(ORIGIN, 0.0).unwrap()).collect();
        assert!(leases.iter().all(|l| l.connection_id == 0));
        assert_eq!(pool.connections().len(), 1);
        assert_eq!(pool.busy_count(), 1);
        assert!(pool.acquire("https://other.com", 0.0).is_none());

        for lease in &leases {
            pool.release(lease, 10.0);
        }
        assert_eq!(pool.busy_count(), 0);
        assert!(pool.acquire("https://other.com", 10.0).is_some());
    }

    #[test]
    fn test_double_release_is_ignored() {
        let mut pool = pool(6, 10);
        let lease = pool.acquire(ORIGIN, 0.0).unwrap();
        pool.release(&lease, 1.0);
        pool.release(&lease, 1.0);
        assert_eq!(pool.busy_count(), 0);
    }

    #[test]
    fn test_dns_cache_by_host() {
        let mut dns = DnsCache::default();
        assert_eq!(dns.time_until_resolved("https://example.com", 0.0, 80.0), 80.0);
        assert_eq!(dns.time_until_resolved("http://example.com", 30.0, 80.0), 50.0);
        assert_eq!(dns.time_until_resolved("https://example.com", 90.0, 80.0), 0.0);
        assert_eq!(dns.len(), 1);
    }
}
