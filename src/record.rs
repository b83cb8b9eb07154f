//! Network record model.
//!
//! A [`NetworkRecord`] is one entry of the already-normalized network log
//! handed over by the gatherer. Fields are optional where the log may omit
//! them; [`NetworkRecord::normalize`] applies defaults and produces a
//! [`NormalizedRecord`] whose required fields are guaranteed present.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use url::Url;

use crate::error::{Result, SimulationError};
use crate::types::{Origin, SimTime};

/// Origin assigned to requests that never touch the network.
pub const NON_NETWORK_ORIGIN: &str = "null";

/// The kind of resource a request fetched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Script,
    Image,
    Font,
    Media,
    #[serde(alias = "XHR")]
    Xhr,
    Fetch,
    #[default]
    Other,
}

impl ResourceType {
    /// Returns true for resources whose response is consumed by the main thread
    /// (documents and scripts).
    pub fn is_main_thread_input(&self) -> bool {
        matches!(self, ResourceType::Document | ResourceType::Script)
    }
}

/// Fetch priority reported by the browser.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

/// Observed durations of the connection phases of a request, in milliseconds.
///
/// Only requests that opened a fresh connection carry non-zero `connect_ms`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordTiming {
    #[serde(default)]
    pub dns_ms: f64,
    #[serde(default)]
    pub connect_ms: f64,
    #[serde(default)]
    pub ssl_ms: f64,
    #[serde(default)]
    pub send_ms: f64,
}

/// A network request as found in the normalized network log.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Unique request identifier
    pub request_id: String,
    /// Requested URL
    pub url: String,
    /// Origin; derived from the URL when absent
    #[serde(default)]
    pub origin: Option<Origin>,
    /// Observed request start (absolute ms)
    #[serde(default)]
    pub start_time: Option<SimTime>,
    /// Observed request end (absolute ms)
    #[serde(default)]
    pub end_time: Option<SimTime>,
    /// Observed time the response headers were received (absolute ms)
    #[serde(default)]
    pub headers_end_time: Option<SimTime>,
    /// Bytes transferred over the wire
    #[serde(default)]
    pub transfer_size: Option<u64>,
    #[serde(default)]
    pub resource_type: Option<ResourceType>,
    /// Observed connection identifier
    #[serde(default)]
    pub connection_id: Option<u64>,
    #[serde(default)]
    pub from_cache: bool,
    /// URL of the document or script that issued this request
    #[serde(default)]
    pub initiator_url: Option<String>,
    /// Request id of the request this one redirected to
    #[serde(default)]
    pub redirect_destination_id: Option<String>,
    /// Negotiated protocol (`http/1.1`, `h2`, ...)
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub timing: Option<RecordTiming>,
}

impl NetworkRecord {
    /// Creates a record with the required fields set.
    pub fn new(
        request_id: impl Into<String>,
        url: impl Into<String>,
        start_time: SimTime,
        end_time: SimTime,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            url: url.into(),
            start_time: Some(start_time),
            end_time: Some(end_time),
            ..Self::default()
        }
    }

    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    pub fn with_transfer_size(mut self, bytes: u64) -> Self {
        self.transfer_size = Some(bytes);
        self
    }

    pub fn with_headers_end(mut self, time: SimTime) -> Self {
        self.headers_end_time = Some(time);
        self
    }

    pub fn with_initiator(mut self, url: impl Into<String>) -> Self {
        self.initiator_url = Some(url.into());
        self
    }

    pub fn with_redirect_to(mut self, request_id: impl Into<String>) -> Self {
        self.redirect_destination_id = Some(request_id.into());
        self
    }

    pub fn with_connection_id(mut self, id: u64) -> Self {
        self.connection_id = Some(id);
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_timing(mut self, timing: RecordTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn from_cache(mut self) -> Self {
        self.from_cache = true;
        self
    }

    /// Validates the record and fills in defaults.
    pub fn normalize(&self) -> Result<NormalizedRecord> {
        let id = self.request_id.as_str();
        if id.is_empty() {
            return Err(SimulationError::malformed_record(
                "<unknown>",
                format!("request id is empty (url '{}')", self.url),
            ));
        }
        if self.url.is_empty() {
            return Err(SimulationError::malformed_record(id, "url is empty"));
        }

        let start_time = match self.start_time {
            Some(t) if t.is_finite() => t,
            Some(_) => return Err(SimulationError::malformed_record(id, "start_time is not finite")),
            None => return Err(SimulationError::malformed_record(id, "start_time is missing")),
        };

        let (end_time, headers_end_time) = match (self.end_time, self.headers_end_time) {
            (Some(end), Some(headers)) => (end, headers),
            (Some(end), None) => (end, end),
            (None, Some(headers)) => (headers, headers),
            (None, None) => {
                return Err(SimulationError::malformed_record(
                    id,
                    "both end_time and headers_end_time are missing",
                ))
            }
        };
        if !end_time.is_finite() || !headers_end_time.is_finite() {
            return Err(SimulationError::malformed_record(id, "end time is not finite"));
        }
        if end_time < start_time {
            return Err(SimulationError::malformed_record(
                id,
                format!("end_time {end_time} precedes start_time {start_time}"),
            ));
        }

        let is_non_network = is_non_network_url(&self.url);
        let origin = match (&self.origin, is_non_network) {
            (Some(origin), _) if !origin.is_empty() => origin.clone(),
            (_, true) => NON_NETWORK_ORIGIN.to_string(),
            _ => parse_origin(&self.url).ok_or_else(|| {
                SimulationError::malformed_record(id, format!("cannot derive origin from '{}'", self.url))
            })?,
        };

        let is_h2 = self
            .protocol
            .as_deref()
            .map(|p| p.eq_ignore_ascii_case("h2") || p.eq_ignore_ascii_case("h3"))
            .unwrap_or(false);

        Ok(NormalizedRecord {
            request_id: id.to_string(),
            url: self.url.clone(),
            is_https: origin.starts_with("https://"),
            origin,
            is_non_network,
            start_time,
            end_time,
            headers_end_time: headers_end_time.clamp(start_time, end_time),
            transfer_size: self.transfer_size.unwrap_or(0),
            resource_type: self.resource_type.unwrap_or_default(),
            connection_id: self.connection_id,
            from_cache: self.from_cache,
            initiator_url: self.initiator_url.clone().filter(|u| !u.is_empty()),
            redirect_destination_id: self.redirect_destination_id.clone().filter(|r| !r.is_empty()),
            is_h2,
            priority: self.priority,
            timing: self.timing.clone(),
        })
    }
}

/// A validated network record with all required fields present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub request_id: String,
    pub url: String,
    pub origin: Origin,
    pub is_https: bool,
    /// `data:`/`blob:` and similar URLs that never open a connection
    pub is_non_network: bool,
    pub start_time: SimTime,
    pub end_time: SimTime,
    pub headers_end_time: SimTime,
    pub transfer_size: u64,
    pub resource_type: ResourceType,
    pub connection_id: Option<u64>,
    pub from_cache: bool,
    pub initiator_url: Option<String>,
    pub redirect_destination_id: Option<String>,
    pub is_h2: bool,
    pub priority: Option<Priority>,
    pub timing: Option<RecordTiming>,
}

impl NormalizedRecord {
    /// Observed time from request start to the first response byte.
    pub fn observed_ttfb(&self) -> SimTime {
        self.headers_end_time - self.start_time
    }

    /// Observed total duration of the request.
    pub fn observed_duration(&self) -> SimTime {
        self.end_time - self.start_time
    }

    pub fn is_redirect(&self) -> bool {
        self.redirect_destination_id.is_some()
    }
}

/// Normalizes a whole network log, rejecting duplicate request ids.
pub fn normalize_records(records: &[NetworkRecord]) -> Result<Vec<NormalizedRecord>> {
    let mut seen = BTreeSet::new();
    records
        .iter()
        .map(|record| {
            let normalized = record.normalize()?;
            if !seen.insert(normalized.request_id.clone()) {
                return Err(SimulationError::malformed_record(
                    &normalized.request_id,
                    "duplicate request id",
                ));
            }
            Ok(normalized)
        })
        .collect()
}

/// Resolves redirect chains into the canonical final URL of every request.
///
/// Requests that do not redirect map to their own URL.
pub fn resolve_redirects(records: &[NormalizedRecord]) -> Result<BTreeMap<String, String>> {
    let by_id: BTreeMap<&str, &NormalizedRecord> =
        records.iter().map(|r| (r.request_id.as_str(), r)).collect();

    let mut resolved = BTreeMap::new();
    for record in records {
        let mut current = record;
        let mut visited = BTreeSet::new();
        visited.insert(current.request_id.as_str());

        while let Some(next_id) = current.redirect_destination_id.as_deref() {
            let next = by_id.get(next_id).ok_or_else(|| {
                SimulationError::malformed_record(
                    &current.request_id,
                    format!("redirect destination '{next_id}' is not in the log"),
                )
            })?;
            if !visited.insert(next.request_id.as_str()) {
                return Err(SimulationError::malformed_record(
                    &record.request_id,
                    "redirect chain loops",
                ));
            }
            current = next;
        }

        resolved.insert(record.request_id.clone(), current.url.clone());
    }

    Ok(resolved)
}

/// Returns true for URLs served without a network round trip.
pub fn is_non_network_url(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    ["data:", "blob:", "about:", "chrome:", "chrome-extension:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

/// Derives the serialized `scheme://host[:port]` origin of a URL.
///
/// Returns `None` when the URL does not parse or has an opaque origin.
pub fn parse_origin(url: &str) -> Option<Origin> {
    let origin = Url::parse(url.trim()).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origin() {
        assert_eq!(parse_origin("https://Example.com/a/b?c"), Some("https://example.com".into()));
        assert_eq!(parse_origin("https://example.com:443/"), Some("https://example.com".into()));
        assert_eq!(parse_origin("http://example.com:8080"), Some("http://example.com:8080".into()));
        assert_eq!(parse_origin("https://user:pw@cdn.example.com/x"), Some("https://cdn.example.com".into()));
        assert_eq!(parse_origin("http://[::1]:3000/"), Some("http://[::1]:3000".into()));
        assert_eq!(parse_origin("not a url"), None);
        assert_eq!(parse_origin("custom://opaque/thing"), None);
    }

    #[test]
    fn test_equivalent_urls_share_an_origin() {
        let expected = Some("https://example.com".to_string());
        assert_eq!(parse_origin("https://example.com:0443/"), expected);
        assert_eq!(parse_origin("https://example.com\\x/y"), expected);
        assert_eq!(parse_origin("HTTPS://EXAMPLE.COM/"), expected);
        assert_eq!(parse_origin("https://bücher.de/"), Some("https://xn--bcher-kva.de".into()));

        let a = NetworkRecord::new("1", "https://example.com:0443/a", 0.0, 1.0).normalize().unwrap();
        let b = NetworkRecord::new("2", "https://example.com\\b", 0.0, 1.0).normalize().unwrap();
        assert_eq!(a.origin, b.origin);
    }

    #[test]
    fn test_opaque_origin_is_malformed() {
        let err = NetworkRecord::new("3", "custom:thing", 0.0, 1.0).normalize().unwrap_err();
        assert!(matches!(err, SimulationError::MalformedRecord { ref request_id, .. } if request_id == "3"));
    }

    #[test]
    fn test_normalize_defaults() {
        let record = NetworkRecord::new("1", "https://example.com/", 100.0, 250.0);
        let normalized = record.normalize().unwrap();

        assert_eq!(normalized.origin, "https://example.com");
        assert!(normalized.is_https);
        assert_eq!(normalized.headers_end_time, 250.0);
        assert_eq!(normalized.transfer_size, 0);
        assert_eq!(normalized.resource_type, ResourceType::Other);
        assert!(!normalized.is_h2);
    }

    #[test]
    fn test_normalize_end_time_from_headers() {
        let mut record = NetworkRecord::new("1", "http://example.com/", 0.0, 0.0);
        record.end_time = None;
        record.headers_end_time = Some(40.0);

        let normalized = record.normalize().unwrap();
        assert_eq!(normalized.end_time, 40.0);
        assert_eq!(normalized.observed_ttfb(), 40.0);
    }

    #[test]
    fn test_normalize_rejects_missing_timing() {
        let mut record = NetworkRecord::new("7", "https://example.com/", 0.0, 10.0);
        record.start_time = None;
        let err = record.normalize().unwrap_err();
        assert!(matches!(err, SimulationError::MalformedRecord { ref request_id, .. } if request_id == "7"));

        let mut record = NetworkRecord::new("8", "https://example.com/", 0.0, 10.0);
        record.end_time = None;
        assert!(record.normalize().is_err());

        let record = NetworkRecord::new("9", "https://example.com/", 50.0, 10.0);
        assert!(record.normalize().is_err());
    }

    #[test]
    fn test_normalize_data_url() {
        let record = NetworkRecord::new("1", "data:image/png;base64,AAAA", 10.0, 10.0);
        let normalized = record.normalize().unwrap();
        assert!(normalized.is_non_network);
        assert_eq!(normalized.origin, NON_NETWORK_ORIGIN);
    }

    #[test]
    fn test_normalize_h2_protocol() {
        let record = NetworkRecord::new("1", "https://example.com/", 0.0, 1.0).with_protocol("h2");
        assert!(record.normalize().unwrap().is_h2);
    }

    #[test]
    fn test_duplicate_request_ids() {
        let records = vec![
            NetworkRecord::new("1", "https://a.com/", 0.0, 1.0),
            NetworkRecord::new("1", "https://a.com/x", 0.0, 1.0),
        ];
        assert!(normalize_records(&records).is_err());
    }

    #[test]
    fn test_resolve_redirect_chain() {
        let records = normalize_records(&[
            NetworkRecord::new("1", "http://example.com/", 0.0, 10.0).with_redirect_to("2"),
            NetworkRecord::new("2", "https://example.com/", 10.0, 20.0).with_redirect_to("3"),
            NetworkRecord::new("3", "https://www.example.com/", 20.0, 30.0),
        ])
        .unwrap();

        let resolved = resolve_redirects(&records).unwrap();
        assert_eq!(resolved["1"], "https://www.example.com/");
        assert_eq!(resolved["2"], "https://www.example.com/");
        assert_eq!(resolved["3"], "https://www.example.com/");
    }

    #[test]
    fn test_resolve_redirect_errors() {
        let dangling = normalize_records(&[
            NetworkRecord::new("1", "http://example.com/", 0.0, 10.0).with_redirect_to("missing"),
        ])
        .unwrap();
        assert!(resolve_redirects(&dangling).is_err());

        let looping = normalize_records(&[
            NetworkRecord::new("1", "http://a.com/", 0.0, 10.0).with_redirect_to("2"),
            NetworkRecord::new("2", "http://b.com/", 10.0, 20.0).with_redirect_to("1"),
        ])
        .unwrap();
        assert!(resolve_redirects(&looping).is_err());
    }
}
