use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// One observed call from a source service to a destination service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub src_service: String,
    pub src_route: String,
    pub dst_service: String,
    pub dst_route: String,
    pub latency_ms: f64,
}

impl CallRecord {
    pub fn edge_key(&self) -> EdgeKey {
        EdgeKey::new(&self.src_service, &self.dst_service)
    }

    /// Parent span id with blank values treated as absent
    pub fn parent(&self) -> Option<&str> {
        self.parent_span_id
            .as_deref()
            .map(str::trim)
            .filter(|parent| !parent.is_empty())
    }
}

/// Directed service-to-service edge, identified by service names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub source: String,
    pub target: String,
}

impl EdgeKey {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn touches(&self, node: &str) -> bool {
        self.source == node || self.target == node
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}

// Serialized as "source->target" so it can key JSON maps.
impl Serialize for EdgeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Health classification shared by nodes, edges and the overall system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Warning,
    Critical,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Warning => "warning",
            Status::Critical => "critical",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node status either derived from the window or pinned by the alert layer.
/// Whichever write happened last is the one that holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "status", rename_all = "lowercase")]
pub enum NodeStatus {
    Computed(Status),
    Forced(Status),
}

impl NodeStatus {
    pub fn resolve(&self) -> Status {
        match self {
            NodeStatus::Computed(status) | NodeStatus::Forced(status) => *status,
        }
    }

    pub fn is_forced(&self) -> bool {
        matches!(self, NodeStatus::Forced(_))
    }
}

impl Default for NodeStatus {
    fn default() -> Self {
        NodeStatus::Computed(Status::Ok)
    }
}

/// A single latency observation on an edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
    /// Calls on the same edge during the second ending at `timestamp`
    pub rate_rps: f64,
}

/// Rolling statistics for one edge, derived from the current window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeMetrics {
    samples: Vec<Sample>,
}

impl EdgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build metrics from raw (timestamp, latency) observations.
    /// Samples are ordered by timestamp (stable for ties) and request rates are
    /// computed over a trailing one-second interval.
    pub fn from_observations(mut observations: Vec<(DateTime<Utc>, f64)>) -> Self {
        observations.sort_by_key(|(timestamp, _)| *timestamp);

        let one_second = Duration::seconds(1);
        let mut samples = Vec::with_capacity(observations.len());
        let mut start = 0;
        for (idx, (timestamp, latency_ms)) in observations.iter().enumerate() {
            while *timestamp - observations[start].0 >= one_second {
                start += 1;
            }
            samples.push(Sample {
                timestamp: *timestamp,
                latency_ms: *latency_ms,
                rate_rps: (idx - start + 1) as f64,
            });
        }

        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn avg_latency(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.latency_ms).sum::<f64>() / self.samples.len() as f64
    }

    pub fn last_latency(&self) -> f64 {
        self.samples.last().map(|s| s.latency_ms).unwrap_or(0.0)
    }

    pub fn best_latency(&self) -> f64 {
        self.samples
            .iter()
            .map(|s| s.latency_ms)
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    /// Upper bound on requests per second implied by the fastest observed call.
    pub fn capacity_rps(&self) -> f64 {
        let best = self.best_latency();
        if self.samples.is_empty() || best <= 0.0 {
            return 0.0;
        }
        1000.0 / best
    }

    /// Latency delta between the newest sample and the sample `lookback` steps
    /// earlier (clamped to the oldest sample).
    pub fn trend(&self, lookback: usize) -> f64 {
        let len = self.samples.len();
        if len < 2 {
            return 0.0;
        }
        let back = lookback.clamp(1, len - 1);
        self.samples[len - 1].latency_ms - self.samples[len - 1 - back].latency_ms
    }

    pub fn request_rate(&self) -> f64 {
        self.samples.last().map(|s| s.rate_rps).unwrap_or(0.0)
    }

    /// Weight of this edge in the flow network.
    pub fn flow_capacity(&self) -> f64 {
        let capacity = self.capacity_rps();
        if capacity > 0.0 {
            return capacity;
        }
        let avg = self.avg_latency();
        if avg > 0.0 {
            return 1000.0 / avg;
        }
        0.0
    }
}

/// Per-service aggregate, rebuilt from the window on every insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeMetrics {
    pub name: String,
    /// Incoming calls in the window
    pub load: usize,
    /// Mean latency over incoming calls
    pub avg_latency: f64,
    pub structural_score: u32,
    pub degradation_score: u32,
    pub status: NodeStatus,
}

impl NodeMetrics {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            load: 0,
            avg_latency: 0.0,
            structural_score: 0,
            degradation_score: 0,
            status: NodeStatus::default(),
        }
    }

    pub fn bottleneck_score(&self) -> u32 {
        self.structural_score + self.degradation_score
    }
}
