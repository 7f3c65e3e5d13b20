use crate::record::Status;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: String,
    pub label: String,
    pub load: usize,
    pub avg_latency: f64,
    pub status: Status,
    pub bottleneck_score: u32,
    pub structural_score: u32,
    pub degradation_score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeView {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Latency of the most recent call
    pub latency: f64,
    pub avg_latency: f64,
    pub capacity: Option<f64>,
    pub request_rate: f64,
    pub calls: usize,
    pub hybrid_score: Option<f64>,
    pub degradation: Option<Status>,
    pub is_bottleneck: bool,
}

/// Point-in-time view of the window graph, sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
    pub max_flow: f64,
    /// Bottleneck edge ids, most severe first
    pub bottlenecks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub total_logs: u64,
    pub active_nodes: usize,
    pub window_size: usize,
    pub status: Status,
    pub max_flow: f64,
    pub alerts: usize,
}
