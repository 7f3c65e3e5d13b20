//! Multi-phase bottleneck analysis over a window snapshot.
//!
//! Phases run in a fixed order: trace critical paths, max-flow / min-cut,
//! latency degradation, then the hybrid ranking that blends all three.

pub mod degradation;
pub mod flow;
pub mod hybrid;
pub mod paths;
pub mod thresholds;

use crate::config::{AnalysisConfig, ThresholdConfig};
use crate::record::{EdgeKey, Status};
use crate::window::SlidingWindowGraph;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

pub use flow::{FlowError, FlowNetwork, FlowResult, SinkFlow};
pub use thresholds::{compute_adaptive_thresholds, Thresholds};

/// Per-node scores written back to the graph after a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeScores {
    pub structural: u32,
    pub degradation: u32,
}

/// Edge ranked by hybrid score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEdge {
    pub edge: EdgeKey,
    pub score: f64,
    pub degradation: Option<Status>,
    pub structural: bool,
}

/// Everything one analysis pass found.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub analyzed_at: Option<DateTime<Utc>>,
    /// Graph insert count when the pass started
    pub records_seen: u64,
    pub source: String,
    pub trace_edges: BTreeSet<EdgeKey>,
    pub trace_counts: BTreeMap<EdgeKey, u32>,
    pub flow_edges: BTreeSet<EdgeKey>,
    pub flow_counts: BTreeMap<EdgeKey, u32>,
    pub total_flow: f64,
    pub sinks: Vec<SinkFlow>,
    pub thresholds: Thresholds,
    pub degradation: BTreeMap<EdgeKey, Status>,
    pub hybrid_scores: BTreeMap<EdgeKey, f64>,
    pub node_scores: BTreeMap<String, NodeScores>,
}

impl AnalysisReport {
    /// Union of trace-path and min-cut bottleneck edges.
    pub fn structural_edges(&self) -> BTreeSet<EdgeKey> {
        self.trace_edges.union(&self.flow_edges).cloned().collect()
    }

    /// Every scored edge, highest hybrid score first, ties broken by key.
    pub fn ranked(&self) -> Vec<RankedEdge> {
        let structural = self.structural_edges();
        self.hybrid_scores
            .iter()
            .sorted_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)))
            .map(|(edge, score)| RankedEdge {
                edge: edge.clone(),
                score: *score,
                degradation: self.degradation.get(edge).copied(),
                structural: structural.contains(edge),
            })
            .collect()
    }

    /// Nodes by combined bottleneck score, highest first.
    pub fn top_nodes(&self, limit: usize) -> Vec<(String, u32)> {
        self.node_scores
            .iter()
            .map(|(name, scores)| (name.clone(), scores.structural + scores.degradation))
            .filter(|(_, score)| *score > 0)
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
            .take(limit)
            .collect()
    }
}

/// Runs the analysis phases against a graph. The graph is only read.
#[derive(Debug, Clone)]
pub struct FlowAnalyzer {
    config: AnalysisConfig,
    thresholds: ThresholdConfig,
}

impl FlowAnalyzer {
    pub fn new(config: AnalysisConfig, thresholds: ThresholdConfig) -> Self {
        Self { config, thresholds }
    }

    pub fn source_node(&self) -> &str {
        &self.config.source_node
    }

    pub fn analyze(&self, graph: &SlidingWindowGraph) -> AnalysisReport {
        let traces = graph.traces();
        let trace = paths::trace_structural_phase(&traces, graph.sink_matcher());
        let flow = flow::flow_structural_phase(graph, &self.config.source_node);

        let resolved = self.thresholds.resolve(graph.edges().values());
        let degraded = degradation::degradation_phase(graph.edges(), &resolved);

        let combined = hybrid::combine_counts(&trace.counts, &flow.counts);
        let hybrid_scores = hybrid::hybrid_scores(
            graph.edges(),
            &combined,
            resolved.critical_ms,
            &self.config.weights,
        );

        let structural = hybrid::structural_scores(graph.nodes().keys(), &combined);
        let degradation = degradation::degradation_scores(graph.nodes().keys(), &degraded);
        let node_scores = graph
            .nodes()
            .keys()
            .map(|name| {
                let scores = NodeScores {
                    structural: structural.get(name).copied().unwrap_or(0),
                    degradation: degradation.get(name).copied().unwrap_or(0),
                };
                (name.clone(), scores)
            })
            .collect();

        let report = AnalysisReport {
            analyzed_at: graph.window().iter().map(|r| r.timestamp).max(),
            records_seen: graph.total_records(),
            source: self.config.source_node.clone(),
            trace_edges: trace.edges,
            trace_counts: trace.counts,
            flow_edges: flow.edges,
            flow_counts: flow.counts,
            total_flow: flow.total_flow,
            sinks: flow.sinks,
            thresholds: resolved,
            degradation: degraded,
            hybrid_scores,
            node_scores,
        };

        tracing::debug!(
            edges = graph.edges().len(),
            structural = report.structural_edges().len(),
            degraded = report.degradation.len(),
            max_flow = report.total_flow,
            "analysis pass complete"
        );

        report
    }
}

impl Default for FlowAnalyzer {
    fn default() -> Self {
        Self::new(AnalysisConfig::default(), ThresholdConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ThresholdMode, WindowConfig};
    use crate::record::CallRecord;
    use crate::window::SinkMatcher;
    use chrono::{Duration, TimeZone};

    fn span(
        trace: &str,
        id: &str,
        parent: Option<&str>,
        src: &str,
        dst: &str,
        offset_ms: i64,
        latency: f64,
    ) -> CallRecord {
        CallRecord {
            trace_id: trace.into(),
            span_id: id.into(),
            parent_span_id: parent.map(str::to_string),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
                + Duration::milliseconds(offset_ms),
            src_service: src.into(),
            src_route: "/".into(),
            dst_service: dst.into(),
            dst_route: "/".into(),
            latency_ms: latency,
        }
    }

    /// api-gateway fans out to orders and users; orders is slow into its db.
    fn checkout_graph() -> SlidingWindowGraph {
        let mut graph = SlidingWindowGraph::new(
            WindowConfig {
                max_events: 100,
                max_seconds: 0,
            },
            SinkMatcher::default(),
            Thresholds::default(),
        );
        for i in 0..4 {
            let trace = format!("t{i}");
            let base = i * 2000;
            graph.add_record(span(&trace, "a", None, "api-gateway", "orders", base, 20.0));
            graph.add_record(span(&trace, "b", Some("a"), "orders", "db-orders", base + 1, 250.0));
            graph.add_record(span(&trace, "c", None, "api-gateway", "users", base + 2, 10.0));
            graph.add_record(span(&trace, "d", Some("c"), "users", "db-users", base + 3, 5.0));
        }
        graph
    }

    #[test]
    fn slow_database_edge_ranks_first() {
        let graph = checkout_graph();
        let report = FlowAnalyzer::default().analyze(&graph);

        let slow = EdgeKey::new("orders", "db-orders");
        assert!(report.trace_edges.contains(&slow));
        assert_eq!(report.trace_counts[&slow], 4);
        assert_eq!(report.degradation.get(&slow), Some(&Status::Critical));

        let ranked = report.ranked();
        assert_eq!(ranked[0].edge, slow);
        assert!(ranked[0].structural);
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn flow_phase_covers_every_sink() {
        let graph = checkout_graph();
        let report = FlowAnalyzer::default().analyze(&graph);

        let sinks: Vec<&str> = report.sinks.iter().map(|s| s.sink.as_str()).collect();
        assert_eq!(sinks, vec!["db-orders", "db-users"]);
        let summed: f64 = report.sinks.iter().map(|s| s.max_flow).sum();
        assert!((report.total_flow - summed).abs() < 1e-9);
        assert!(report.total_flow > 0.0);
        // orders->db-orders (4 rps) is narrower than api-gateway->orders (50 rps).
        assert!(report.flow_edges.contains(&EdgeKey::new("orders", "db-orders")));
    }

    #[test]
    fn node_scores_are_recomputed_not_accumulated() {
        let mut graph = checkout_graph();
        let analyzer = FlowAnalyzer::default();

        let first = analyzer.analyze(&graph);
        graph.apply_analysis(&first);
        let second = analyzer.analyze(&graph);
        assert_eq!(first.node_scores, second.node_scores);

        let orders = first.node_scores["orders"];
        assert_eq!(orders.degradation, 1);
        assert!(orders.structural > 0);
        assert_eq!(graph.node("orders").unwrap().degradation_score, 1);
        let top: Vec<String> = first.top_nodes(2).into_iter().map(|(name, _)| name).collect();
        assert_eq!(top, vec!["db-orders".to_string(), "orders".to_string()]);
    }

    #[test]
    fn missing_source_skips_flow_only() {
        let graph = checkout_graph();
        let analyzer = FlowAnalyzer::new(
            AnalysisConfig {
                source_node: "edge-proxy".into(),
                ..AnalysisConfig::default()
            },
            ThresholdConfig::default(),
        );
        let report = analyzer.analyze(&graph);
        assert_eq!(report.total_flow, 0.0);
        assert!(report.flow_edges.is_empty());
        assert!(!report.trace_edges.is_empty());
    }

    #[test]
    fn adaptive_mode_falls_back_on_small_population() {
        let graph = checkout_graph();
        let analyzer = FlowAnalyzer::new(
            AnalysisConfig::default(),
            ThresholdConfig {
                mode: ThresholdMode::Adaptive,
                ..ThresholdConfig::default()
            },
        );
        // Four edges is below the five needed for adaptive bounds.
        let report = analyzer.analyze(&graph);
        assert_eq!(report.thresholds, Thresholds::new(120.0, 200.0));
    }

    #[test]
    fn empty_graph_yields_empty_report() {
        let report = FlowAnalyzer::default().analyze(&SlidingWindowGraph::default());
        assert!(report.structural_edges().is_empty());
        assert!(report.hybrid_scores.is_empty());
        assert!(report.ranked().is_empty());
        assert_eq!(report.total_flow, 0.0);
        assert_eq!(report.analyzed_at, None);
    }
}
