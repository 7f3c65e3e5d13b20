use crate::analysis::thresholds::Thresholds;
use crate::analysis::AnalysisReport;
use crate::config::WindowConfig;
use crate::record::{CallRecord, EdgeKey, EdgeMetrics, NodeMetrics, NodeStatus, Status};
use crate::snapshot::{EdgeView, GraphExport, NodeView};
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

// Roughly a century; keeps the chrono duration in range.
const MAX_AGE_SECONDS: u64 = 3_153_600_000;

/// Decides which services are terminal (data stores and the like).
#[derive(Debug, Clone)]
pub struct SinkMatcher {
    prefixes: Vec<String>,
}

impl SinkMatcher {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_sink(&self, service: &str) -> bool {
        let name = service.to_lowercase();
        self.prefixes.iter().any(|prefix| name.starts_with(prefix))
    }
}

impl Default for SinkMatcher {
    fn default() -> Self {
        Self::new(["db"])
    }
}

/// Findings of the most recent analysis pass, kept across rebuilds.
#[derive(Debug, Clone, Default)]
struct Findings {
    bottleneck_edges: BTreeSet<EdgeKey>,
    max_flow: f64,
    hybrid_scores: BTreeMap<EdgeKey, f64>,
    degradation: BTreeMap<EdgeKey, Status>,
    node_scores: BTreeMap<String, (u32, u32)>,
}

/// Bounded window of recent call records with node and edge aggregates
/// derived from it.
#[derive(Debug, Clone)]
pub struct SlidingWindowGraph {
    config: WindowConfig,
    sinks: SinkMatcher,
    status_thresholds: Thresholds,
    window: VecDeque<CallRecord>,
    /// Newest timestamp ever inserted
    watermark: Option<DateTime<Utc>>,
    nodes: BTreeMap<String, NodeMetrics>,
    edges: BTreeMap<EdgeKey, EdgeMetrics>,
    findings: Findings,
    total_records: u64,
}

impl SlidingWindowGraph {
    pub fn new(config: WindowConfig, sinks: SinkMatcher, status_thresholds: Thresholds) -> Self {
        Self {
            window: VecDeque::with_capacity(config.max_events.min(4096)),
            config,
            sinks,
            status_thresholds,
            watermark: None,
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            findings: Findings::default(),
            total_records: 0,
        }
    }

    /// Insert a record, evict by count and then by age, and rebuild aggregates.
    pub fn add_record(&mut self, record: CallRecord) {
        let timestamp = record.timestamp;
        self.window.push_back(record);
        self.total_records += 1;

        while self.window.len() > self.config.max_events {
            self.window.pop_front();
        }

        let newest = match self.watermark {
            Some(current) if current >= timestamp => current,
            _ => timestamp,
        };
        self.watermark = Some(newest);
        self.evict_older_than(newest);

        self.rebuild();
    }

    fn evict_older_than(&mut self, newest: DateTime<Utc>) {
        if self.config.max_seconds == 0 {
            return;
        }
        let max_age = Duration::seconds(self.config.max_seconds.min(MAX_AGE_SECONDS) as i64);
        let Some(threshold) = newest.checked_sub_signed(max_age) else {
            return;
        };

        while self
            .window
            .front()
            .is_some_and(|front| front.timestamp < threshold)
        {
            self.window.pop_front();
        }
        // Out-of-order arrivals can leave stale records behind the front.
        self.window.retain(|record| record.timestamp >= threshold);
    }

    fn rebuild(&mut self) {
        let mut observations: BTreeMap<EdgeKey, Vec<(DateTime<Utc>, f64)>> = BTreeMap::new();
        let mut nodes: BTreeMap<String, NodeMetrics> = BTreeMap::new();

        for record in &self.window {
            for name in [&record.src_service, &record.dst_service] {
                if !nodes.contains_key(name) {
                    nodes.insert(name.clone(), NodeMetrics::new(name.clone()));
                }
            }
            observations
                .entry(record.edge_key())
                .or_default()
                .push((record.timestamp, record.latency_ms));
        }

        let edges: BTreeMap<EdgeKey, EdgeMetrics> = observations
            .into_iter()
            .map(|(key, obs)| (key, EdgeMetrics::from_observations(obs)))
            .collect();

        let mut incoming: HashMap<&str, (usize, f64)> = HashMap::new();
        for (key, metrics) in &edges {
            let entry = incoming.entry(key.target.as_str()).or_insert((0, 0.0));
            entry.0 += metrics.count();
            entry.1 += metrics.samples().iter().map(|s| s.latency_ms).sum::<f64>();
        }

        for node in nodes.values_mut() {
            if let Some((count, total)) = incoming.get(node.name.as_str()) {
                node.load = *count;
                node.avg_latency = if *count > 0 { total / *count as f64 } else { 0.0 };
            }
            node.status = NodeStatus::Computed(self.status_thresholds.status_for(node.avg_latency));
            if let Some((structural, degradation)) = self.findings.node_scores.get(&node.name) {
                node.structural_score = *structural;
                node.degradation_score = *degradation;
            }
        }

        self.nodes = nodes;
        self.edges = edges;
    }

    /// Nodes matching the sink predicate, or every node when none match.
    pub fn sinks(&self) -> Vec<String> {
        let sinks: Vec<String> = self
            .nodes
            .keys()
            .filter(|name| self.sinks.is_sink(name))
            .cloned()
            .collect();
        if sinks.is_empty() {
            return self.nodes.keys().cloned().collect();
        }
        sinks
    }

    pub fn sink_matcher(&self) -> &SinkMatcher {
        &self.sinks
    }

    /// Window records grouped by trace id, each group in timestamp order.
    pub fn traces(&self) -> BTreeMap<&str, Vec<&CallRecord>> {
        let mut traces: BTreeMap<&str, Vec<&CallRecord>> = BTreeMap::new();
        for record in &self.window {
            traces.entry(record.trace_id.as_str()).or_default().push(record);
        }
        for records in traces.values_mut() {
            records.sort_by_key(|record| record.timestamp);
        }
        traces
    }

    pub fn nodes(&self) -> &BTreeMap<String, NodeMetrics> {
        &self.nodes
    }

    pub fn edges(&self) -> &BTreeMap<EdgeKey, EdgeMetrics> {
        &self.edges
    }

    pub fn node(&self, name: &str) -> Option<&NodeMetrics> {
        self.nodes.get(name)
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&EdgeMetrics> {
        self.edges.get(key)
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn window(&self) -> &VecDeque<CallRecord> {
        &self.window
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn max_flow(&self) -> f64 {
        self.findings.max_flow
    }

    pub fn status_thresholds(&self) -> Thresholds {
        self.status_thresholds
    }

    /// Pin a node's status until the next rebuild recomputes it.
    pub fn force_status(&mut self, name: &str, status: Status) -> bool {
        match self.nodes.get_mut(name) {
            Some(node) => {
                node.status = NodeStatus::Forced(status);
                true
            }
            None => false,
        }
    }

    /// Store the findings of an analysis pass and write node scores back.
    pub fn apply_analysis(&mut self, report: &AnalysisReport) {
        self.findings = Findings {
            bottleneck_edges: report.structural_edges(),
            max_flow: report.total_flow,
            hybrid_scores: report.hybrid_scores.clone(),
            degradation: report.degradation.clone(),
            node_scores: report
                .node_scores
                .iter()
                .map(|(name, scores)| (name.clone(), (scores.structural, scores.degradation)))
                .collect(),
        };
        self.status_thresholds = report.thresholds;

        for node in self.nodes.values_mut() {
            let (structural, degradation) = self
                .findings
                .node_scores
                .get(&node.name)
                .copied()
                .unwrap_or((0, 0));
            node.structural_score = structural;
            node.degradation_score = degradation;
        }
    }

    /// Serializable snapshot of the current graph and latest findings.
    pub fn export(&self) -> GraphExport {
        let nodes = self
            .nodes
            .values()
            .map(|node| NodeView {
                id: node.name.clone(),
                label: node.name.clone(),
                load: node.load,
                avg_latency: node.avg_latency,
                status: node.status.resolve(),
                bottleneck_score: node.bottleneck_score(),
                structural_score: node.structural_score,
                degradation_score: node.degradation_score,
            })
            .collect();

        let edges = self
            .edges
            .iter()
            .map(|(key, metrics)| {
                let avg = metrics.avg_latency();
                EdgeView {
                    id: key.to_string(),
                    source: key.source.clone(),
                    target: key.target.clone(),
                    latency: metrics.last_latency(),
                    avg_latency: avg,
                    capacity: (avg > 0.0).then(|| metrics.flow_capacity()),
                    request_rate: metrics.request_rate(),
                    calls: metrics.count(),
                    hybrid_score: self.findings.hybrid_scores.get(key).copied(),
                    degradation: self.findings.degradation.get(key).copied(),
                    is_bottleneck: self.findings.bottleneck_edges.contains(key),
                }
            })
            .collect();

        let bottlenecks = self
            .findings
            .bottleneck_edges
            .iter()
            .filter(|key| self.edges.contains_key(*key))
            .map(|key| {
                let score = self.findings.hybrid_scores.get(key).copied().unwrap_or(0.0);
                (key, score)
            })
            .sorted_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)))
            .map(|(key, _)| key.to_string())
            .collect();

        GraphExport {
            nodes,
            edges,
            max_flow: self.findings.max_flow,
            bottlenecks,
        }
    }
}

impl Default for SlidingWindowGraph {
    fn default() -> Self {
        Self::new(
            WindowConfig::default(),
            SinkMatcher::default(),
            Thresholds::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn call(trace: &str, src: &str, dst: &str, offset_ms: i64, latency: f64) -> CallRecord {
        CallRecord {
            trace_id: trace.into(),
            span_id: format!("{trace}-{src}-{dst}-{offset_ms}"),
            parent_span_id: None,
            timestamp: base() + Duration::milliseconds(offset_ms),
            src_service: src.into(),
            src_route: "/".into(),
            dst_service: dst.into(),
            dst_route: "/".into(),
            latency_ms: latency,
        }
    }

    fn graph(max_events: usize, max_seconds: u64) -> SlidingWindowGraph {
        SlidingWindowGraph::new(
            WindowConfig {
                max_events,
                max_seconds,
            },
            SinkMatcher::default(),
            Thresholds::default(),
        )
    }

    fn span_seconds(graph: &SlidingWindowGraph) -> i64 {
        let min = graph.window().iter().map(|r| r.timestamp).min();
        let max = graph.window().iter().map(|r| r.timestamp).max();
        match (min, max) {
            (Some(min), Some(max)) => (max - min).num_milliseconds(),
            _ => 0,
        }
    }

    #[test]
    fn empty_graph_queries_return_zero_values() {
        let graph = SlidingWindowGraph::default();
        assert!(graph.is_empty());
        assert!(graph.nodes().is_empty());
        assert!(graph.edges().is_empty());
        assert!(graph.sinks().is_empty());
        assert!(graph.traces().is_empty());
        assert_eq!(graph.max_flow(), 0.0);
        let export = graph.export();
        assert!(export.nodes.is_empty() && export.edges.is_empty());
    }

    #[test]
    fn count_bound_evicts_oldest_first() {
        let mut graph = graph(3, 0);
        for i in 0..5 {
            graph.add_record(call("t", "a", "b", i * 10, i as f64));
            assert!(graph.len() <= 3);
        }
        let latencies: Vec<f64> = graph.window().iter().map(|r| r.latency_ms).collect();
        assert_eq!(latencies, vec![2.0, 3.0, 4.0]);
        assert_eq!(graph.total_records(), 5);
    }

    #[test]
    fn age_bound_holds_for_out_of_order_input() {
        let mut graph = graph(100, 10);
        let offsets_s = [0, 5, 12, 3, 20, 11, 25, 30, 2];
        for (i, offset) in offsets_s.iter().enumerate() {
            graph.add_record(call("t", "a", "b", offset * 1000, i as f64 + 1.0));
            assert!(span_seconds(&graph) <= 10_000);
            assert!(graph.len() <= 100);
        }
        // Only records within 10s of the 30s watermark survive.
        assert!(graph.window().iter().all(|r| r.timestamp >= base() + Duration::seconds(20)));
    }

    #[test]
    fn aggregates_match_window_contents() {
        let mut graph = graph(4, 0);
        let inputs = [
            ("a", "b", 10.0),
            ("a", "b", 20.0),
            ("b", "db-main", 40.0),
            ("a", "c", 5.0),
            ("c", "db-main", 60.0),
            ("a", "b", 30.0),
        ];
        for (i, (src, dst, latency)) in inputs.iter().enumerate() {
            graph.add_record(call("t", src, dst, i as i64, *latency));

            for (key, metrics) in graph.edges() {
                let expected = graph
                    .window()
                    .iter()
                    .filter(|r| r.src_service == key.source && r.dst_service == key.target)
                    .count();
                assert_eq!(metrics.count(), expected);
            }
            for record in graph.window() {
                assert!(graph.contains_node(&record.src_service));
                assert!(graph.contains_node(&record.dst_service));
            }
            assert!(graph.nodes().keys().all(|name| graph
                .window()
                .iter()
                .any(|r| &r.src_service == name || &r.dst_service == name)));
        }

        // Window is now: b->db 40, a->c 5, c->db 60, a->b 30
        let db = graph.node("db-main").unwrap();
        assert_eq!(db.load, 2);
        assert!((db.avg_latency - 50.0).abs() < 1e-9);
        assert_eq!(graph.node("a").unwrap().load, 0);
    }

    #[test]
    fn sinks_match_prefix_case_insensitively() {
        let mut graph = graph(10, 0);
        graph.add_record(call("t", "api-gateway", "orders", 0, 10.0));
        graph.add_record(call("t", "orders", "DB-Orders", 1, 10.0));
        assert_eq!(graph.sinks(), vec!["DB-Orders".to_string()]);
    }

    #[test]
    fn sinks_fall_back_to_all_nodes() {
        let mut graph = graph(10, 0);
        graph.add_record(call("t", "api-gateway", "orders", 0, 10.0));
        assert_eq!(
            graph.sinks(),
            vec!["api-gateway".to_string(), "orders".to_string()]
        );
    }

    #[test]
    fn traces_are_grouped_and_time_sorted() {
        let mut graph = graph(10, 0);
        graph.add_record(call("t1", "b", "c", 30, 1.0));
        graph.add_record(call("t2", "x", "y", 5, 1.0));
        graph.add_record(call("t1", "a", "b", 10, 1.0));

        let traces = graph.traces();
        assert_eq!(traces.len(), 2);
        let t1: Vec<&str> = traces["t1"].iter().map(|r| r.src_service.as_str()).collect();
        assert_eq!(t1, vec!["a", "b"]);
    }

    #[test]
    fn computed_status_follows_incoming_latency_and_rebuild_clears_forced() {
        let mut graph = graph(10, 0);
        graph.add_record(call("t", "a", "slow", 0, 250.0));
        graph.add_record(call("t", "a", "fast", 1, 20.0));
        assert_eq!(graph.node("slow").unwrap().status, NodeStatus::Computed(Status::Critical));
        assert_eq!(graph.node("fast").unwrap().status, NodeStatus::Computed(Status::Ok));

        assert!(graph.force_status("fast", Status::Warning));
        assert_eq!(graph.node("fast").unwrap().status.resolve(), Status::Warning);
        assert!(!graph.force_status("missing", Status::Warning));

        graph.add_record(call("t", "a", "fast", 2, 20.0));
        assert_eq!(graph.node("fast").unwrap().status, NodeStatus::Computed(Status::Ok));
    }

    #[test]
    fn export_is_idempotent_and_nulls_capacity_for_zero_latency() {
        let mut graph = graph(10, 0);
        graph.add_record(call("t", "a", "b", 0, 0.0));
        graph.add_record(call("t", "b", "db", 1, 25.0));

        let first = graph.export();
        let second = graph.export();
        assert_eq!(first, second);

        let zero = first.edges.iter().find(|e| e.id == "a->b").unwrap();
        assert_eq!(zero.capacity, None);
        let db = first.edges.iter().find(|e| e.id == "b->db").unwrap();
        assert!((db.capacity.unwrap() - 40.0).abs() < 1e-9);
        assert!(!db.is_bottleneck);
    }
}
