use crate::record::{EdgeKey, EdgeMetrics};
use crate::window::SlidingWindowGraph;
use petgraph::algo::ford_fulkerson;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use thiserror::Error;

const RESIDUAL_EPSILON: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum FlowError {
    #[error("node {0} is not part of the flow network")]
    UnknownNode(String),

    #[error("source and sink are the same node ({0})")]
    SameEndpoints(String),
}

/// Maximum flow between two nodes and the edges of a minimum cut.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowResult {
    pub value: f64,
    pub min_cut: BTreeSet<EdgeKey>,
}

/// Capacity-weighted service graph.
///
/// The minimum cut is read from the source side of the final residual graph,
/// which is the same for every maximum flow.
#[derive(Debug, Clone, Default)]
pub struct FlowNetwork {
    graph: DiGraph<String, f64>,
    index: HashMap<String, NodeIndex>,
}

impl FlowNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Network over the window's edges, weighted by `EdgeMetrics::flow_capacity`.
    pub fn from_window(graph: &SlidingWindowGraph) -> Self {
        Self::from_edges(graph.edges().iter())
    }

    pub fn from_edges<'a, I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (&'a EdgeKey, &'a EdgeMetrics)>,
    {
        let mut network = Self::new();
        for (key, metrics) in edges {
            network.add_edge(&key.source, &key.target, metrics.flow_capacity());
        }
        network
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Add a directed edge. Self-loops carry no flow and are ignored; invalid
    /// capacities are clamped to zero.
    pub fn add_edge(&mut self, source: &str, target: &str, capacity: f64) {
        let from = self.node(source);
        let to = self.node(target);
        if from == to {
            return;
        }

        let capacity = if capacity.is_finite() && capacity >= 0.0 {
            capacity
        } else {
            tracing::warn!(
                source = source,
                target = target,
                capacity = capacity,
                "invalid edge capacity, treating as 0"
            );
            0.0
        };

        match self.graph.find_edge(from, to) {
            Some(edge) => self.graph[edge] += capacity,
            None => {
                self.graph.add_edge(from, to, capacity);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn capacity(&self, source: &str, target: &str) -> Option<f64> {
        let from = self.index.get(source)?;
        let to = self.index.get(target)?;
        self.graph.find_edge(*from, *to).map(|edge| self.graph[edge])
    }

    /// Maximum flow from `source` to `sink` by shortest augmenting paths,
    /// plus the minimum cut read off the final residual graph.
    pub fn max_flow(&self, source: &str, sink: &str) -> Result<FlowResult, FlowError> {
        let s = *self
            .index
            .get(source)
            .ok_or_else(|| FlowError::UnknownNode(source.to_string()))?;
        let t = *self
            .index
            .get(sink)
            .ok_or_else(|| FlowError::UnknownNode(sink.to_string()))?;
        if s == t {
            return Err(FlowError::SameEndpoints(source.to_string()));
        }

        let (value, flows) = ford_fulkerson(&self.graph, s, t);
        let reachable = self.residual_reachable(s, &flows);

        let min_cut = self
            .graph
            .edge_references()
            .filter(|edge| *edge.weight() > RESIDUAL_EPSILON)
            .filter(|edge| reachable[edge.source().index()] && !reachable[edge.target().index()])
            .map(|edge| {
                EdgeKey::new(
                    self.graph[edge.source()].clone(),
                    self.graph[edge.target()].clone(),
                )
            })
            .collect();

        Ok(FlowResult { value, min_cut })
    }

    /// Nodes reachable from `source` through edges with spare capacity, or
    /// backwards through edges that carry flow.
    fn residual_reachable(&self, source: NodeIndex, flows: &[f64]) -> Vec<bool> {
        let mut seen = vec![false; self.graph.node_count()];
        seen[source.index()] = true;
        let mut queue = VecDeque::from([source]);

        while let Some(u) = queue.pop_front() {
            for edge in self.graph.edges_directed(u, Direction::Outgoing) {
                let v = edge.target();
                if !seen[v.index()] && edge.weight() - flows[edge.id().index()] > RESIDUAL_EPSILON {
                    seen[v.index()] = true;
                    queue.push_back(v);
                }
            }
            for edge in self.graph.edges_directed(u, Direction::Incoming) {
                let v = edge.source();
                if !seen[v.index()] && flows[edge.id().index()] > RESIDUAL_EPSILON {
                    seen[v.index()] = true;
                    queue.push_back(v);
                }
            }
        }
        seen
    }
}

/// Max-flow result for one sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkFlow {
    pub sink: String,
    pub max_flow: f64,
    pub min_cut: BTreeSet<EdgeKey>,
}

/// Min-cut edges across all sinks, with the number of sinks implicating each.
#[derive(Debug, Clone, Default)]
pub struct FlowFindings {
    pub edges: BTreeSet<EdgeKey>,
    pub counts: BTreeMap<EdgeKey, u32>,
    pub total_flow: f64,
    pub sinks: Vec<SinkFlow>,
}

/// Max-flow / min-cut from `source` to every sink of the window.
///
/// Flow values are summed across sinks. Sinks equal to the source are
/// skipped; a sink that fails to compute is logged without aborting the pass.
pub fn flow_structural_phase(graph: &SlidingWindowGraph, source: &str) -> FlowFindings {
    let network = FlowNetwork::from_window(graph);

    if !graph.contains_node(source) || !network.contains(source) {
        tracing::debug!(source = source, "flow source absent from window, skipping flow phase");
        return FlowFindings::default();
    }

    flow_to_sinks(&network, source, graph.sinks())
}

pub fn flow_to_sinks<I>(network: &FlowNetwork, source: &str, sinks: I) -> FlowFindings
where
    I: IntoIterator<Item = String>,
{
    let mut findings = FlowFindings::default();

    for sink in sinks {
        match network.max_flow(source, &sink) {
            Ok(result) => {
                findings.total_flow += result.value;
                for key in &result.min_cut {
                    *findings.counts.entry(key.clone()).or_insert(0) += 1;
                    findings.edges.insert(key.clone());
                }
                tracing::trace!(
                    sink = %sink,
                    max_flow = result.value,
                    cut = result.min_cut.len(),
                    "computed sink flow"
                );
                findings.sinks.push(SinkFlow {
                    sink,
                    max_flow: result.value,
                    min_cut: result.min_cut,
                });
            }
            Err(FlowError::SameEndpoints(_)) => {
                tracing::trace!(sink = %sink, "sink is the flow source, skipping");
            }
            Err(e) => {
                tracing::warn!(sink = %sink, "failed to compute max-flow: {}", e);
            }
        }
    }

    tracing::debug!(
        total_flow = findings.total_flow,
        sinks = findings.sinks.len(),
        edges = findings.edges.len(),
        "flow structural phase complete"
    );

    findings
}
