use crate::config::HybridWeights;
use crate::record::{EdgeKey, EdgeMetrics};
use std::collections::BTreeMap;

/// Blend structural implication, latency severity and relative capacity
/// scarcity into one score per edge.
///
/// `structural_counts` holds trace-path plus min-cut counts per edge.
pub fn hybrid_scores(
    edges: &BTreeMap<EdgeKey, EdgeMetrics>,
    structural_counts: &BTreeMap<EdgeKey, u32>,
    critical_ms: f64,
    weights: &HybridWeights,
) -> BTreeMap<EdgeKey, f64> {
    let max_structural = structural_counts.values().copied().max().unwrap_or(0);
    let max_capacity = edges
        .values()
        .map(EdgeMetrics::capacity_rps)
        .fold(0.0_f64, f64::max);

    edges
        .iter()
        .map(|(key, metrics)| {
            let structural = structural_counts.get(key).copied().unwrap_or(0);
            let structural_norm = if max_structural > 0 {
                structural as f64 / max_structural as f64
            } else {
                0.0
            };

            let avg = metrics.avg_latency();
            let latency_norm = if avg > 0.0 && critical_ms > 0.0 {
                (avg / critical_ms).min(1.0)
            } else {
                0.0
            };

            let capacity = metrics.capacity_rps();
            let capacity_penalty = if capacity > 0.0 && max_capacity > 0.0 {
                (1.0 - capacity / max_capacity).clamp(0.0, 1.0)
            } else {
                0.0
            };

            let score = weights.structural * structural_norm
                + weights.latency * latency_norm
                + weights.capacity * capacity_penalty;
            (key.clone(), score)
        })
        .collect()
}

/// Sum of trace and flow counts per edge.
pub fn combine_counts(
    trace_counts: &BTreeMap<EdgeKey, u32>,
    flow_counts: &BTreeMap<EdgeKey, u32>,
) -> BTreeMap<EdgeKey, u32> {
    let mut combined = trace_counts.clone();
    for (key, count) in flow_counts {
        *combined.entry(key.clone()).or_insert(0) += count;
    }
    combined
}

/// Sum of combined structural counts over each node's incident edges.
pub fn structural_scores<'a, I>(nodes: I, combined: &BTreeMap<EdgeKey, u32>) -> BTreeMap<String, u32>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut scores: BTreeMap<String, u32> = nodes.into_iter().map(|n| (n.clone(), 0)).collect();
    for (key, count) in combined {
        if let Some(score) = scores.get_mut(&key.source) {
            *score += count;
        }
        if let Some(score) = scores.get_mut(&key.target) {
            *score += count;
        }
    }
    scores
}
