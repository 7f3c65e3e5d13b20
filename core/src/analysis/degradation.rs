use super::thresholds::Thresholds;
use crate::record::{EdgeKey, EdgeMetrics, Status};
use std::collections::BTreeMap;

/// Classify every edge by average latency. Edges below the warning bound are
/// left out of the map.
pub fn degradation_phase(
    edges: &BTreeMap<EdgeKey, EdgeMetrics>,
    thresholds: &Thresholds,
) -> BTreeMap<EdgeKey, Status> {
    let degraded: BTreeMap<EdgeKey, Status> = edges
        .iter()
        .filter_map(|(key, metrics)| {
            thresholds
                .classify(metrics.avg_latency())
                .map(|level| (key.clone(), level))
        })
        .collect();

    tracing::debug!(
        degraded = degraded.len(),
        warning_ms = thresholds.warning_ms,
        critical_ms = thresholds.critical_ms,
        "degradation phase complete"
    );

    degraded
}

/// Number of degraded edges touching each node, counted at both endpoints.
pub fn degradation_scores<'a, I>(
    nodes: I,
    degraded: &BTreeMap<EdgeKey, Status>,
) -> BTreeMap<String, u32>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut scores: BTreeMap<String, u32> = nodes.into_iter().map(|n| (n.clone(), 0)).collect();
    for key in degraded.keys() {
        if let Some(score) = scores.get_mut(&key.source) {
            *score += 1;
        }
        if let Some(score) = scores.get_mut(&key.target) {
            *score += 1;
        }
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn metrics(latencies: &[f64]) -> EdgeMetrics {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        EdgeMetrics::from_observations(
            latencies
                .iter()
                .enumerate()
                .map(|(i, l)| (base + Duration::milliseconds(i as i64), *l))
                .collect(),
        )
    }

    #[test]
    fn edges_are_classified_by_average() {
        let mut edges = BTreeMap::new();
        edges.insert(EdgeKey::new("a", "b"), metrics(&[100.0, 150.0]));
        edges.insert(EdgeKey::new("b", "c"), metrics(&[300.0, 200.0]));
        edges.insert(EdgeKey::new("c", "d"), metrics(&[10.0, 500.0]));

        let degraded = degradation_phase(&edges, &Thresholds::new(120.0, 200.0));
        assert_eq!(degraded.get(&EdgeKey::new("a", "b")), Some(&Status::Warning));
        assert_eq!(degraded.get(&EdgeKey::new("b", "c")), Some(&Status::Critical));
        assert_eq!(degraded.get(&EdgeKey::new("c", "d")), Some(&Status::Critical));
    }

    #[test]
    fn scores_count_both_endpoints_and_reset() {
        let names: Vec<String> = ["a", "b", "c", "idle"].iter().map(|s| s.to_string()).collect();
        let mut degraded = BTreeMap::new();
        degraded.insert(EdgeKey::new("a", "b"), Status::Warning);
        degraded.insert(EdgeKey::new("b", "c"), Status::Critical);

        let scores = degradation_scores(names.iter(), &degraded);
        assert_eq!(scores["a"], 1);
        assert_eq!(scores["b"], 2);
        assert_eq!(scores["c"], 1);
        assert_eq!(scores["idle"], 0);

        let again = degradation_scores(names.iter(), &degraded);
        assert_eq!(again, scores);
    }
}
