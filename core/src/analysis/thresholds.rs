use crate::config::{ThresholdConfig, ThresholdMode};
use crate::record::{EdgeMetrics, Status};
use serde::Serialize;

/// Resolved warning / critical latency bounds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub warning_ms: f64,
    pub critical_ms: f64,
}

impl Thresholds {
    pub fn new(warning_ms: f64, critical_ms: f64) -> Self {
        Self {
            warning_ms,
            critical_ms,
        }
    }

    /// Degradation level for a latency, `None` below the warning bound.
    pub fn classify(&self, latency_ms: f64) -> Option<Status> {
        if latency_ms >= self.critical_ms {
            Some(Status::Critical)
        } else if latency_ms >= self.warning_ms {
            Some(Status::Warning)
        } else {
            None
        }
    }

    pub fn status_for(&self, latency_ms: f64) -> Status {
        self.classify(latency_ms).unwrap_or(Status::Ok)
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        ThresholdConfig::default().fixed()
    }
}

impl ThresholdConfig {
    pub fn fixed(&self) -> Thresholds {
        Thresholds::new(self.warning_ms, self.critical_ms)
    }

    /// Thresholds for the current edge population under the configured mode.
    pub fn resolve<'a, I>(&self, edges: I) -> Thresholds
    where
        I: IntoIterator<Item = &'a EdgeMetrics>,
    {
        match self.mode {
            ThresholdMode::Fixed => self.fixed(),
            ThresholdMode::Adaptive => {
                let latencies: Vec<f64> = edges.into_iter().map(EdgeMetrics::avg_latency).collect();
                compute_adaptive_thresholds(&latencies, self.fixed(), self.min_adaptive_edges)
            }
        }
    }
}

/// `median + σ` / `median + 2σ` over the positive latencies, or `fallback`
/// when fewer than `min_edges` qualify or the population has no spread.
pub fn compute_adaptive_thresholds(
    avg_latencies: &[f64],
    fallback: Thresholds,
    min_edges: usize,
) -> Thresholds {
    let mut values: Vec<f64> = avg_latencies
        .iter()
        .copied()
        .filter(|latency| latency.is_finite() && *latency > 0.0)
        .collect();

    if values.is_empty() || values.len() < min_edges {
        return fallback;
    }

    values.sort_by(f64::total_cmp);
    let median = median_of_sorted(&values);

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let std_dev = variance.sqrt();

    if std_dev <= 0.0 {
        return fallback;
    }

    Thresholds::new(median + std_dev, median + 2.0 * std_dev)
}

fn median_of_sorted(values: &[f64]) -> f64 {
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
