use crate::analysis::thresholds::Thresholds;
use crate::config::{AlertConfig, ThresholdConfig};
use crate::record::{EdgeKey, EdgeMetrics, Status};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use uuid::Uuid;

const MAX_HORIZON_SECONDS: u64 = 3_153_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Node status implied by an alert of this severity.
    pub fn status(&self) -> Option<Status> {
        match self {
            Severity::Info => None,
            Severity::Warning => Some(Status::Warning),
            Severity::Critical => Some(Status::Critical),
        }
    }
}

impl From<Status> for Severity {
    fn from(status: Status) -> Self {
        match status {
            Status::Ok => Severity::Info,
            Status::Warning => Severity::Warning,
            Status::Critical => Severity::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    /// `src/dst`
    pub route: String,
    pub meta: String,
    /// Timestamp of the observation that raised the alert
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    fn new(
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
        key: &EdgeKey,
        meta: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            title: title.into(),
            message: message.into(),
            route: format!("{}/{}", key.source, key.target),
            meta: meta.into(),
            timestamp,
        }
    }
}

/// Evaluates edges against latency thresholds and short-term trend, keeping a
/// capped alert log that is newest first.
#[derive(Debug, Clone)]
pub struct AlertEngine {
    config: AlertConfig,
    policy: ThresholdConfig,
    thresholds: Thresholds,
    alerts: VecDeque<Alert>,
    /// Edges whose last evaluation raised an alert
    alerting: BTreeSet<EdgeKey>,
    latest_observation: Option<DateTime<Utc>>,
}

impl AlertEngine {
    pub fn new(config: AlertConfig, policy: ThresholdConfig) -> Self {
        Self {
            thresholds: policy.fixed(),
            alerts: VecDeque::with_capacity(config.max_alerts.min(1024)),
            config,
            policy,
            alerting: BTreeSet::new(),
            latest_observation: None,
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Recompute thresholds for the current edge population. Edges that have
    /// left the window stop counting as alerting.
    pub fn refresh_thresholds(&mut self, edges: &BTreeMap<EdgeKey, EdgeMetrics>) -> Thresholds {
        self.alerting.retain(|key| edges.contains_key(key));
        self.thresholds = self.policy.resolve(edges.values());
        self.thresholds
    }

    pub fn is_alerting(&self, key: &EdgeKey) -> bool {
        self.alerting.contains(key)
    }

    /// Evaluate one edge and return the alerts this raised. The same alerts
    /// are also recorded in the log.
    pub fn observe_edge(&mut self, src: &str, dst: &str, metrics: &EdgeMetrics) -> Vec<Alert> {
        let key = EdgeKey::new(src, dst);
        let Some(latest) = metrics.samples().last() else {
            return Vec::new();
        };
        if metrics.count() < self.config.min_samples {
            tracing::trace!(
                edge = %key,
                samples = metrics.count(),
                "not enough samples to evaluate edge"
            );
            return Vec::new();
        }

        let timestamp = latest.timestamp;
        self.latest_observation = Some(match self.latest_observation {
            Some(current) if current >= timestamp => current,
            _ => timestamp,
        });

        let latency = latest.latency_ms;
        let trend = metrics.trend(self.config.trend_lookback);
        let meta = format!(
            "avg={:.1}ms, last={:.1}ms, trend={:+.1}ms, samples={}",
            metrics.avg_latency(),
            latency,
            trend,
            metrics.count()
        );

        let mut raised = Vec::new();
        if let Some(level) = self.thresholds.classify(latency) {
            let bound = match level {
                Status::Critical => self.thresholds.critical_ms,
                _ => self.thresholds.warning_ms,
            };
            raised.push(Alert::new(
                level.into(),
                format!("Latency {}", level),
                format!("{} -> {} took {:.1}ms (threshold {:.1}ms)", src, dst, latency, bound),
                &key,
                meta.clone(),
                timestamp,
            ));
        }

        if let Some(level) = self.classify_trend(trend) {
            raised.push(Alert::new(
                level.into(),
                format!("Latency trend {}", level),
                format!(
                    "{} -> {} latency rose {:+.1}ms over the last {} calls",
                    src, dst, trend, self.config.trend_lookback
                ),
                &key,
                meta.clone(),
                timestamp,
            ));
        }

        if raised.is_empty() {
            if self.alerting.remove(&key) {
                raised.push(Alert::new(
                    Severity::Info,
                    "Latency recovered",
                    format!("{} -> {} is back within thresholds", src, dst),
                    &key,
                    meta,
                    timestamp,
                ));
            }
        } else {
            self.alerting.insert(key);
        }

        for alert in &raised {
            tracing::debug!(
                severity = %alert.severity,
                route = %alert.route,
                "{}",
                alert.title
            );
            self.push(alert.clone());
        }
        raised
    }

    fn classify_trend(&self, trend: f64) -> Option<Status> {
        if trend >= self.config.trend_critical_ms {
            Some(Status::Critical)
        } else if trend >= self.config.trend_warning_ms {
            Some(Status::Warning)
        } else {
            None
        }
    }

    fn push(&mut self, alert: Alert) {
        self.alerts.push_front(alert);
        self.alerts.truncate(self.config.max_alerts);
    }

    /// Alert log, most recent first.
    pub fn get_alerts(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn latest_observation(&self) -> Option<DateTime<Utc>> {
        self.latest_observation
    }

    /// System status from the warning and critical alerts raised within the
    /// recent horizon of the newest observation. A zero horizon counts the
    /// whole log.
    pub fn overall_status(&self) -> Status {
        let Some(latest) = self.latest_observation else {
            return Status::Ok;
        };
        let horizon = match self.config.recent_window_seconds {
            0 => None,
            seconds => latest
                .checked_sub_signed(Duration::seconds(seconds.min(MAX_HORIZON_SECONDS) as i64)),
        };

        let (mut warning, mut critical) = (0usize, 0usize);
        for alert in &self.alerts {
            if horizon.is_some_and(|start| alert.timestamp < start) {
                continue;
            }
            match alert.severity {
                Severity::Critical => critical += 1,
                Severity::Warning => warning += 1,
                Severity::Info => {}
            }
        }

        if critical >= self.config.critical_alert_count.max(1) {
            Status::Critical
        } else if warning + critical >= self.config.warning_alert_count.max(1) {
            Status::Warning
        } else {
            Status::Ok
        }
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
        self.alerting.clear();
        self.latest_observation = None;
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(AlertConfig::default(), ThresholdConfig::default())
    }
}

/// Most severe non-informational level among `alerts`.
pub fn worst_status(alerts: &[Alert]) -> Option<Status> {
    alerts.iter().filter_map(|alert| alert.severity.status()).max()
}
