use crate::alert::{worst_status, Alert, AlertEngine};
use crate::analysis::{AnalysisReport, FlowAnalyzer};
use crate::capture::RecordCapture;
use crate::config::{Config, IngestConfig};
use crate::record::CallRecord;
use crate::snapshot::{GraphExport, MonitorStats};
use crate::window::{SinkMatcher, SlidingWindowGraph};
use anyhow::Result;
use crossbeam::channel::TryRecvError;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::{self, JoinHandle};

const IDLE_POLL_MS: u64 = 10;

/// Everything readers can observe. Mutated only under the engine's write guard,
/// one logical operation at a time.
#[derive(Debug, Clone)]
pub struct MonitorState {
    pub graph: SlidingWindowGraph,
    pub alerts: AlertEngine,
    /// Human-readable ingestion lines, oldest first
    pub recent_logs: VecDeque<String>,
    pub last_report: Option<AnalysisReport>,
    recent_logs_cap: usize,
}

impl MonitorState {
    pub fn new(config: &Config) -> Self {
        let graph = SlidingWindowGraph::new(
            config.window.clone(),
            SinkMatcher::new(&config.analysis.sink_prefixes),
            config.thresholds.fixed(),
        );
        Self {
            graph,
            alerts: AlertEngine::new(config.alerts.clone(), config.thresholds.clone()),
            recent_logs: VecDeque::new(),
            last_report: None,
            recent_logs_cap: config.ingest.recent_logs,
        }
    }

    /// Add a record to the window and evaluate its edge.
    pub fn ingest(&mut self, record: CallRecord) -> Result<Vec<Alert>> {
        if !record.latency_ms.is_finite() || record.latency_ms < 0.0 {
            anyhow::bail!(
                "Invalid latency {} for {} -> {}",
                record.latency_ms,
                record.src_service,
                record.dst_service
            );
        }

        let key = record.edge_key();
        let observed_at = record.timestamp;
        let line = format!(
            "{} {}{} -> {}{} {:.1}ms",
            record.timestamp.to_rfc3339(),
            record.src_service,
            record.src_route,
            record.dst_service,
            record.dst_route,
            record.latency_ms
        );

        self.graph.add_record(record);
        self.alerts.refresh_thresholds(self.graph.edges());

        let raised = match self.graph.edge(&key) {
            // A late record lands mid-history; the newest sample was already judged.
            Some(metrics) if metrics.samples().last().is_some_and(|s| s.timestamp > observed_at) => {
                tracing::trace!(edge = %key, "late record, skipping alert evaluation");
                Vec::new()
            }
            Some(metrics) => self.alerts.observe_edge(&key.source, &key.target, metrics),
            // The record was already older than the window allows.
            None => Vec::new(),
        };

        if let Some(level) = worst_status(&raised) {
            self.graph.force_status(&key.source, level);
            self.graph.force_status(&key.target, level);
        }

        if self.recent_logs_cap > 0 {
            self.recent_logs.push_back(line);
            while self.recent_logs.len() > self.recent_logs_cap {
                self.recent_logs.pop_front();
            }
        }

        Ok(raised)
    }

    /// Publish a report unless a newer one is already in place.
    pub fn apply_report(&mut self, report: AnalysisReport) -> bool {
        if let Some(last) = &self.last_report {
            if report.records_seen < last.records_seen {
                tracing::debug!(
                    records_seen = report.records_seen,
                    current = last.records_seen,
                    "discarding stale analysis report"
                );
                return false;
            }
        }
        self.graph.apply_analysis(&report);
        self.last_report = Some(report);
        true
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            total_logs: self.graph.total_records(),
            active_nodes: self.graph.nodes().len(),
            window_size: self.graph.len(),
            status: self.alerts.overall_status(),
            max_flow: self.graph.max_flow(),
            alerts: self.alerts.len(),
        }
    }
}

/// Owns the shared monitor state, the record buffer and the background tasks
/// that ingest and analyze.
pub struct MonitorEngine {
    config: Config,
    capture: Arc<RecordCapture>,
    analyzer: Arc<FlowAnalyzer>,
    state: Arc<RwLock<MonitorState>>,
    running: Arc<RwLock<bool>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitorEngine {
    pub fn new(config: Config) -> Self {
        let capture = Arc::new(RecordCapture::new(config.ingest.buffer_size));
        let analyzer = Arc::new(FlowAnalyzer::new(
            config.analysis.clone(),
            config.thresholds.clone(),
        ));
        let state = Arc::new(RwLock::new(MonitorState::new(&config)));

        Self {
            config,
            capture,
            analyzer,
            state,
            running: Arc::new(RwLock::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the ingestion and analysis tasks
    pub async fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let mut running = self.running.write().await;
        if *running {
            return Ok(());
        }
        *running = true;
        drop(running);

        let capture = Arc::clone(&self.capture);
        let state = Arc::clone(&self.state);
        let ingest = self.config.ingest.clone();
        let running = Arc::clone(&self.running);
        tasks.push(task::spawn(async move {
            Self::process_records(capture, state, ingest, running).await;
        }));

        let analyzer = Arc::clone(&self.analyzer);
        let state = Arc::clone(&self.state);
        let interval_ms = self.config.analysis.interval_ms;
        let running = Arc::clone(&self.running);
        tasks.push(task::spawn(async move {
            Self::analyze_periodically(analyzer, state, interval_ms, running).await;
        }));

        tracing::info!(
            interval_ms = self.config.ingest.interval_ms,
            analysis_interval_ms = self.config.analysis.interval_ms,
            "monitor engine started"
        );
        Ok(())
    }

    /// Stop the engine and wait for both background tasks to exit.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        *self.running.write().await = false;

        for handle in tasks.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!("Background task failed: {}", e);
            }
        }
        tracing::info!("monitor engine stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    async fn process_records(
        capture: Arc<RecordCapture>,
        state: Arc<RwLock<MonitorState>>,
        config: IngestConfig,
        running: Arc<RwLock<bool>>,
    ) {
        let receiver = capture.get_receiver();
        let interval = Duration::from_millis(config.interval_ms);
        let idle = Duration::from_millis(config.interval_ms.max(IDLE_POLL_MS));

        loop {
            {
                let is_running = running.read().await;
                if !*is_running {
                    break;
                }
            }

            match receiver.try_recv() {
                Ok(record) => {
                    let mut guard = state.write().await;
                    if let Err(e) = guard.ingest(record) {
                        tracing::error!("Failed to ingest record: {}", e);
                    }
                    drop(guard);

                    if interval.is_zero() {
                        task::yield_now().await;
                    } else {
                        tokio::time::sleep(interval).await;
                    }
                }
                Err(TryRecvError::Empty) => tokio::time::sleep(idle).await,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    async fn analyze_periodically(
        analyzer: Arc<FlowAnalyzer>,
        state: Arc<RwLock<MonitorState>>,
        interval_ms: u64,
        running: Arc<RwLock<bool>>,
    ) {
        let period = Duration::from_millis(interval_ms.max(1));
        loop {
            tokio::time::sleep(period).await;
            {
                let is_running = running.read().await;
                if !*is_running {
                    break;
                }
            }
            Self::run_analysis(&analyzer, &state).await;
        }
    }

    /// Analyze a copy of the graph outside the lock, then write findings back.
    async fn run_analysis(
        analyzer: &FlowAnalyzer,
        state: &RwLock<MonitorState>,
    ) -> AnalysisReport {
        let snapshot = {
            let guard = state.read().await;
            guard.graph.clone()
        };

        let report = analyzer.analyze(&snapshot);

        let mut guard = state.write().await;
        guard.apply_report(report.clone());
        report
    }

    pub fn capture(&self) -> Arc<RecordCapture> {
        Arc::clone(&self.capture)
    }

    pub async fn ingest(&self, record: CallRecord) -> Result<Vec<Alert>> {
        let mut guard = self.state.write().await;
        guard.ingest(record)
    }

    pub async fn analyze_now(&self) -> AnalysisReport {
        Self::run_analysis(&self.analyzer, &self.state).await
    }

    pub async fn export(&self) -> GraphExport {
        let guard = self.state.read().await;
        guard.graph.export()
    }

    pub async fn recent_logs(&self) -> Vec<String> {
        let guard = self.state.read().await;
        guard.recent_logs.iter().cloned().collect()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        let guard = self.state.read().await;
        guard.alerts.get_alerts()
    }

    pub async fn stats(&self) -> MonitorStats {
        let guard = self.state.read().await;
        guard.stats()
    }

    pub async fn report(&self) -> Option<AnalysisReport> {
        let guard = self.state.read().await;
        guard.last_report.clone()
    }
}
