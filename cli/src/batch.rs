//! Offline analysis of a recorded call log.

use chokepoint_core::analysis::RankedEdge;
use chokepoint_core::{AnalysisReport, CallRecord, Config, FlowAnalyzer, MonitorState, MonitorStats};
use serde::Serialize;

/// State of the analysis after a number of records.
#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    pub processed: usize,
    pub rejected: usize,
    pub stats: MonitorStats,
    pub report: AnalysisReport,
}

impl Checkpoint {
    pub fn top_edges(&self, limit: usize) -> Vec<RankedEdge> {
        self.report.ranked().into_iter().take(limit).collect()
    }
}

/// Feed `records` through a fresh monitor in order, taking a checkpoint every
/// `every` records (never when 0) and once more at the end.
pub fn analyze_records(config: &Config, records: Vec<CallRecord>, every: usize) -> Vec<Checkpoint> {
    let analyzer = FlowAnalyzer::new(config.analysis.clone(), config.thresholds.clone());
    let mut state = MonitorState::new(config);
    let mut checkpoints = Vec::new();
    let mut processed = 0usize;
    let mut rejected = 0usize;

    for record in records {
        match state.ingest(record) {
            Ok(_) => processed += 1,
            Err(e) => {
                rejected += 1;
                tracing::warn!("Skipping record: {}", e);
                continue;
            }
        }
        if every > 0 && processed % every == 0 {
            checkpoints.push(checkpoint(&analyzer, &mut state, processed, rejected));
        }
    }

    if checkpoints.last().map(|c| c.processed) != Some(processed) {
        checkpoints.push(checkpoint(&analyzer, &mut state, processed, rejected));
    }
    checkpoints
}

fn checkpoint(
    analyzer: &FlowAnalyzer,
    state: &mut MonitorState,
    processed: usize,
    rejected: usize,
) -> Checkpoint {
    let report = analyzer.analyze(&state.graph);
    state.apply_report(report.clone());
    Checkpoint {
        processed,
        rejected,
        stats: state.stats(),
        report,
    }
}
