//! Per-request critical-path attribution.
//!
//! Each trace is rebuilt into a call tree from parent/child span references.
//! Every root-to-sink path names its slowest hop as that request's bottleneck.

use crate::record::{CallRecord, EdgeKey};
use crate::window::SinkMatcher;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Edges named as a path bottleneck, with how many paths named each.
#[derive(Debug, Clone, Default)]
pub struct TraceFindings {
    pub edges: BTreeSet<EdgeKey>,
    pub counts: BTreeMap<EdgeKey, u32>,
    pub traces_examined: usize,
    pub paths_found: usize,
}

/// Reconstruct every root-to-sink request path of one trace.
///
/// A record is a root when its parent span is missing or not part of this
/// trace. A path is emitted each time the traversal reaches a call into a
/// sink; traversal continues below it.
pub fn build_paths_for_trace<'a>(
    records: &[&'a CallRecord],
    sinks: &SinkMatcher,
) -> Vec<Vec<&'a CallRecord>> {
    let span_ids: HashSet<&str> = records.iter().map(|r| r.span_id.as_str()).collect();

    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();
    for (idx, record) in records.iter().enumerate() {
        match record.parent() {
            Some(parent) if span_ids.contains(parent) => {
                children.entry(parent).or_default().push(idx);
            }
            _ => roots.push(idx),
        }
    }

    let mut paths = Vec::new();
    let mut path = Vec::new();
    let mut on_path = vec![false; records.len()];
    // Records on the current path, each with the index of its next child.
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in roots {
        enter(root, records, sinks, &mut stack, &mut path, &mut on_path, &mut paths);

        while let Some(&(idx, cursor)) = stack.last() {
            let next = children
                .get(records[idx].span_id.as_str())
                .and_then(|kids| kids.get(cursor))
                .copied();
            match next {
                Some(child) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    // Duplicate span ids can make a record its own descendant.
                    if !on_path[child] {
                        enter(child, records, sinks, &mut stack, &mut path, &mut on_path, &mut paths);
                    }
                }
                None => {
                    stack.pop();
                    path.pop();
                    on_path[idx] = false;
                }
            }
        }
    }
    paths
}

fn enter<'a>(
    idx: usize,
    records: &[&'a CallRecord],
    sinks: &SinkMatcher,
    stack: &mut Vec<(usize, usize)>,
    path: &mut Vec<&'a CallRecord>,
    on_path: &mut [bool],
    paths: &mut Vec<Vec<&'a CallRecord>>,
) {
    let current = records[idx];
    on_path[idx] = true;
    path.push(current);
    stack.push((idx, 0));

    if sinks.is_sink(&current.dst_service) {
        paths.push(path.clone());
    }
}

/// The slowest hop of a path; the earliest one wins ties.
pub fn path_bottleneck<'a>(path: &[&'a CallRecord]) -> Option<&'a CallRecord> {
    path.iter().copied().fold(None, |slowest, record| match slowest {
        Some(current) if current.latency_ms >= record.latency_ms => Some(current),
        _ => Some(record),
    })
}

/// Run critical-path attribution over every trace in the window.
pub fn trace_structural_phase(
    traces: &BTreeMap<&str, Vec<&CallRecord>>,
    sinks: &SinkMatcher,
) -> TraceFindings {
    let mut findings = TraceFindings {
        traces_examined: traces.len(),
        ..TraceFindings::default()
    };

    for (trace_id, records) in traces {
        let paths = build_paths_for_trace(records, sinks);
        if paths.is_empty() {
            tracing::trace!(trace_id = %trace_id, "no complete path to a sink");
            continue;
        }

        for path in &paths {
            if let Some(bottleneck) = path_bottleneck(path) {
                let key = bottleneck.edge_key();
                *findings.counts.entry(key.clone()).or_insert(0) += 1;
                findings.edges.insert(key);
            }
        }
        findings.paths_found += paths.len();
    }

    tracing::debug!(
        traces = findings.traces_examined,
        paths = findings.paths_found,
        edges = findings.edges.len(),
        "trace structural phase complete"
    );

    findings
}
