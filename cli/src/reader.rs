//! CSV call logs: parsing and paced replay into a running engine.

use anyhow::{Context, Result};
use chokepoint_core::{CallRecord, MonitorEngine};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const FULL_COLUMNS: usize = 9;
const LEGACY_COLUMNS: usize = 6;
const RETRY_DELAY_MS: u64 = 50;

/// Parse one CSV line.
///
/// Accepts `trace_id,span_id,parent_span_id,timestamp,src_service,src_route,
/// dst_service,dst_route,latency_ms` and the older
/// `timestamp,src_service,src_route,dst_service,dst_route,latency_ms`, which
/// gets fresh trace and span ids. Headers, malformed rows and negative
/// latencies yield `None`.
pub fn parse_log_line(line: &str) -> Option<CallRecord> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();

    if fields.len() >= FULL_COLUMNS {
        let latency_ms = parse_latency(fields[8])?;
        let timestamp = parse_timestamp(fields[3])?;
        let (trace_id, span_id) = (fields[0], fields[1]);
        if trace_id.is_empty() || span_id.is_empty() {
            return None;
        }
        let parent = fields[2];
        return Some(CallRecord {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: (!parent.is_empty()).then(|| parent.to_string()),
            timestamp,
            src_service: non_empty(fields[4])?,
            src_route: fields[5].to_string(),
            dst_service: non_empty(fields[6])?,
            dst_route: fields[7].to_string(),
            latency_ms,
        });
    }

    if fields.len() >= LEGACY_COLUMNS {
        let latency_ms = parse_latency(fields[5])?;
        let timestamp = parse_timestamp(fields[0])?;
        return Some(CallRecord {
            trace_id: Uuid::new_v4().to_string(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: None,
            timestamp,
            src_service: non_empty(fields[1])?,
            src_route: fields[2].to_string(),
            dst_service: non_empty(fields[3])?,
            dst_route: fields[4].to_string(),
            latency_ms,
        });
    }

    None
}

fn non_empty(field: &str) -> Option<String> {
    (!field.is_empty()).then(|| field.to_string())
}

fn parse_latency(field: &str) -> Option<f64> {
    let latency: f64 = field.parse().ok()?;
    (latency.is_finite() && latency >= 0.0).then_some(latency)
}

/// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS[.f]` (space or `T`) read as UTC.
pub fn parse_timestamp(field: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(field) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(field, format).ok())
        .map(|naive| naive.and_utc())
}

/// Parse a whole log, skipping unparseable lines, ordered by timestamp.
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<CallRecord>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read log file {}", path.display()))?;

    let mut skipped = 0usize;
    let mut records: Vec<CallRecord> = contents
        .lines()
        .filter_map(|line| {
            let parsed = parse_log_line(line);
            if parsed.is_none() && !line.trim().is_empty() {
                skipped += 1;
            }
            parsed
        })
        .collect();
    records.sort_by_key(|record| record.timestamp);

    tracing::debug!(
        path = %path.display(),
        records = records.len(),
        skipped,
        "loaded call log"
    );
    Ok(records)
}

/// Feeds a loaded log into an engine's record buffer.
pub struct LogReplayer {
    records: Vec<CallRecord>,
    looping: bool,
}

impl LogReplayer {
    pub fn new(records: Vec<CallRecord>, looping: bool) -> Self {
        Self { records, looping }
    }

    pub fn from_file<P: AsRef<Path>>(path: P, looping: bool) -> Result<Self> {
        Ok(Self::new(load_records(path)?, looping))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Offset applied on each repeated pass so replayed timestamps keep moving
    /// forward.
    fn pass_offset(&self) -> ChronoDuration {
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp) + ChronoDuration::seconds(1),
            _ => ChronoDuration::zero(),
        }
    }

    /// Push records until the file is exhausted (or forever when looping),
    /// stopping once the engine stops. Returns the number of records queued.
    pub async fn run(self, engine: Arc<MonitorEngine>) -> Result<u64> {
        if self.records.is_empty() {
            tracing::warn!("log replay has no records");
            return Ok(0);
        }

        let capture = engine.capture();
        let offset = self.pass_offset();
        let retry = Duration::from_millis(RETRY_DELAY_MS);
        let mut queued = 0u64;
        let mut pass = 0u64;
        let mut shift = ChronoDuration::zero();

        'replay: loop {
            for record in &self.records {
                let Some(timestamp) = record.timestamp.checked_add_signed(shift) else {
                    tracing::warn!(pass, "replay timestamps out of range, stopping");
                    break 'replay;
                };
                let mut pending = CallRecord {
                    timestamp,
                    ..record.clone()
                };
                loop {
                    if !engine.is_running().await {
                        break 'replay;
                    }
                    match capture.offer(pending) {
                        Ok(()) => break,
                        Err(returned) => {
                            pending = returned;
                            tokio::time::sleep(retry).await;
                        }
                    }
                }
                queued += 1;
            }

            if !self.looping {
                break;
            }
            let Some(next) = shift.checked_add(&offset) else {
                tracing::warn!(pass, "replay timestamps out of range, stopping");
                break;
            };
            shift = next;
            pass += 1;
            tracing::debug!(pass, queued, "restarting log replay");
        }

        tracing::info!(queued, "log replay finished");
        Ok(queued)
    }
}
