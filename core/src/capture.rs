use crate::record::CallRecord;
use anyhow::Result;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

/// Bounded hand-off between record producers and the ingestion task.
pub struct RecordCapture {
    sender: Sender<CallRecord>,
    receiver: Receiver<CallRecord>,
}

impl RecordCapture {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, receiver) = bounded(buffer_size.max(1));
        Self { sender, receiver }
    }

    /// Queue a record without blocking. Fails when the buffer is full.
    pub fn capture(&self, record: CallRecord) -> Result<()> {
        self.sender
            .try_send(record)
            .map_err(|e| anyhow::anyhow!("Failed to capture record: {}", e))
    }

    /// Like `capture`, but hands the record back when the buffer is full so
    /// the caller can retry.
    pub fn offer(&self, record: CallRecord) -> std::result::Result<(), CallRecord> {
        match self.sender.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(record)) | Err(TrySendError::Disconnected(record)) => {
                Err(record)
            }
        }
    }

    pub fn get_receiver(&self) -> Receiver<CallRecord> {
        self.receiver.clone()
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Drain all pending records
    pub fn drain(&self) -> Vec<CallRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.receiver.try_recv() {
            records.push(record);
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(latency: f64) -> CallRecord {
        CallRecord {
            trace_id: "t".into(),
            span_id: "s".into(),
            parent_span_id: None,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            src_service: "a".into(),
            src_route: "/".into(),
            dst_service: "b".into(),
            dst_route: "/".into(),
            latency_ms: latency,
        }
    }

    #[test]
    fn test_record_capture() {
        let capture = RecordCapture::new(1000);
        assert!(capture.capture(record(1.0)).is_ok());
        assert_eq!(capture.pending(), 1);
        let records = capture.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(capture.pending(), 0);
    }

    #[test]
    fn full_buffer_rejects_without_blocking() {
        let capture = RecordCapture::new(2);
        assert!(capture.capture(record(1.0)).is_ok());
        assert!(capture.capture(record(2.0)).is_ok());
        assert!(capture.capture(record(3.0)).is_err());

        let returned = capture.offer(record(4.0)).unwrap_err();
        assert_eq!(returned.latency_ms, 4.0);

        let drained: Vec<f64> = capture.drain().iter().map(|r| r.latency_ms).collect();
        assert_eq!(drained, vec![1.0, 2.0]);
    }
}
