use chokepoint_core::CallRecord;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub fn call(
    trace: &str,
    span: &str,
    parent: Option<&str>,
    src: &str,
    dst: &str,
    offset_ms: i64,
    latency_ms: f64,
) -> CallRecord {
    CallRecord {
        trace_id: trace.into(),
        span_id: span.into(),
        parent_span_id: parent.map(str::to_string),
        timestamp: base_time() + Duration::milliseconds(offset_ms),
        src_service: src.into(),
        src_route: "/".into(),
        dst_service: dst.into(),
        dst_route: "/".into(),
        latency_ms,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrafficFixture {
    pub records: Vec<CallRecord>,
    pub expected_bottleneck: String,
    pub expected_nodes: usize,
}

/// Checkout traffic where the orders database is slow and narrow while the
/// users path stays healthy.
pub fn checkout_fixture(traces: usize) -> TrafficFixture {
    let mut records = Vec::with_capacity(traces * 4);
    for i in 0..traces {
        let trace = format!("checkout-{i}");
        let base = i as i64 * 500;
        records.push(call(&trace, "gw", None, "api-gateway", "orders", base, 25.0));
        records.push(call(&trace, "ord", Some("gw"), "orders", "db-orders", base + 5, 260.0));
        records.push(call(&trace, "gw2", None, "api-gateway", "users", base + 10, 12.0));
        records.push(call(&trace, "usr", Some("gw2"), "users", "db-users", base + 15, 6.0));
    }

    TrafficFixture {
        records,
        expected_bottleneck: "orders->db-orders".into(),
        expected_nodes: 5,
    }
}

/// One edge whose latency climbs past the critical bound.
pub fn escalating_edge_fixture() -> Vec<CallRecord> {
    [50.0, 60.0, 200.0, 210.0, 220.0, 230.0]
        .iter()
        .enumerate()
        .map(|(i, latency)| {
            call(
                &format!("esc-{i}"),
                &format!("span-{i}"),
                None,
                "A",
                "B",
                i as i64 * 300,
                *latency,
            )
        })
        .collect()
}
