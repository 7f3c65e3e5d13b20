use anyhow::Result;
use axum::http::StatusCode;
use chokepoint_core::Config;
use chokepoint_test::{
    fixtures::{call, checkout_fixture, escalating_edge_fixture},
    harness::TestApp,
};
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_reports_running_engine() -> Result<()> {
    let app = TestApp::new(Config::default()).await?;
    let health = app.get_json("/health").await?;
    assert_eq!(health["success"], true);
    assert_eq!(health["data"]["running"], true);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn posted_records_surface_the_slow_database() -> Result<()> {
    let app = TestApp::new(Config::default()).await?;
    let fixture = checkout_fixture(6);

    let ingest = app
        .post_json("/api/records", json!({ "records": fixture.records }))
        .await?;
    assert_eq!(ingest["data"]["accepted"], 24);
    assert_eq!(ingest["data"]["rejected"], 0);

    let graph = app.get_json("/api/graph").await?;
    let data = &graph["data"];
    assert_eq!(data["nodes"].as_array().unwrap().len(), fixture.expected_nodes);
    assert_eq!(data["bottlenecks"][0], fixture.expected_bottleneck.as_str());
    assert!(data["max_flow"].as_f64().unwrap() > 0.0);

    let edges = data["edges"].as_array().unwrap();
    let slow = edges
        .iter()
        .find(|edge| edge["id"] == fixture.expected_bottleneck.as_str())
        .unwrap();
    assert_eq!(slow["is_bottleneck"], true);
    assert_eq!(slow["degradation"], "critical");
    assert_eq!(slow["calls"], 6);

    let analysis = app.get_json("/api/analysis").await?;
    assert!(analysis["data"]["total_flow"].as_f64().unwrap() > 0.0);
    assert!(analysis["data"]["trace_edges"]
        .as_array()
        .unwrap()
        .iter()
        .any(|edge| edge == fixture.expected_bottleneck.as_str()));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn escalating_latency_turns_status_critical() -> Result<()> {
    let app = TestApp::new(Config::default()).await?;

    app.post_json("/api/records", json!({ "records": escalating_edge_fixture() }))
        .await?;

    let stats = app.get_json("/api/stats").await?;
    assert_eq!(stats["data"]["status"], "critical");
    assert_eq!(stats["data"]["total_logs"], 6);
    assert_eq!(stats["data"]["active_nodes"], 2);

    let alerts = app.get_json("/api/alerts").await?;
    let alerts = alerts["data"]["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 5);
    assert_eq!(alerts[0]["severity"], "critical");
    assert_eq!(alerts[0]["route"], "A/B");

    let limited = app.get_json("/api/alerts?severity=critical&limit=2").await?;
    assert_eq!(limited["data"]["alerts"].as_array().unwrap().len(), 2);

    let warnings = app.get_json("/api/alerts?severity=warning").await?;
    assert!(warnings["data"]["alerts"].as_array().unwrap().is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_records_are_reported_as_partial() -> Result<()> {
    let app = TestApp::new(Config::default()).await?;
    let records = vec![
        call("t1", "s1", None, "a", "b", 0, 10.0),
        call("t1", "s2", Some("s1"), "b", "db", 1, -4.0),
    ];

    let (status, body) = app
        .post_json_raw("/api/records", json!({ "records": records }))
        .await?;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(body["data"]["accepted"], 1);
    assert_eq!(body["data"]["rejected"], 1);

    let logs = app.get_json("/api/logs").await?;
    assert_eq!(logs["data"]["logs"].as_array().unwrap().len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn logs_endpoint_tails_recent_lines() -> Result<()> {
    let app = TestApp::new(Config::default()).await?;
    let fixture = checkout_fixture(2);
    app.post_json("/api/records", json!({ "records": fixture.records }))
        .await?;

    let logs = app.get_json("/api/logs?limit=3").await?;
    let lines = logs["data"]["logs"].as_array().unwrap();
    assert_eq!(lines.len(), 3);
    assert!(lines[2].as_str().unwrap().contains("users/ -> db-users/"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn graph_export_is_stable_between_reads() -> Result<()> {
    let app = TestApp::new(Config::default()).await?;
    let fixture = checkout_fixture(3);
    app.post_json("/api/records", json!({ "records": fixture.records }))
        .await?;

    let first = app.get_json("/api/graph").await?;
    let second = app.get_json("/api/graph").await?;
    assert_eq!(first, second);

    let ids: Vec<&str> = first["data"]["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|node| node["id"].as_str().unwrap())
        .collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn window_bound_holds_over_http() -> Result<()> {
    let mut config = Config::default();
    config.window.max_events = 10;
    let app = TestApp::new(config).await?;

    let fixture = checkout_fixture(10);
    app.post_json("/api/records", json!({ "records": fixture.records }))
        .await?;

    let stats = app.get_json("/api/stats").await?;
    assert_eq!(stats["data"]["total_logs"], 40);
    assert_eq!(stats["data"]["window_size"], 10);
    Ok(())
}
