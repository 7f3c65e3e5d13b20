use anyhow::Result;
use chokepoint::reader::LogReplayer;
use chokepoint_core::{Config, Status};
use chokepoint_test::{fixtures::checkout_fixture, harness::TestApp};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn captured_records_flow_through_background_tasks() -> Result<()> {
    let app = TestApp::new(Config::default()).await?;
    let engine = app.engine();
    let fixture = checkout_fixture(6);
    let expected = fixture.records.len() as u64;

    let capture = engine.capture();
    for record in fixture.records {
        capture.capture(record)?;
    }

    wait_for_analysis(&app, expected).await?;

    let graph = app.get_json("/api/graph").await?;
    assert_eq!(graph["data"]["bottlenecks"][0], fixture.expected_bottleneck.as_str());

    let stats = engine.stats().await;
    assert_eq!(stats.total_logs, expected);
    assert_eq!(stats.status, Status::Critical);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replayed_log_file_is_ingested() -> Result<()> {
    let app = TestApp::new(Config::default()).await?;

    let path = std::env::temp_dir().join(format!("chokepoint-{}.csv", Uuid::new_v4()));
    let mut contents = String::from("trace_id,span_id,parent_span_id,timestamp,src_service,src_route,dst_service,dst_route,latency_ms\n");
    for i in 0..5 {
        contents.push_str(&format!(
            "t{i},a,,2024-01-01T12:00:0{i}Z,api-gateway,/checkout,orders,/create,20\n"
        ));
        contents.push_str(&format!(
            "t{i},b,a,2024-01-01T12:00:0{i}.010Z,orders,/create,db-orders,/insert,240\n"
        ));
    }
    std::fs::write(&path, contents)?;

    let replayer = LogReplayer::from_file(&path, false)?;
    assert_eq!(replayer.len(), 10);
    let queued = replayer.run(app.engine()).await?;
    assert_eq!(queued, 10);
    std::fs::remove_file(&path)?;

    wait_for_analysis(&app, 10).await?;

    let analysis = app.get_json("/api/analysis").await?;
    let sinks = analysis["data"]["sinks"].as_array().unwrap();
    assert_eq!(sinks.len(), 1);
    assert_eq!(sinks[0]["sink"], "db-orders");
    assert!(analysis["data"]["flow_edges"]
        .as_array()
        .unwrap()
        .iter()
        .any(|edge| edge == "orders->db-orders"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_a_torn_window() -> Result<()> {
    let mut config = Config::default();
    config.window.max_events = 8;
    let app = Arc::new(TestApp::new(config).await?);
    let fixture = checkout_fixture(20);
    let expected = fixture.records.len() as u64;

    let capture = app.engine().capture();
    for record in fixture.records {
        capture.capture(record)?;
    }

    let reader = {
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            for _ in 0..50 {
                let graph = app.get_json("/api/graph").await?;
                let nodes: Vec<&str> = graph["data"]["nodes"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|node| node["id"].as_str().unwrap())
                    .collect();
                let edges = graph["data"]["edges"].as_array().unwrap();
                let calls: u64 = edges.iter().map(|e| e["calls"].as_u64().unwrap()).sum();
                assert!(calls <= 8);
                for edge in edges {
                    assert!(nodes.contains(&edge["source"].as_str().unwrap()));
                    assert!(nodes.contains(&edge["target"].as_str().unwrap()));
                }
                sleep(Duration::from_millis(5)).await;
            }
            anyhow::Ok(())
        })
    };

    reader.await??;
    wait_for_analysis(&app, expected).await?;
    assert_eq!(app.engine().stats().await.window_size, 8);
    Ok(())
}

async fn wait_for_analysis(app: &TestApp, expected_records: u64) -> Result<()> {
    for _ in 0..100 {
        if let Some(report) = app.engine().report().await {
            if report.records_seen >= expected_records {
                return Ok(());
            }
        }
        sleep(Duration::from_millis(30)).await;
    }
    Err(anyhow::anyhow!("analysis did not catch up with ingestion"))
}
