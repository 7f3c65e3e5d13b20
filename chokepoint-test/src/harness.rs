use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chokepoint::server::{build_router, init_engine};
use chokepoint_core::{Config, MonitorEngine};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestApp {
    router: Router,
    engine: Arc<MonitorEngine>,
}

impl TestApp {
    pub async fn new(mut config: Config) -> Result<Self> {
        config.server.cors_enabled = false;
        config.server.verbose = false;
        config.ingest.interval_ms = 1;
        config.analysis.interval_ms = 25;

        let engine = init_engine(&config).await?;
        let router = build_router(&config, Arc::clone(&engine));

        Ok(Self { router, engine })
    }

    pub fn engine(&self) -> Arc<MonitorEngine> {
        Arc::clone(&self.engine)
    }

    pub async fn post_json(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let (status, body) = self.post_json_raw(path, payload).await?;
        if !status.is_success() {
            anyhow::bail!("request failed with status {}", status);
        }
        Ok(body)
    }

    pub async fn post_json_raw(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<(StatusCode, serde_json::Value)> {
        let body = Body::from(serde_json::to_vec(&payload)?);
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(body)?;

        self.execute(request).await
    }

    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let (status, body) = self.get_json_raw(path).await?;
        if !status.is_success() {
            anyhow::bail!("request failed with status {}", status);
        }
        Ok(body)
    }

    pub async fn get_json_raw(&self, path: &str) -> Result<(StatusCode, serde_json::Value)> {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())?;

        self.execute(request).await
    }

    async fn execute(&self, request: Request<Body>) -> Result<(StatusCode, serde_json::Value)> {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .context("router execution failed")?;

        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok((status, serde_json::from_slice(&bytes)?))
    }
}
