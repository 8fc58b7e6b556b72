// Common test utilities
#![allow(dead_code)]

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use server_core::{server::build_app, Config};
use task_orchestrator::{JobId, JobStatus, Orchestrator};
use tower::ServiceExt;

/// An in-process app plus a handle on its orchestrator.
pub struct TestApp {
    pub router: Router,
    pub orchestrator: Orchestrator,
}

impl TestApp {
    /// Build an app whose crawls take `step_delay` per increment.
    pub fn new(max_concurrent: usize, step_delay: Duration) -> Self {
        let config = Config {
            max_concurrent_tasks: max_concurrent,
            crawl_step_delay: step_delay,
            pause_poll_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_millis(50),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(config.orchestrator());
        let router = build_app(orchestrator.clone(), &config);
        Self {
            router,
            orchestrator,
        }
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_empty(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::post(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::delete(uri).body(Body::empty()).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Start a crawl and return its id.
    pub async fn start(&self, platform: &str) -> JobId {
        let (status, body) = self
            .post(
                "/api/v1/crawler/start",
                serde_json::json!({
                    "platform": platform,
                    "type": "search",
                    "config": { "keyword": "rust", "pages": 2 }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "start failed: {body}");
        body["data"]["taskId"].as_str().unwrap().parse().unwrap()
    }

    /// Poll until the task reaches `status`.
    pub async fn wait_for_status(&self, id: JobId, status: JobStatus) {
        for _ in 0..500 {
            if self.orchestrator.get(id).await.unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("task {id} never reached {status}");
    }
}
