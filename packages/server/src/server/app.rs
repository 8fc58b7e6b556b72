//! Application setup and server configuration.

use std::time::Duration;

use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, post},
    Router,
};
use task_orchestrator::Orchestrator;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;
use crate::server::routes::{
    cancel_task_handler, delete_task_handler, health_handler, list_platforms_handler,
    list_tasks_handler, pause_task_handler, resume_task_handler, start_crawler_handler,
    task_detail_handler, task_progress_handler, task_websocket_handler,
};

/// Prefix of the crawler REST API
pub const API_PREFIX: &str = "/api/v1/crawler";

/// Shared application state
#[derive(Clone)]
pub struct AxumAppState {
    pub orchestrator: Orchestrator,
    pub crawl_step_delay: Duration,
}

/// Build the Axum application router
pub fn build_app(orchestrator: Orchestrator, config: &Config) -> Router {
    let app_state = AxumAppState {
        orchestrator,
        crawl_step_delay: config.crawl_step_delay,
    };

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    let crawler = Router::new()
        .route("/platforms", get(list_platforms_handler))
        .route("/start", post(start_crawler_handler))
        .route("/pause/:task_id", post(pause_task_handler))
        .route("/resume/:task_id", post(resume_task_handler))
        .route("/cancel/:task_id", post(cancel_task_handler))
        .route("/tasks", get(list_tasks_handler))
        .route(
            "/task/:task_id",
            get(task_detail_handler).delete(delete_task_handler),
        )
        .route("/progress/:task_id", get(task_progress_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws/task/:task_id", get(task_websocket_handler))
        .nest(API_PREFIX, crawler)
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(Extension(app_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
