//! HTTP surface for the statewatch state store and event stream.

pub mod api;
pub mod api_events;
pub mod config;

use axum::{
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use statewatch_db::DbPool;
use statewatch_state::{EventPublisher, StateStore};
use statewatch_stream::EventBroker;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Debug)]
pub struct AppState {
    /// Committed state; every commit is published to `broker`.
    pub store: StateStore,
    /// The event broker subscribers attach to.
    pub broker: EventBroker,
}

impl AppState {
    /// Builds a store over `pool` that publishes through `broker` with the
    /// default derivers.
    pub fn new(pool: DbPool, broker: EventBroker) -> Self {
        let publisher = EventPublisher::with_default_derivers(broker.clone());
        Self {
            store: StateStore::with_publisher(pool, publisher),
            broker,
        }
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/jobs", put(api::register_job_handler))
        .route(
            "/v1/job/{id}",
            get(api::get_job_handler).delete(api::deregister_job_handler),
        )
        .route(
            "/v1/job/{id}/deployment",
            post(api::create_deployment_handler),
        )
        .route(
            "/v1/job/{id}/deployments",
            get(api::list_job_deployments_handler),
        )
        .route("/v1/deployment/{id}", get(api::get_deployment_handler))
        .route(
            "/v1/deployment/pause/{id}",
            post(api::pause_deployment_handler),
        )
        .route(
            "/v1/deployment/fail/{id}",
            post(api::fail_deployment_handler),
        )
        .route("/v1/event/stream", get(api_events::event_stream_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
