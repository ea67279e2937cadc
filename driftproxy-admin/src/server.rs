//! The `ControlPlane` implementation: mapping CRUD, debug snapshot/dashboard,
//! TLS-admission check, and a standalone axum router over the same handlers
//! for integration testing via `tower::ServiceExt::oneshot`.

use crate::handlers::{debug, health, mappings};
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, Response, StatusCode};
use axum::routing::get;
use axum::Router;
use driftproxy_core::DriftProxyConfig;
use driftproxy_discovery::{ContainerSnapshot, ProcessSnapshot};
use driftproxy_observability::Metrics;
use driftproxy_proxy::ControlPlane;
use driftproxy_store::MappingStore;
use std::sync::Arc;

pub struct AdminState {
    pub config: Arc<DriftProxyConfig>,
    pub store: Arc<MappingStore>,
    pub processes: Arc<ProcessSnapshot>,
    pub containers: Arc<ContainerSnapshot>,
    pub metrics: Arc<Metrics>,
}

impl AdminState {
    async fn snapshot(&self) -> debug::DebugSnapshot {
        debug::DebugSnapshot {
            processes: self.processes.get().await.unwrap_or_default(),
            containers: self.containers.get().await.unwrap_or_default(),
            mappings: self.store.get_all(),
        }
    }
}

#[async_trait]
impl ControlPlane for AdminState {
    async fn admission_check(&self, domain: Option<String>, hostname: &str) -> bool {
        let candidate = domain.unwrap_or_else(|| hostname.to_string());
        candidate.ends_with(&self.config.admission_suffix)
    }

    async fn handle_debug(&self, path: &str, accept_html: bool) -> Response<Body> {
        if path == "/_debug/metrics" {
            return debug::render_metrics(&self.metrics);
        }
        let snapshot = self.snapshot().await;
        debug::render_debug(&self.config, &snapshot, accept_html)
    }

    async fn handle_mapping_api(&self, method: Method, sub_path: &str, body: Bytes) -> Response<Body> {
        mappings::handle(&self.store, method, sub_path, &body).await
    }
}

/// Standalone axum router over the same handlers, wired up for
/// `tower::oneshot` tests without going through `RoutingDispatcher`.
pub fn build_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/_api/mappings/",
            get(list_mappings).put(put_root_rejected).delete(put_root_rejected),
        )
        .route(
            "/_api/mappings/{host}",
            get(get_mapping).put(put_mapping).delete(delete_mapping),
        )
        .route("/_debug", get(debug_json))
        .route("/_debug/metrics", get(metrics_text))
        .with_state(state)
}

async fn list_mappings(State(state): State<Arc<AdminState>>) -> Response<Body> {
    mappings::handle(&state.store, Method::GET, "", b"").await
}

async fn get_mapping(
    State(state): State<Arc<AdminState>>,
    Path(host): Path<String>,
) -> Response<Body> {
    mappings::handle(&state.store, Method::GET, &host, b"").await
}

async fn put_mapping(
    State(state): State<Arc<AdminState>>,
    Path(host): Path<String>,
    body: Bytes,
) -> Response<Body> {
    mappings::handle(&state.store, Method::PUT, &host, &body).await
}

async fn delete_mapping(
    State(state): State<Arc<AdminState>>,
    Path(host): Path<String>,
) -> Response<Body> {
    mappings::handle(&state.store, Method::DELETE, &host, b"").await
}

async fn put_root_rejected() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

async fn debug_json(State(state): State<Arc<AdminState>>, headers: HeaderMap) -> Response<Body> {
    let accept_html = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false);
    let snapshot = state.snapshot().await;
    debug::render_debug(&state.config, &snapshot, accept_html)
}

async fn metrics_text(State(state): State<Arc<AdminState>>) -> Response<Body> {
    debug::render_metrics(&state.metrics)
}
