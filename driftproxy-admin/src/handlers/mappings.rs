//! Mapping CRUD under `/_api/mappings/`, per `spec.md` §4.J.
//!
//! A single entry point, [`handle`], is shared by the `ControlPlane`
//! implementation (called directly by `RoutingDispatcher` with raw method +
//! sub-path + body bytes) and by the axum router built in `server.rs` for
//! the `tower::oneshot` integration tests — there is exactly one code path
//! for mapping mutation, so the JSON API and the debug dashboard's buttons
//! can never drift apart from it.

use axum::body::Body;
use axum::http::{Method, Response, StatusCode};
use driftproxy_core::{MappingKind, RouteMapping};
use driftproxy_store::MappingStore;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct PutMappingRequest {
    kind: MappingKind,
    target: String,
    port: u16,
}

pub async fn handle(
    store: &MappingStore,
    method: Method,
    sub_path: &str,
    body: &[u8],
) -> Response<Body> {
    match (method, sub_path) {
        (Method::GET, "") => list(store),
        (Method::GET, host) => get_one(store, host),
        (Method::PUT, host) if !host.is_empty() => put(store, host, body),
        (Method::DELETE, host) if !host.is_empty() => delete(store, host),
        _ => method_not_allowed(),
    }
}

fn list(store: &MappingStore) -> Response<Body> {
    json_response(StatusCode::OK, &store.get_all())
}

fn get_one(store: &MappingStore, host: &str) -> Response<Body> {
    match store.get(host) {
        Some(mapping) => json_response(StatusCode::OK, &mapping),
        None => error_response(StatusCode::NOT_FOUND, format!("no mapping for {host}")),
    }
}

fn put(store: &MappingStore, host: &str, body: &[u8]) -> Response<Body> {
    let request: PutMappingRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}"))
        }
    };

    if request.target.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "target must be non-empty");
    }
    if request.port == 0 {
        return error_response(StatusCode::BAD_REQUEST, "port must be in 1..=65535");
    }

    let mapping = RouteMapping::new(request.kind, request.target, request.port, "manual");
    store.set(host, mapping.clone());
    if let Err(e) = store.save() {
        tracing::warn!(error = %e, host, "mapping written in memory but persistence failed");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("mapping saved in memory but failed to persist: {e}"),
        );
    }

    json_response(StatusCode::OK, &mapping)
}

fn delete(store: &MappingStore, host: &str) -> Response<Body> {
    store.delete(host);
    if let Err(e) = store.save() {
        tracing::warn!(error = %e, host, "mapping deletion failed to persist");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("mapping deleted in memory but failed to persist: {e}"),
        );
    }
    json_response(StatusCode::OK, &serde_json::json!({"deleted": host}))
}

fn method_not_allowed() -> Response<Body> {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

fn json_response(status: StatusCode, value: &impl serde::Serialize) -> Response<Body> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("building a JSON response never fails")
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    json_response(
        status,
        &serde_json::json!({"error": message.into(), "status": status.as_u16()}),
    )
}
