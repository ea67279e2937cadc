//! The HTTP/WebSocket entry point. Classifies each inbound request
//! (admission check, debug/dashboard, mapping CRUD, inter-service proxy,
//! noise, normal proxy) and orchestrates resolve → build → forward.
//!
//! Debug/dashboard and mapping-CRUD handling is delegated to whatever
//! implements `ControlPlane` (driftproxy-admin, wired in by the server
//! binary) so this crate never needs to depend on the admin crate.

use crate::address::UpstreamAddressBuilder;
use crate::forward::ReverseProxyForwarder;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use driftproxy_core::{DriftProxyConfig, DriftProxyError, Hostname, InventorySnapshot};
use driftproxy_discovery::{ContainerSnapshot, ProcessSnapshot};
use driftproxy_observability::{log_access, Metrics};
use driftproxy_resolver::{singleflight, SingleflightResolver};
use driftproxy_store::MappingStore;
use std::sync::Arc;
use std::time::Instant;

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn admission_check(&self, domain: Option<String>, hostname: &str) -> bool;
    async fn handle_debug(&self, path: &str, accept_html: bool) -> Response<Body>;
    async fn handle_mapping_api(
        &self,
        method: Method,
        sub_path: &str,
        body: axum::body::Bytes,
    ) -> Response<Body>;
}

pub struct RoutingDispatcher {
    pub config: Arc<DriftProxyConfig>,
    pub store: Arc<MappingStore>,
    pub processes: Arc<ProcessSnapshot>,
    pub containers: Arc<ContainerSnapshot>,
    pub resolver: Arc<SingleflightResolver>,
    pub address_builder: Arc<UpstreamAddressBuilder>,
    pub forwarder: Arc<ReverseProxyForwarder>,
    pub control_plane: Arc<dyn ControlPlane>,
    pub metrics: Arc<Metrics>,
}

/// Query parameters stripped from the forwarded URL. Other parameters are
/// preserved verbatim, in their original order and textual form.
const RESERVED_QUERY_PARAMS: &[&str] = &["force", "prompt"];

impl RoutingDispatcher {
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let started = Instant::now();
        let method_str = req.method().to_string();
        let path_str = req.uri().path().to_string();
        let host_for_log = extract_hostname(req.headers(), req.uri())
            .map(|h| h.to_string())
            .unwrap_or_default();

        let response = self.dispatch(req).await;

        log_access(
            &host_for_log,
            &method_str,
            &path_str,
            response.status().as_u16(),
            started.elapsed().as_secs_f64() * 1000.0,
            None,
        );
        response
    }

    async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let headers = req.headers().clone();

        let host = match extract_hostname(&headers, &uri) {
            Some(h) => h,
            None => {
                return ReverseProxyForwarder::error_response(
                    StatusCode::BAD_REQUEST,
                    "missing Host header",
                )
            }
        };

        let path = uri.path().to_string();

        if path == "/_caddy/check" || path == self.config.admission_path || path == "/_tls_check" {
            let query = parse_query(uri.query().unwrap_or(""));
            let domain = query
                .iter()
                .find(|(k, _)| k == "domain")
                .map(|(_, v)| v.clone());
            let ok = self
                .control_plane
                .admission_check(domain, host.as_str())
                .await;
            return Response::builder()
                .status(if ok {
                    StatusCode::OK
                } else {
                    StatusCode::FORBIDDEN
                })
                .body(Body::empty())
                .unwrap();
        }

        if host.as_str() == self.config.debug_host || path.starts_with("/_debug") {
            let accept_html = headers
                .get(axum::http::header::ACCEPT)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.contains("text/html"))
                .unwrap_or(false);
            return self.control_plane.handle_debug(&path, accept_html).await;
        }

        if let Some(sub_path) = path.strip_prefix("/_api/mappings/") {
            let body = axum::body::to_bytes(req.into_body(), usize::MAX)
                .await
                .unwrap_or_default();
            return self
                .control_plane
                .handle_mapping_api(method, sub_path, body)
                .await;
        }
        if path == "/_api/mappings" {
            return self
                .control_plane
                .handle_mapping_api(method, "", axum::body::Bytes::new())
                .await;
        }

        if path == "/favicon.ico" || path == "/robots.txt" {
            return ReverseProxyForwarder::error_response(StatusCode::NOT_FOUND, "");
        }

        if let Some(rest) = path.strip_prefix("/_proxy/") {
            return self.handle_inter_service_proxy(req, host.as_str(), rest).await;
        }

        self.handle_normal_proxy(req, host.as_str(), &path).await
    }

    async fn handle_inter_service_proxy(
        &self,
        req: Request<Body>,
        origin_host: &str,
        rest: &str,
    ) -> Response<Body> {
        let (service_name, tail) = match rest.split_once('/') {
            Some((service, tail)) => (service.to_string(), format!("/{tail}")),
            None => (rest.to_string(), "/".to_string()),
        };
        let composite_key = Hostname::composite_key(origin_host, &service_name);

        let mapping = match self.resolve(&composite_key, false, None).await {
            Ok(m) => m,
            Err(e) => return self.error_response(e),
        };

        let path_and_query = with_preserved_query(&tail, req_query(&req));
        self.forward_resolved(req, &mapping, &path_and_query).await
    }

    async fn handle_normal_proxy(
        &self,
        req: Request<Body>,
        host: &str,
        path: &str,
    ) -> Response<Body> {
        let query_pairs = parse_query(req.uri().query().unwrap_or(""));
        let force = query_pairs.iter().any(|(k, _)| k == "force");
        let user_hint = query_pairs
            .iter()
            .find(|(k, _)| k == "prompt")
            .map(|(_, v)| v.clone());

        let mapping = match self.resolve(host, force, user_hint).await {
            Ok(m) => m,
            Err(e) => return self.error_response(e),
        };

        let forwarded_query = strip_reserved_query(&query_pairs);
        let path_and_query = if forwarded_query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{forwarded_query}")
        };

        self.forward_resolved(req, &mapping, &path_and_query).await
    }

    async fn resolve(
        &self,
        key: &str,
        force: bool,
        user_hint: Option<String>,
    ) -> Result<driftproxy_core::RouteMapping, DriftProxyError> {
        if !force {
            if let Some(existing) = self.store.get(key) {
                self.metrics.record_request("hit");
                return Ok(existing);
            }
        }

        let inventory = self.build_inventory().await;
        let (origin, service) = match key.split_once(':') {
            Some((o, s)) => (o.to_string(), Some(s.to_string())),
            None => (key.to_string(), None),
        };

        let started = Instant::now();
        let result = match service {
            Some(service_name) => {
                self.resolver
                    .resolve(
                        key,
                        force,
                        singleflight::related_resolve(origin, service_name, user_hint, inventory),
                    )
                    .await
            }
            None => {
                self.resolver
                    .resolve(
                        key,
                        force,
                        singleflight::hostname_resolve(origin, user_hint, inventory),
                    )
                    .await
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(_) => {
                self.metrics.record_resolver_call("ok", elapsed);
                self.metrics.record_request("miss");
            }
            Err(_) => {
                self.metrics.record_resolver_call("error", elapsed);
                self.metrics.record_request("error");
            }
        }
        self.metrics.set_mappings_active(self.store.get_all().len() as i64);
        result
    }

    async fn build_inventory(&self) -> InventorySnapshot {
        let started = Instant::now();
        let processes = self.processes.get().await.unwrap_or_default();
        self.metrics
            .record_probe("process", started.elapsed().as_secs_f64());

        let started = Instant::now();
        let containers = self.containers.get().await.unwrap_or_default();
        self.metrics
            .record_probe("container", started.elapsed().as_secs_f64());

        let mappings = self.store.get_all();
        InventorySnapshot {
            processes,
            containers,
            mappings,
        }
    }

    async fn forward_resolved(
        &self,
        req: Request<Body>,
        mapping: &driftproxy_core::RouteMapping,
        path_and_query: &str,
    ) -> Response<Body> {
        let upstream = match self.address_builder.build(mapping).await {
            Ok(addr) => addr,
            Err(e) => return self.error_response(e),
        };

        let wants_upgrade = req
            .headers()
            .get(axum::http::header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);

        if wants_upgrade {
            let forwarder = self.forwarder.clone();
            let upstream_conn = match forwarder
                .dial_upstream_websocket(&upstream, path_and_query)
                .await
            {
                Ok(conn) => conn,
                Err(e) => return ReverseProxyForwarder::error_response(StatusCode::BAD_GATEWAY, e),
            };
            let upgrade = match WebSocketUpgrade::from_request(req, &()).await {
                Ok(u) => u,
                Err(_) => {
                    return ReverseProxyForwarder::error_response(
                        StatusCode::BAD_REQUEST,
                        "invalid websocket upgrade request",
                    )
                }
            };
            return upgrade.on_upgrade(move |socket| async move {
                forwarder.forward_websocket(upstream_conn, socket).await;
            });
        }

        match self.forwarder.forward_http(&upstream, req, path_and_query).await {
            Ok(resp) => resp,
            Err(e) => ReverseProxyForwarder::error_response(StatusCode::BAD_GATEWAY, e),
        }
    }

    fn error_response(&self, err: DriftProxyError) -> Response<Body> {
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
        ReverseProxyForwarder::error_response(status, err.to_string())
    }
}

/// Extract hostname from `Host` header, falling back to the URI authority
/// (`:authority` pseudo-header equivalent under hyper/h2).
fn extract_hostname(headers: &HeaderMap, uri: &Uri) -> Option<Hostname> {
    if let Some(host) = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(h) = Hostname::parse(host) {
            return Some(h);
        }
    }
    uri.authority().and_then(|a| Hostname::parse(a.as_str()))
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    if query.is_empty() {
        return Vec::new();
    }
    query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Preserve remaining query pairs in original order and exact textual form.
fn strip_reserved_query(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .filter(|(k, _)| !RESERVED_QUERY_PARAMS.contains(&k.as_str()))
        .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
        .collect::<Vec<_>>()
        .join("&")
}

fn req_query(req: &Request<Body>) -> Vec<(String, String)> {
    parse_query(req.uri().query().unwrap_or(""))
}

fn with_preserved_query(path: &str, pairs: Vec<(String, String)>) -> String {
    let query = pairs
        .iter()
        .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
        .collect::<Vec<_>>()
        .join("&");
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{query}")
    }
}
