//! Debug snapshot (`/_debug`) and Prometheus scrape (`/_debug/metrics`), per
//! `spec.md` §4.J and the metrics supplement in `SPEC_FULL.md` §1.
//!
//! The JSON form and the HTML form are built from the same snapshot so
//! neither can report stale or inconsistent data relative to the other.
//! Secret values (the LLM API key) are never included, only `"[set]"` /
//! `"[not set]"`.

use axum::body::Body;
use axum::http::{Response, StatusCode};
use driftproxy_core::{ContainerRecord, DriftProxyConfig, ProcessRecord, RouteMapping};
use driftproxy_observability::Metrics;
use std::collections::HashMap;

pub struct DebugSnapshot {
    pub processes: Vec<ProcessRecord>,
    pub containers: Vec<ContainerRecord>,
    pub mappings: HashMap<String, RouteMapping>,
}

pub fn json_snapshot(config: &DriftProxyConfig, snapshot: &DebugSnapshot) -> serde_json::Value {
    serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "processes": snapshot.processes,
        "containers": snapshot.containers,
        "mappings": snapshot.mappings,
        "environment": {
            "model": config.model,
            "cache_file": config.cache_file.display().to_string(),
            "api_key": if config.api_key.is_some() { "[set]" } else { "[not set]" },
        },
    })
}

pub fn render_debug(config: &DriftProxyConfig, snapshot: &DebugSnapshot, accept_html: bool) -> Response<Body> {
    if accept_html {
        let body = render_html(config, snapshot);
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/html; charset=utf-8")
            .body(Body::from(body))
            .expect("building the debug HTML page never fails")
    } else {
        let json = json_snapshot(config, snapshot);
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .expect("building the debug JSON response never fails")
    }
}

pub fn render_metrics(metrics: &Metrics) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4")
        .body(Body::from(metrics.gather_text()))
        .expect("building the metrics response never fails")
}

/// A small server-rendered page: four sections plus inline `<script>` that
/// drives the public mapping API. No templating engine — the teacher's
/// `rust_embed`-backed dashboard ships a static asset; this ships a static
/// string instead, for the same reason (no server-side render step beyond
/// data interpolation).
fn render_html(config: &DriftProxyConfig, snapshot: &DebugSnapshot) -> String {
    let processes_json = serde_json::to_string_pretty(&snapshot.processes).unwrap_or_default();
    let containers_json = serde_json::to_string_pretty(&snapshot.containers).unwrap_or_default();
    let mappings_json = serde_json::to_string_pretty(&snapshot.mappings).unwrap_or_default();
    let api_key_state = if config.api_key.is_some() { "[set]" } else { "[not set]" };

    format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>driftproxy debug</title></head>
<body>
<h1>driftproxy</h1>

<section id="environment">
<h2>Environment</h2>
<ul>
<li>model: {model}</li>
<li>cache_file: {cache_file}</li>
<li>api_key: {api_key_state}</li>
</ul>
</section>

<section id="processes">
<h2>Processes</h2>
<pre>{processes_json}</pre>
</section>

<section id="containers">
<h2>Containers</h2>
<pre>{containers_json}</pre>
</section>

<section id="mappings">
<h2>Mappings</h2>
<pre id="mappings-data">{mappings_json}</pre>
<form id="put-form">
  <input name="host" placeholder="hostname">
  <input name="kind" placeholder="process|container">
  <input name="target" placeholder="target">
  <input name="port" placeholder="port" type="number">
  <button type="submit">Set</button>
</form>
<script>
document.getElementById('put-form').addEventListener('submit', async (e) => {{
  e.preventDefault();
  const f = new FormData(e.target);
  const host = f.get('host');
  await fetch('/_api/mappings/' + host, {{
    method: 'PUT',
    headers: {{'content-type': 'application/json'}},
    body: JSON.stringify({{
      kind: f.get('kind'), target: f.get('target'), port: Number(f.get('port')),
    }}),
  }});
  location.reload();
}});
async function deleteMapping(host) {{
  await fetch('/_api/mappings/' + host, {{ method: 'DELETE' }});
  location.reload();
}}
</script>
</section>
</body>
</html>"#,
        model = config.model,
        cache_file = config.cache_file.display(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DriftProxyConfig {
        DriftProxyConfig::default()
    }

    fn snapshot() -> DebugSnapshot {
        DebugSnapshot {
            processes: vec![],
            containers: vec![],
            mappings: HashMap::new(),
        }
    }

    #[test]
    fn json_snapshot_hides_api_key_value() {
        let mut cfg = config();
        cfg.api_key = Some("sk-super-secret".into());
        let value = json_snapshot(&cfg, &snapshot());
        let rendered = value.to_string();
        assert!(!rendered.contains("sk-super-secret"));
        assert_eq!(value["environment"]["api_key"], "[set]");
    }

    #[test]
    fn json_snapshot_reports_not_set_without_key() {
        let value = json_snapshot(&config(), &snapshot());
        assert_eq!(value["environment"]["api_key"], "[not set]");
    }

    #[test]
    fn html_page_does_not_leak_api_key() {
        let mut cfg = config();
        cfg.api_key = Some("sk-super-secret".into());
        let html = render_html(&cfg, &snapshot());
        assert!(!html.contains("sk-super-secret"));
        assert!(html.contains("[set]"));
    }

    #[test]
    fn render_debug_returns_html_when_requested() {
        let resp = render_debug(&config(), &snapshot(), true);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/html; charset=utf-8"
        );
    }

    #[test]
    fn render_debug_returns_json_by_default() {
        let resp = render_debug(&config(), &snapshot(), false);
        assert_eq!(resp.headers().get("content-type").unwrap(), "application/json");
    }
}
