/// Emits a structured access-log line for one proxied request via
/// `tracing`, matching the teacher's `tracing::info!` span-per-request
/// convention rather than a bespoke log sink (driftproxy has no VictoriaLogs
/// equivalent to push to; `tracing-subscriber`'s JSON formatter is the
/// shipping destination, same as every other log line in this codebase).
#[allow(clippy::too_many_arguments)]
pub fn log_access(
    host: &str,
    method: &str,
    path: &str,
    status: u16,
    latency_ms: f64,
    upstream: Option<&str>,
) {
    tracing::info!(
        host,
        method,
        path,
        status,
        latency_ms,
        upstream,
        "request"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_access_does_not_panic_without_upstream() {
        log_access("app.localhost", "GET", "/", 200, 1.5, None);
    }

    #[test]
    fn log_access_does_not_panic_with_upstream() {
        log_access("app.localhost", "GET", "/", 502, 0.3, Some("127.0.0.1:3000"));
    }
}
