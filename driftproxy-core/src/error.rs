use thiserror::Error;

/// Unified error type for driftproxy.
///
/// Variants map 1:1 onto the dispatcher's error-kind classification; only
/// the dispatcher converts these into HTTP responses (component code never
/// writes a status code directly).
#[derive(Error, Debug)]
pub enum DriftProxyError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error("mapping not found: {0}")]
    NotFound(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("resolver failure: {0}")]
    ResolverFailure(String),

    #[error("persistence degraded: {0}")]
    PersistenceDegraded(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl DriftProxyError {
    /// Map to HTTP status code, per the dispatcher's error-kind table.
    pub fn status_code(&self) -> u16 {
        match self {
            DriftProxyError::BadRequest(_) => 400,
            DriftProxyError::NotAllowed(_) => 403,
            DriftProxyError::NotFound(_) => 404,
            DriftProxyError::MethodNotAllowed => 405,
            DriftProxyError::UpstreamUnreachable(_) => 502,
            DriftProxyError::ResolverFailure(_) => 502,
            DriftProxyError::Validation(_) => 400,
            DriftProxyError::PersistenceDegraded(_) => 200,
            DriftProxyError::Io(_) | DriftProxyError::Serde(_) | DriftProxyError::Internal(_) => {
                500
            }
        }
    }

    /// JSON error body: `{"error": "...", "status": N}`.
    pub fn to_json_body(&self) -> Vec<u8> {
        serde_json::json!({
            "error": self.to_string(),
            "status": self.status_code(),
        })
        .to_string()
        .into_bytes()
    }
}
