pub mod access_log;
pub mod metrics;

pub use access_log::log_access;
pub use metrics::Metrics;
