use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration for driftproxy, covering the configuration
/// surface enumerated by the external-interfaces contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftProxyConfig {
    /// HTTP/WebSocket listener address for the single front door.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Credential for the LLM judge endpoint. Required for resolution;
    /// absence disables cold-hostname resolution but not already-mapped
    /// routing.
    #[serde(default)]
    pub api_key: Option<String>,

    /// OpenAI-compatible chat-completions endpoint.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Chat model name passed to the judge.
    #[serde(default = "default_model")]
    pub model: String,

    /// Path to the persisted mapping file.
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,

    /// Own compose/project name, used to filter self-owned containers out
    /// of the inventory passed to the judge.
    #[serde(default)]
    pub own_project: Option<String>,

    /// Reserved hostname that triggers the debug UI instead of proxying.
    #[serde(default = "default_debug_host")]
    pub debug_host: String,

    /// Accepted suffix for the TLS-admission check endpoint.
    #[serde(default = "default_admission_suffix")]
    pub admission_suffix: String,

    /// TTL for the process/container snapshot caches.
    #[serde(default = "default_process_snapshot_ttl_secs")]
    pub process_snapshot_ttl_secs: u64,

    /// Timeout for a single OS discovery probe invocation.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Timeout for a single LLM judge call.
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    /// Admission-check path accepted in addition to `/_tls_check`.
    #[serde(default = "default_admission_path")]
    pub admission_path: String,
}

impl DriftProxyConfig {
    /// Load configuration from a YAML file plus `DRIFTPROXY_`-prefixed
    /// environment variables, in that precedence order (env wins).
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        } else {
            for default_path in &["driftproxy.yaml", "/etc/driftproxy/driftproxy.yaml"] {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Yaml::file(default_path));
                    break;
                }
            }
        }

        figment = figment.merge(Env::prefixed("DRIFTPROXY_").split("__"));

        let config: Self = figment.extract()?;
        Ok(config)
    }

    /// Whether resolution of unseen hostnames is possible at all.
    pub fn can_resolve(&self) -> bool {
        self.api_key.is_some()
    }
}

impl Default for DriftProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            cache_file: default_cache_file(),
            own_project: None,
            debug_host: default_debug_host(),
            admission_suffix: default_admission_suffix(),
            process_snapshot_ttl_secs: default_process_snapshot_ttl_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            llm_timeout_secs: default_llm_timeout_secs(),
            admission_path: default_admission_path(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:80".parse().unwrap()
}

fn default_api_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "anthropic/claude-haiku-4.5".to_string()
}

fn default_cache_file() -> PathBuf {
    PathBuf::from("/data/mappings.json")
}

fn default_debug_host() -> String {
    "proxy.localhost".to_string()
}

fn default_admission_suffix() -> String {
    ".localhost".to_string()
}

fn default_process_snapshot_ttl_secs() -> u64 {
    5
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_admission_path() -> String {
    "/_tls_check".to_string()
}
