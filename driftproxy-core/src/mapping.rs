use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stable descriptor for a `process` mapping, used by the port rebinder to
/// recover a fresh port after the target process restarts on a new one.
/// Must never be attached to a `container` mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessIdentifier {
    pub workdir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_regex: Option<String>,
}

/// The transport substrate a mapping routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingKind {
    Process,
    Container,
}

/// The durable record associated with a hostname. Exactly one per hostname
/// in `MappingStore`; `kind` transitions only via full replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMapping {
    #[serde(rename = "type")]
    pub kind: MappingKind,
    pub target: String,
    pub port: u16,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "llmReason")]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<ProcessIdentifier>,
}

impl RouteMapping {
    pub fn new(
        kind: MappingKind,
        target: impl Into<String>,
        port: u16,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            target: target.into(),
            port,
            created_at: Utc::now(),
            rationale: rationale.into(),
            identifier: None,
        }
    }

    pub fn with_identifier(mut self, identifier: ProcessIdentifier) -> Self {
        self.identifier = Some(identifier);
        self
    }
}

/// Hostname normalization: strip a trailing `:port`, lowercase, and verify
/// the result ends with the configured admission suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hostname(String);

impl Hostname {
    /// Parse a `Host` header (or `:authority`) value. Brackets around an
    /// IPv6 literal are stripped; a trailing `:port` is removed.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let host = if raw.starts_with('[') {
            // bracketed IPv6 literal, optionally followed by :port
            let end = raw.find(']')?;
            &raw[1..end]
        } else {
            match raw.rfind(':') {
                // only strip if what follows looks like a port, not another
                // colon-separated label (defensive; Host headers are single
                // label:port in practice)
                Some(idx) if raw[idx + 1..].chars().all(|c| c.is_ascii_digit()) => &raw[..idx],
                _ => raw,
            }
        };
        if host.is_empty() {
            return None;
        }
        Some(Hostname(host.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn ends_with_suffix(&self, suffix: &str) -> bool {
        self.0.ends_with(suffix)
    }

    /// A key containing `":"` is a synthetic second-level proxy key and must
    /// be excluded from any "real routes" enumeration.
    pub fn is_synthetic_key(key: &str) -> bool {
        key.contains(':')
    }

    /// Build the composite key `"<origin_host>:<service_name>"` used by the
    /// inter-service proxy path.
    pub fn composite_key(origin_host: &str, service_name: &str) -> String {
        format!("{origin_host}:{service_name}")
    }
}

impl std::fmt::Display for Hostname {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A listening process observed by the process probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub port: u16,
    pub pid: u32,
    pub bind_address: String,
    pub command: String,
    pub args: Vec<String>,
    pub workdir: String,
}

/// A published host-port mapping for a container port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedMapping {
    pub container_port: u16,
    pub host_ip: String,
    pub host_port: u16,
}

/// A running container observed by the container probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub exposed_ports: Vec<u16>,
    pub published_mappings: Vec<PublishedMapping>,
    pub network_ip: Option<String>,
    pub network_name: Option<String>,
    pub workdir: Option<String>,
    pub labels: std::collections::HashMap<String, String>,
}

impl ContainerRecord {
    /// The compose/stack project label, used to filter out the proxy's own
    /// containers from the inventory.
    pub fn project_label(&self) -> Option<&str> {
        self.labels
            .get("com.docker.compose.project")
            .map(|s| s.as_str())
    }
}

/// The union of live discovery snapshots plus a copy of the current mapping
/// table, passed to the judge as its inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub processes: Vec<ProcessRecord>,
    pub containers: Vec<ContainerRecord>,
    pub mappings: std::collections::HashMap<String, RouteMapping>,
}

/// The judge's reply, prior to validation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetDecision {
    pub kind: MappingKind,
    pub target: String,
    pub port: u16,
    pub rationale: String,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub command_regex: Option<String>,
}

impl TargetDecision {
    /// Validate per the data-model rules: `target` non-empty, `port` in
    /// range (already enforced by the `u16` type other than `0`), and a
    /// `workdir` is only meaningful for `process` decisions.
    pub fn validate(&self) -> Result<(), String> {
        if self.target.trim().is_empty() {
            return Err("target must be non-empty".to_string());
        }
        if self.port == 0 {
            return Err("port must be in 1..=65535".to_string());
        }
        Ok(())
    }

    /// Turn a validated decision into a persisted mapping.
    pub fn into_mapping(self) -> RouteMapping {
        let identifier = match (self.kind, self.workdir) {
            (MappingKind::Process, Some(workdir)) => Some(ProcessIdentifier {
                workdir,
                command_regex: self.command_regex,
            }),
            _ => None,
        };
        RouteMapping {
            kind: self.kind,
            target: self.target,
            port: self.port,
            created_at: Utc::now(),
            rationale: self.rationale,
            identifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_strips_port() {
        let h = Hostname::parse("app.localhost:8080").unwrap();
        assert_eq!(h.as_str(), "app.localhost");
    }

    #[test]
    fn test_hostname_lowercases() {
        let h = Hostname::parse("App.Localhost").unwrap();
        assert_eq!(h.as_str(), "app.localhost");
    }

    #[test]
    fn test_hostname_ipv6_brackets() {
        let h = Hostname::parse("[::1]:3000").unwrap();
        assert_eq!(h.as_str(), "::1");
    }

    #[test]
    fn test_hostname_rejects_empty() {
        assert!(Hostname::parse("").is_none());
        assert!(Hostname::parse("   ").is_none());
    }

    #[test]
    fn test_admission_suffix() {
        let h = Hostname::parse("myapp.localhost").unwrap();
        assert!(h.ends_with_suffix(".localhost"));
        let h2 = Hostname::parse("myapp.example.com").unwrap();
        assert!(!h2.ends_with_suffix(".localhost"));
    }

    #[test]
    fn test_synthetic_key_detection() {
        assert!(Hostname::is_synthetic_key("app.localhost:api"));
        assert!(!Hostname::is_synthetic_key("app.localhost"));
    }

    #[test]
    fn test_composite_key_format() {
        assert_eq!(
            Hostname::composite_key("app.proj.localhost", "api"),
            "app.proj.localhost:api"
        );
    }

    #[test]
    fn test_target_decision_validation() {
        let bad = TargetDecision {
            kind: MappingKind::Process,
            target: "".into(),
            port: 3000,
            rationale: "x".into(),
            workdir: None,
            command_regex: None,
        };
        assert!(bad.validate().is_err());

        let bad_port = TargetDecision {
            kind: MappingKind::Process,
            target: "localhost".into(),
            port: 0,
            rationale: "x".into(),
            workdir: None,
            command_regex: None,
        };
        assert!(bad_port.validate().is_err());
    }

    #[test]
    fn test_target_decision_into_mapping_carries_identifier() {
        let decision = TargetDecision {
            kind: MappingKind::Process,
            target: "localhost".into(),
            port: 3000,
            rationale: "vite".into(),
            workdir: Some("/home/u/myapp".into()),
            command_regex: None,
        };
        let mapping = decision.into_mapping();
        assert_eq!(mapping.identifier.unwrap().workdir, "/home/u/myapp");
    }

    #[test]
    fn test_container_decision_never_gets_identifier() {
        let decision = TargetDecision {
            kind: MappingKind::Container,
            target: "app-web".into(),
            port: 80,
            rationale: "docker".into(),
            workdir: Some("/home/u/app".into()),
            command_regex: None,
        };
        let mapping = decision.into_mapping();
        assert!(mapping.identifier.is_none());
    }

    #[test]
    fn test_mapping_roundtrips_through_json() {
        let mapping = RouteMapping::new(MappingKind::Process, "localhost", 3000, "vite");
        let json = serde_json::to_string(&mapping).unwrap();
        assert!(json.contains("\"type\":\"process\""));
        assert!(json.contains("\"llmReason\":\"vite\""));
        let back: RouteMapping = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mapping);
    }
}
