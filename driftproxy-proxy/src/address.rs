//! Translates a `RouteMapping` into a concrete `(host, port)` upstream
//! address, handling the process-vs-container distinction and the
//! published-port fallback.

use driftproxy_core::{DriftProxyError, MappingKind, RouteMapping};
use driftproxy_discovery::ContainerSnapshot;
use driftproxy_resolver::PortRebinder;
use std::sync::Arc;

pub struct UpstreamAddressBuilder {
    rebinder: Arc<PortRebinder>,
    containers: Arc<ContainerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamAddress {
    pub host: String,
    pub port: u16,
}

impl UpstreamAddressBuilder {
    pub fn new(rebinder: Arc<PortRebinder>, containers: Arc<ContainerSnapshot>) -> Self {
        Self {
            rebinder,
            containers,
        }
    }

    pub async fn build(&self, mapping: &RouteMapping) -> Result<UpstreamAddress, DriftProxyError> {
        match mapping.kind {
            MappingKind::Process => self.build_process(mapping).await,
            MappingKind::Container => self.build_container(mapping).await,
        }
    }

    async fn build_process(&self, mapping: &RouteMapping) -> Result<UpstreamAddress, DriftProxyError> {
        let port = match &mapping.identifier {
            Some(identifier) => match self.rebinder.resolve(identifier).await {
                Some(port) => port,
                None => {
                    tracing::warn!(
                        workdir = %identifier.workdir,
                        "port rebind failed, falling back to stored port"
                    );
                    mapping.port
                }
            },
            None => mapping.port,
        };
        Ok(UpstreamAddress {
            host: "127.0.0.1".to_string(),
            port,
        })
    }

    async fn build_container(&self, mapping: &RouteMapping) -> Result<UpstreamAddress, DriftProxyError> {
        let containers = self
            .containers
            .get()
            .await
            .map_err(|e| DriftProxyError::UpstreamUnreachable(e.to_string()))?;

        let container = containers
            .iter()
            .find(|c| c.name == mapping.target || c.id == mapping.target);

        let Some(container) = container else {
            return Err(DriftProxyError::UpstreamUnreachable(format!(
                "container {} not found in current snapshot",
                mapping.target
            )));
        };

        if let Some(published) = container
            .published_mappings
            .iter()
            .find(|p| p.container_port == mapping.port)
        {
            let host = if published.host_ip == "0.0.0.0" {
                "127.0.0.1".to_string()
            } else {
                published.host_ip.clone()
            };
            return Ok(UpstreamAddress {
                host,
                port: published.host_port,
            });
        }

        if let Some(ip) = &container.network_ip {
            return Ok(UpstreamAddress {
                host: ip.clone(),
                port: mapping.port,
            });
        }

        Err(DriftProxyError::UpstreamUnreachable(format!(
            "no published port or network IP for container {}",
            mapping.target
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftproxy_core::{ContainerRecord, ProcessIdentifier, PublishedMapping, RouteMapping};
    use driftproxy_discovery::{ContainerProbe, ProcessProbe};
    use std::collections::HashMap;
    use std::time::Duration;

    struct EmptyProcessProbe;
    #[async_trait::async_trait]
    impl ProcessProbe for EmptyProcessProbe {
        async fn probe(&self) -> anyhow::Result<Vec<driftproxy_core::ProcessRecord>> {
            Ok(vec![])
        }
    }

    struct StaticContainerProbe(Vec<ContainerRecord>);
    #[async_trait::async_trait]
    impl ContainerProbe for StaticContainerProbe {
        async fn probe(&self, _own_project: Option<&str>) -> Vec<ContainerRecord> {
            self.0.clone()
        }
    }

    fn builder_with_containers(records: Vec<ContainerRecord>) -> UpstreamAddressBuilder {
        let snapshot = Arc::new(driftproxy_discovery::ProcessSnapshot::new(
            Box::new(EmptyProcessProbe),
            Duration::from_secs(5),
        ));
        let rebinder = Arc::new(PortRebinder::new(snapshot));
        let containers = Arc::new(driftproxy_discovery::ContainerSnapshot::new(
            Box::new(StaticContainerProbe(records)),
            None,
            Duration::from_secs(5),
        ));
        UpstreamAddressBuilder::new(rebinder, containers)
    }

    #[tokio::test]
    async fn process_mapping_without_identifier_uses_stored_port() {
        let builder = builder_with_containers(vec![]);
        let mapping = RouteMapping::new(MappingKind::Process, "localhost", 3000, "vite");
        let addr = builder.build(&mapping).await.unwrap();
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port, 3000);
    }

    #[tokio::test]
    async fn process_mapping_rebind_failure_falls_back_to_stored_port() {
        let builder = builder_with_containers(vec![]);
        let mapping = RouteMapping::new(MappingKind::Process, "localhost", 5173, "vite")
            .with_identifier(ProcessIdentifier {
                workdir: "/home/u/app".into(),
                command_regex: None,
            });
        let addr = builder.build(&mapping).await.unwrap();
        assert_eq!(addr.port, 5173);
    }

    #[tokio::test]
    async fn container_mapping_prefers_published_port() {
        let record = ContainerRecord {
            id: "abc".into(),
            name: "app-web".into(),
            image: "node".into(),
            exposed_ports: vec![80],
            published_mappings: vec![PublishedMapping {
                container_port: 80,
                host_ip: "0.0.0.0".into(),
                host_port: 32768,
            }],
            network_ip: Some("172.17.0.2".into()),
            network_name: Some("bridge".into()),
            workdir: None,
            labels: HashMap::new(),
        };
        let builder = builder_with_containers(vec![record]);
        let mapping = RouteMapping::new(MappingKind::Container, "app-web", 80, "docker");
        let addr = builder.build(&mapping).await.unwrap();
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port, 32768);
    }

    #[tokio::test]
    async fn container_mapping_falls_back_to_network_ip() {
        let record = ContainerRecord {
            id: "abc".into(),
            name: "app-web".into(),
            image: "node".into(),
            exposed_ports: vec![80],
            published_mappings: vec![],
            network_ip: Some("172.17.0.2".into()),
            network_name: Some("bridge".into()),
            workdir: None,
            labels: HashMap::new(),
        };
        let builder = builder_with_containers(vec![record]);
        let mapping = RouteMapping::new(MappingKind::Container, "app-web", 80, "docker");
        let addr = builder.build(&mapping).await.unwrap();
        assert_eq!(addr.host, "172.17.0.2");
        assert_eq!(addr.port, 80);
    }

    #[tokio::test]
    async fn container_mapping_fails_when_not_found() {
        let builder = builder_with_containers(vec![]);
        let mapping = RouteMapping::new(MappingKind::Container, "missing", 80, "docker");
        assert!(builder.build(&mapping).await.is_err());
    }
}
