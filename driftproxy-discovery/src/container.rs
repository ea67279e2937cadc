//! Container discovery: a contract to an OS/runtime-specific probe, plus
//! the short-TTL cache wrapping it.

use crate::cache::TtlSnapshotCache;
use async_trait::async_trait;
use driftproxy_core::ContainerRecord;
use std::time::Duration;

/// If the container runtime is unreachable, `probe` returns an empty list,
/// not an error — the system keeps working with a reduced signal set.
#[async_trait]
pub trait ContainerProbe: Send + Sync {
    async fn probe(&self, own_project: Option<&str>) -> Vec<ContainerRecord>;
}

/// TTL-cached wrapper over a `ContainerProbe`.
pub struct ContainerSnapshot {
    probe: Box<dyn ContainerProbe>,
    own_project: Option<String>,
    cache: TtlSnapshotCache<ContainerRecord>,
}

impl ContainerSnapshot {
    pub fn new(probe: Box<dyn ContainerProbe>, own_project: Option<String>, ttl: Duration) -> Self {
        Self {
            probe,
            own_project,
            cache: TtlSnapshotCache::new(ttl),
        }
    }

    pub async fn get(&self) -> anyhow::Result<Vec<ContainerRecord>> {
        let own_project = self.own_project.clone();
        self.cache
            .get(|| async move {
                Ok::<_, anyhow::Error>(self.probe.probe(own_project.as_deref()).await)
            })
            .await
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }
}

/// Filter out containers whose compose project label matches `own_project`.
pub fn filter_own_project(
    records: Vec<ContainerRecord>,
    own_project: Option<&str>,
) -> Vec<ContainerRecord> {
    match own_project {
        None => records,
        Some(project) => records
            .into_iter()
            .filter(|r| r.project_label() != Some(project))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(name: &str, project: Option<&str>) -> ContainerRecord {
        let mut labels = HashMap::new();
        if let Some(p) = project {
            labels.insert("com.docker.compose.project".to_string(), p.to_string());
        }
        ContainerRecord {
            id: format!("id-{name}"),
            name: name.to_string(),
            image: "node:20".into(),
            exposed_ports: vec![80],
            published_mappings: vec![],
            network_ip: Some("172.17.0.2".into()),
            network_name: Some("bridge".into()),
            workdir: None,
            labels,
        }
    }

    #[test]
    fn filters_own_project_containers() {
        let records = vec![record("app-web", Some("driftproxy")), record("other", Some("app"))];
        let filtered = filter_own_project(records, Some("driftproxy"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "other");
    }

    #[test]
    fn no_own_project_keeps_everything() {
        let records = vec![record("app-web", Some("driftproxy"))];
        let filtered = filter_own_project(records, None);
        assert_eq!(filtered.len(), 1);
    }

    struct UnreachableProbe;

    #[async_trait]
    impl ContainerProbe for UnreachableProbe {
        async fn probe(&self, _own_project: Option<&str>) -> Vec<ContainerRecord> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn unreachable_runtime_yields_empty_not_error() {
        let snapshot = ContainerSnapshot::new(Box::new(UnreachableProbe), None, Duration::from_secs(5));
        let records = snapshot.get().await.unwrap();
        assert!(records.is_empty());
    }
}
