//! Coalesces concurrent misses for the same resolution key into one
//! ResolverGateway call. Per-key critical section via a `DashMap` of
//! `tokio::sync::Mutex`, mirroring the per-resource concurrent-map idiom
//! used throughout the rest of this codebase's store layer.

use crate::gateway::ResolverGateway;
use dashmap::DashMap;
use driftproxy_core::{DriftProxyError, InventorySnapshot, RouteMapping, TargetDecision};
use driftproxy_store::MappingStore;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct SingleflightResolver {
    gateway: Arc<ResolverGateway>,
    store: Arc<MappingStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SingleflightResolver {
    pub fn new(gateway: Arc<ResolverGateway>, store: Arc<MappingStore>) -> Self {
        Self {
            gateway,
            store,
            locks: DashMap::new(),
        }
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolve `key` (a hostname or composite key) by driving `resolve`
    /// (which performs the actual ResolverGateway call) under the key's
    /// single-flight slot. Each caller re-checks `MappingStore` under the
    /// slot before invoking `resolve`, so a waiter that arrives after
    /// another caller already wrote the mapping observes it directly — unless
    /// `force` is set, in which case the stored mapping is never treated as
    /// already-resolved and the gateway is always invoked. Concurrent forced
    /// callers for the same key still coalesce onto a single gateway call,
    /// since they serialize on the same slot.
    pub async fn resolve<F, Fut>(
        &self,
        key: &str,
        force: bool,
        resolve: F,
    ) -> Result<RouteMapping, DriftProxyError>
    where
        F: FnOnce(Arc<ResolverGateway>) -> Fut,
        Fut: std::future::Future<Output = Result<TargetDecision, DriftProxyError>>,
    {
        let slot = self.slot(key);
        let _guard = slot.lock().await;

        if !force {
            if let Some(existing) = self.store.get(key) {
                return Ok(existing);
            }
        }

        let decision = resolve(self.gateway.clone()).await?;
        let mapping = decision.into_mapping();

        self.store.set(key, mapping.clone());
        if let Err(e) = self.store.save() {
            tracing::warn!(error = %e, key, "mapping written in memory but persistence failed");
        }

        Ok(mapping)
    }
}

pub fn hostname_resolve(
    host: String,
    user_hint: Option<String>,
    inventory: InventorySnapshot,
) -> impl FnOnce(
    Arc<ResolverGateway>,
) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<TargetDecision, DriftProxyError>> + Send>,
> {
    move |gateway| {
        Box::pin(async move {
            gateway
                .resolve_hostname(&host, user_hint.as_deref(), &inventory)
                .await
        })
    }
}

pub fn related_resolve(
    origin_host: String,
    service_name: String,
    user_hint: Option<String>,
    inventory: InventorySnapshot,
) -> impl FnOnce(
    Arc<ResolverGateway>,
) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<TargetDecision, DriftProxyError>> + Send>,
> {
    move |gateway| {
        Box::pin(async move {
            gateway
                .resolve_related(&origin_host, &service_name, user_hint.as_deref(), &inventory)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftproxy_core::MappingKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn gateway() -> Arc<ResolverGateway> {
        Arc::new(ResolverGateway::new(
            "http://127.0.0.1:0".into(),
            Some("test-key".into()),
            "test-model".into(),
            std::time::Duration::from_secs(1),
        ))
    }

    fn store() -> Arc<MappingStore> {
        let dir = tempdir().unwrap();
        Arc::new(MappingStore::new(dir.path().join("mappings.json")))
    }

    #[tokio::test]
    async fn second_call_observes_already_written_mapping() {
        let resolver = SingleflightResolver::new(gateway(), store());
        let calls = Arc::new(AtomicUsize::new(0));

        // Prime the store directly, simulating a prior waiter having
        // already written the mapping under the slot.
        resolver
            .store
            .set("app.localhost", RouteMapping::new(MappingKind::Process, "localhost", 3000, "vite"));

        let c = calls.clone();
        let result = resolver
            .resolve("app.localhost", false, move |_gateway| {
                c.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err(DriftProxyError::ResolverFailure(
                        "should not be called".into(),
                    ))
                }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.port, 3000);
    }

    #[tokio::test]
    async fn miss_invokes_resolve_exactly_once_and_persists() {
        let resolver = SingleflightResolver::new(gateway(), store());

        let result = resolver
            .resolve("new.localhost", false, |_gateway| async move {
                Ok(TargetDecision {
                    kind: MappingKind::Process,
                    target: "localhost".into(),
                    port: 4000,
                    rationale: "test".into(),
                    workdir: None,
                    command_regex: None,
                })
            })
            .await
            .unwrap();

        assert_eq!(result.port, 4000);
        assert!(resolver.store.get("new.localhost").is_some());
    }

    #[tokio::test]
    async fn failure_propagates_without_writing_mapping() {
        let resolver = SingleflightResolver::new(gateway(), store());

        let result = resolver
            .resolve("bad.localhost", false, |_gateway| async move {
                Err(DriftProxyError::ResolverFailure("judge down".into()))
            })
            .await;

        assert!(result.is_err());
        assert!(resolver.store.get("bad.localhost").is_none());
    }

    #[tokio::test]
    async fn force_bypasses_existing_mapping_and_reinvokes_resolver() {
        let resolver = SingleflightResolver::new(gateway(), store());
        let calls = Arc::new(AtomicUsize::new(0));

        resolver.store.set(
            "app.localhost",
            RouteMapping::new(MappingKind::Process, "localhost", 3000, "vite"),
        );

        let c = calls.clone();
        let result = resolver
            .resolve("app.localhost", true, move |_gateway| {
                c.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok(TargetDecision {
                        kind: MappingKind::Container,
                        target: "driftproxy-app-1".into(),
                        port: 8080,
                        rationale: "forced re-resolution".into(),
                        workdir: None,
                        command_regex: None,
                    })
                }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.port, 8080);
        assert_eq!(resolver.store.get("app.localhost").unwrap().port, 8080);
    }
}
