//! Generic short-TTL cache wrapping a fallible, possibly-slow probe.
//!
//! `Get` follows the algorithm common to both `ProcessSnapshot` and
//! `ContainerSnapshot`:
//! 1. fast path under a read lock: if the cache is fresh, return it;
//! 2. slow path under a write lock: re-check freshness (another writer may
//!    have refreshed while we waited for the lock), then invoke the probe;
//! 3. on probe failure, serve stale data if any exists (logged as
//!    degraded), otherwise surface the error.
//!
//! The refresh itself runs under the write lock, which is what guarantees
//! at most one concurrent probe invocation per cache during a TTL window.

use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct CacheState<T> {
    data: Vec<T>,
    refreshed_at: Option<Instant>,
}

pub struct TtlSnapshotCache<T> {
    ttl: Duration,
    state: RwLock<CacheState<T>>,
}

impl<T: Clone> TtlSnapshotCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(CacheState {
                data: Vec::new(),
                refreshed_at: None,
            }),
        }
    }

    fn is_fresh(refreshed_at: Option<Instant>, ttl: Duration) -> bool {
        matches!(refreshed_at, Some(t) if t.elapsed() < ttl)
    }

    /// `probe` is awaited only on the slow path, under the write lock.
    pub async fn get<F, Fut, E>(&self, probe: F) -> Result<Vec<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<T>, E>>,
        E: std::fmt::Display,
    {
        {
            let guard = self.state.read().await;
            if Self::is_fresh(guard.refreshed_at, self.ttl) {
                return Ok(guard.data.clone());
            }
        }

        let mut guard = self.state.write().await;
        if Self::is_fresh(guard.refreshed_at, self.ttl) {
            return Ok(guard.data.clone());
        }

        match probe().await {
            Ok(fresh) => {
                guard.data = fresh.clone();
                guard.refreshed_at = Some(Instant::now());
                Ok(fresh)
            }
            Err(e) => {
                if guard.refreshed_at.is_some() {
                    tracing::warn!(error = %e, "discovery probe failed, serving stale snapshot");
                    Ok(guard.data.clone())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Force the next `get` to refresh regardless of TTL.
    pub async fn invalidate(&self) {
        let mut guard = self.state.write().await;
        guard.refreshed_at = None;
    }
}
