//! Persistent hostname → mapping store.
//!
//! Entries live in memory under a reader/writer lock; `Set`/`Delete`/`Save`
//! take the write lock, `Get`/`GetAll` take the read lock so the hot lookup
//! path never blocks on another reader. The file is written atomically:
//! first to a `.tmp` sibling, then renamed over the final path, so a crash
//! mid-write never corrupts the stored state.

use chrono::Utc;
use driftproxy_core::{DriftProxyError, RouteMapping};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub struct MappingStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, RouteMapping>>,
}

impl MappingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Load from disk into memory. Tolerates a missing file (starts empty)
    /// but rejects malformed JSON.
    pub fn load(&self) -> Result<(), DriftProxyError> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "mapping store: no file found, starting fresh");
            return Ok(());
        }

        let data = std::fs::read_to_string(&self.path)?;
        let loaded: HashMap<String, RouteMapping> = serde_json::from_str(&data)?;
        let count = loaded.len();

        let mut guard = self.entries.write().expect("mapping store lock poisoned");
        *guard = loaded;
        drop(guard);

        tracing::info!(count, path = %self.path.display(), "mapping store: loaded");
        Ok(())
    }

    pub fn get(&self, host: &str) -> Option<RouteMapping> {
        self.entries
            .read()
            .expect("mapping store lock poisoned")
            .get(host)
            .cloned()
    }

    /// Defensive copy of the whole table; callers iterate without holding
    /// the lock.
    pub fn get_all(&self) -> HashMap<String, RouteMapping> {
        self.entries
            .read()
            .expect("mapping store lock poisoned")
            .clone()
    }

    /// Insert or replace the mapping for `host`. Fills `created_at` if the
    /// caller left it at the default (this is a convenience; the mapping
    /// passed in already carries a timestamp in practice).
    pub fn set(&self, host: impl Into<String>, mut mapping: RouteMapping) {
        if mapping.created_at.timestamp() == 0 {
            mapping.created_at = Utc::now();
        }
        self.entries
            .write()
            .expect("mapping store lock poisoned")
            .insert(host.into(), mapping);
    }

    pub fn delete(&self, host: &str) -> Option<RouteMapping> {
        self.entries
            .write()
            .expect("mapping store lock poisoned")
            .remove(host)
    }

    /// Serialize the whole table to JSON with two-space indent, writing via
    /// tmp-file + rename for crash atomicity. The containing directory is
    /// created if missing.
    pub fn save(&self) -> Result<(), DriftProxyError> {
        let snapshot = self.get_all();
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = %self.path.display(), count = snapshot.len(), "mapping store: saved");
        Ok(())
    }

    /// All mappings whose hostname is not a synthetic second-level proxy
    /// key (i.e. does not contain `:`).
    pub fn real_routes(&self) -> HashMap<String, RouteMapping> {
        self.get_all()
            .into_iter()
            .filter(|(host, _)| !driftproxy_core::Hostname::is_synthetic_key(host))
            .collect()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
