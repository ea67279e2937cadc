//! Process discovery: a contract to an OS-specific probe, plus the
//! short-TTL cache wrapping it.

use crate::cache::TtlSnapshotCache;
use async_trait::async_trait;
use driftproxy_core::ProcessRecord;
use std::collections::HashMap;
use std::time::Duration;

/// Well-known noise filtered out of process snapshots: IDE/helper/browser
/// processes, privileged ports, and workdirs that are container/system
/// roots rather than an actual project checkout. This list is an
/// implementation constant, not a contract guaranteed to consumers.
const NOISE_WORKDIRS: &[&str] = &["/", "/app", "/srv", "/root"];
const NOISE_DEBUG_PORTS: &[u16] = &[9229, 9222];

/// `Probe` is pure with respect to the OS view it samples; it may be slow
/// (hundreds of ms) and may fail.
#[async_trait]
pub trait ProcessProbe: Send + Sync {
    async fn probe(&self) -> anyhow::Result<Vec<ProcessRecord>>;
}

/// Apply the deduplication and noise-filter rules to a raw probe result.
/// For the same `pid`, keep at most one record: prefer a wildcard bind
/// (`0.0.0.0`/`::`) over a loopback bind, tie-broken by the lowest port.
pub fn dedupe_and_filter(records: Vec<ProcessRecord>) -> Vec<ProcessRecord> {
    let mut by_pid: HashMap<u32, ProcessRecord> = HashMap::new();

    for record in records {
        if record.port <= 1023 {
            continue;
        }
        if NOISE_DEBUG_PORTS.contains(&record.port) {
            continue;
        }
        let trimmed_workdir = record.workdir.trim_end_matches('/');
        if NOISE_WORKDIRS.contains(&trimmed_workdir) {
            continue;
        }

        by_pid
            .entry(record.pid)
            .and_modify(|existing| {
                let existing_wildcard = is_wildcard_bind(&existing.bind_address);
                let new_wildcard = is_wildcard_bind(&record.bind_address);
                let replace = match (existing_wildcard, new_wildcard) {
                    (false, true) => true,
                    (true, false) => false,
                    _ => record.port < existing.port,
                };
                if replace {
                    *existing = record.clone();
                }
            })
            .or_insert(record);
    }

    by_pid.into_values().collect()
}

fn is_wildcard_bind(addr: &str) -> bool {
    addr == "0.0.0.0" || addr == "::" || addr == "[::]"
}

/// TTL-cached wrapper over a `ProcessProbe`.
pub struct ProcessSnapshot {
    probe: Box<dyn ProcessProbe>,
    cache: TtlSnapshotCache<ProcessRecord>,
}

impl ProcessSnapshot {
    pub fn new(probe: Box<dyn ProcessProbe>, ttl: Duration) -> Self {
        Self {
            probe,
            cache: TtlSnapshotCache::new(ttl),
        }
    }

    pub async fn get(&self) -> anyhow::Result<Vec<ProcessRecord>> {
        self.cache.get(|| self.probe.probe()).await
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: u32, port: u16, bind: &str, workdir: &str) -> ProcessRecord {
        ProcessRecord {
            port,
            pid,
            bind_address: bind.to_string(),
            command: "node".into(),
            args: vec![],
            workdir: workdir.to_string(),
        }
    }

    #[test]
    fn dedup_prefers_wildcard_bind() {
        let records = vec![
            record(1, 3000, "127.0.0.1", "/home/u/app"),
            record(1, 3001, "0.0.0.0", "/home/u/app"),
        ];
        let result = dedupe_and_filter(records);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].bind_address, "0.0.0.0");
    }

    #[test]
    fn dedup_tie_breaks_by_lowest_port() {
        let records = vec![
            record(1, 3001, "127.0.0.1", "/home/u/app"),
            record(1, 3000, "127.0.0.1", "/home/u/app"),
        ];
        let result = dedupe_and_filter(records);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].port, 3000);
    }

    #[test]
    fn filters_privileged_ports() {
        let records = vec![record(1, 80, "0.0.0.0", "/home/u/app")];
        assert!(dedupe_and_filter(records).is_empty());
    }

    #[test]
    fn filters_debug_ports() {
        let records = vec![record(1, 9229, "0.0.0.0", "/home/u/app")];
        assert!(dedupe_and_filter(records).is_empty());
    }

    #[test]
    fn filters_noise_workdirs() {
        let records = vec![record(1, 3000, "0.0.0.0", "/app")];
        assert!(dedupe_and_filter(records).is_empty());
    }

    struct StaticProbe(Vec<ProcessRecord>);

    #[async_trait]
    impl ProcessProbe for StaticProbe {
        async fn probe(&self) -> anyhow::Result<Vec<ProcessRecord>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn snapshot_returns_probe_result() {
        let snapshot = ProcessSnapshot::new(
            Box::new(StaticProbe(vec![record(1, 3000, "0.0.0.0", "/home/u/app")])),
            Duration::from_secs(5),
        );
        let records = snapshot.get().await.unwrap();
        assert_eq!(records.len(), 1);
    }
}
