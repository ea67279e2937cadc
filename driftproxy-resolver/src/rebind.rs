//! Recovers a fresh port for a `process` mapping whose cached port may have
//! gone stale after the target process restarted.

use driftproxy_core::{ProcessIdentifier, ProcessRecord};
use driftproxy_discovery::ProcessSnapshot;
use regex::Regex;
use std::sync::Arc;

pub struct PortRebinder {
    snapshot: Arc<ProcessSnapshot>,
}

impl PortRebinder {
    pub fn new(snapshot: Arc<ProcessSnapshot>) -> Self {
        Self { snapshot }
    }

    /// Resolve a fresh port for `identifier`. Returns `None` if no
    /// candidate process remains; the caller falls back to the mapping's
    /// stored port in that case.
    pub async fn resolve(&self, identifier: &ProcessIdentifier) -> Option<u16> {
        let records = self.snapshot.get().await.ok()?;
        resolve_from_records(&records, identifier)
    }
}

fn resolve_from_records(records: &[ProcessRecord], identifier: &ProcessIdentifier) -> Option<u16> {
    let mut candidates: Vec<&ProcessRecord> = records
        .iter()
        .filter(|r| match_workdir(&r.workdir, &identifier.workdir))
        .collect();

    if let Some(pattern) = &identifier.command_regex {
        candidates = filter_by_command(candidates, pattern);
    }

    candidates.into_iter().map(|r| r.port).min()
}

fn filter_by_command<'a>(
    candidates: Vec<&'a ProcessRecord>,
    pattern: &str,
) -> Vec<&'a ProcessRecord> {
    match Regex::new(pattern) {
        Ok(re) => candidates
            .into_iter()
            .filter(|r| re.is_match(&r.command) || r.args.iter().any(|a| re.is_match(a)))
            .collect(),
        Err(_) => candidates
            .into_iter()
            .filter(|r| {
                r.command.contains(pattern) || r.args.iter().any(|a| a.contains(pattern))
            })
            .collect(),
    }
}

/// True iff, after trimming trailing slashes, `a == b`, `a` starts with
/// `b + "/"`, or `b` starts with `a + "/"`. Dev tools often report a
/// subdirectory (the app root) while the stored identifier remembers the
/// repo root, or vice versa.
pub fn match_workdir(a: &str, b: &str) -> bool {
    let a = a.trim_end_matches('/');
    let b = b.trim_end_matches('/');
    a == b || a.starts_with(&format!("{b}/")) || b.starts_with(&format!("{a}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: u32, port: u16, workdir: &str, command: &str, args: Vec<&str>) -> ProcessRecord {
        ProcessRecord {
            port,
            pid,
            bind_address: "0.0.0.0".into(),
            command: command.into(),
            args: args.into_iter().map(String::from).collect(),
            workdir: workdir.into(),
        }
    }

    #[test]
    fn match_workdir_exact() {
        assert!(match_workdir("/home/u/app", "/home/u/app"));
    }

    #[test]
    fn match_workdir_trims_trailing_slash() {
        assert!(match_workdir("/home/u/app/", "/home/u/app"));
    }

    #[test]
    fn match_workdir_subdirectory_either_direction() {
        assert!(match_workdir("/home/u/app/frontend", "/home/u/app"));
        assert!(match_workdir("/home/u/app", "/home/u/app/frontend"));
    }

    #[test]
    fn match_workdir_rejects_unrelated() {
        assert!(!match_workdir("/home/u/other", "/home/u/app"));
    }

    #[test]
    fn resolve_picks_lowest_port_among_candidates() {
        let records = vec![
            record(1, 5174, "/home/u/app/frontend", "node", vec![]),
            record(2, 5173, "/home/u/app/frontend", "node", vec![]),
        ];
        let identifier = ProcessIdentifier {
            workdir: "/home/u/app".into(),
            command_regex: None,
        };
        assert_eq!(resolve_from_records(&records, &identifier), Some(5173));
    }

    #[test]
    fn resolve_returns_none_without_candidates() {
        let records = vec![record(1, 5173, "/home/u/other", "node", vec![])];
        let identifier = ProcessIdentifier {
            workdir: "/home/u/app".into(),
            command_regex: None,
        };
        assert_eq!(resolve_from_records(&records, &identifier), None);
    }

    #[test]
    fn resolve_applies_command_regex() {
        let records = vec![
            record(1, 3000, "/home/u/app", "node", vec!["server.js"]),
            record(2, 9229, "/home/u/app", "node", vec!["--inspect"]),
        ];
        let identifier = ProcessIdentifier {
            workdir: "/home/u/app".into(),
            command_regex: Some("server".into()),
        };
        assert_eq!(resolve_from_records(&records, &identifier), Some(3000));
    }

    #[test]
    fn resolve_degrades_to_substring_on_invalid_regex() {
        let records = vec![record(1, 3000, "/home/u/app", "node server.js", vec![])];
        let identifier = ProcessIdentifier {
            workdir: "/home/u/app".into(),
            command_regex: Some("server(".into()),
        };
        assert_eq!(resolve_from_records(&records, &identifier), Some(3000));
    }

    #[test]
    fn resolve_is_monotonic_given_identical_candidates() {
        let records = vec![record(1, 3000, "/home/u/app", "node", vec![])];
        let identifier = ProcessIdentifier {
            workdir: "/home/u/app".into(),
            command_regex: None,
        };
        let first = resolve_from_records(&records, &identifier);
        let second = resolve_from_records(&records, &identifier);
        assert_eq!(first, second);
    }
}
