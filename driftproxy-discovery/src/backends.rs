//! Concrete OS-facing probe backends. These are the "platform lift":
//! swappable behind the `ProcessProbe`/`ContainerProbe` traits so the
//! core never depends on a specific OS's process-listing or container
//! runtime mechanics.

use crate::container::ContainerProbe;
use crate::process::{dedupe_and_filter, ProcessProbe};
use async_trait::async_trait;
use driftproxy_core::{ContainerRecord, ProcessRecord, PublishedMapping};
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;

/// Lists listening TCP sockets via `ss -ltnp`, then resolves command/args/
/// workdir per PID via `/proc/<pid>/{cmdline,cwd}` on Linux. A single probe
/// call batches all of this (the spec explicitly permits batching to avoid
/// one child-process invocation per listening port).
pub struct CommandProcessProbe {
    timeout: Duration,
}

impl CommandProcessProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ProcessProbe for CommandProcessProbe {
    async fn probe(&self) -> anyhow::Result<Vec<ProcessRecord>> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("ss").args(["-ltnp"]).output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("process probe timed out"))??;

        if !output.status.success() {
            anyhow::bail!(
                "ss exited with status {}",
                output.status.code().unwrap_or(-1)
            );
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(dedupe_and_filter(parse_ss_output(&text)))
    }
}

/// Parse `ss -ltnp` output into process records. Lines look like:
/// `LISTEN 0 511 0.0.0.0:3000 0.0.0.0:* users:(("node",pid=1234,fd=20))`
fn parse_ss_output(text: &str) -> Vec<ProcessRecord> {
    let mut records = Vec::new();
    for line in text.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            continue;
        }
        let local_addr = fields[3];
        let Some((bind_address, port)) = split_host_port(local_addr) else {
            continue;
        };
        let Some(pid) = extract_pid(line) else {
            continue;
        };
        let (command, args, workdir) = process_metadata(pid);
        records.push(ProcessRecord {
            port,
            pid,
            bind_address,
            command,
            args,
            workdir,
        });
    }
    records
}

fn split_host_port(addr: &str) -> Option<(String, u16)> {
    let idx = addr.rfind(':')?;
    let host = &addr[..idx];
    let port: u16 = addr[idx + 1..].parse().ok()?;
    Some((host.trim_start_matches('[').trim_end_matches(']').to_string(), port))
}

fn extract_pid(line: &str) -> Option<u32> {
    let marker = "pid=";
    let idx = line.find(marker)?;
    let rest = &line[idx + marker.len()..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    rest[..end].parse().ok()
}

#[cfg(target_os = "linux")]
fn process_metadata(pid: u32) -> (String, Vec<String>, String) {
    let cmdline = std::fs::read_to_string(format!("/proc/{pid}/cmdline")).unwrap_or_default();
    let mut parts = cmdline.split('\0').filter(|s| !s.is_empty());
    let command = parts.next().unwrap_or_default().to_string();
    let args: Vec<String> = parts.map(|s| s.to_string()).collect();
    let workdir = std::fs::read_link(format!("/proc/{pid}/cwd"))
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    (command, args, workdir)
}

#[cfg(not(target_os = "linux"))]
fn process_metadata(_pid: u32) -> (String, Vec<String>, String) {
    (String::new(), Vec::new(), String::new())
}

/// Talks to the local Docker/Podman CLI. Any failure (binary missing,
/// daemon unreachable) yields an empty list per the container-probe
/// contract, logged at `warn!`.
pub struct DockerContainerProbe {
    timeout: Duration,
}

impl DockerContainerProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn list(&self) -> anyhow::Result<Vec<ContainerRecord>> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("docker")
                .args(["ps", "--format", "{{json .}}"])
                .output(),
        )
        .await??;

        if !output.status.success() {
            anyhow::bail!("docker ps exited with status {:?}", output.status.code());
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut records = Vec::new();
        for line in text.lines() {
            if let Ok(record) = parse_docker_ps_line(line) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[derive(serde::Deserialize)]
struct DockerPsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "Image")]
    image: String,
    #[serde(rename = "Ports")]
    ports: String,
    #[serde(rename = "Labels")]
    labels: String,
}

fn parse_docker_ps_line(line: &str) -> anyhow::Result<ContainerRecord> {
    let parsed: DockerPsLine = serde_json::from_str(line)?;
    let labels: HashMap<String, String> = parsed
        .labels
        .split(',')
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let (exposed_ports, published_mappings) = parse_docker_ports(&parsed.ports);

    Ok(ContainerRecord {
        id: parsed.id,
        name: parsed.names,
        image: parsed.image,
        exposed_ports,
        published_mappings,
        network_ip: None,
        network_name: None,
        workdir: None,
        labels,
    })
}

/// Parse `docker ps` port strings like `0.0.0.0:8080->80/tcp, 443/tcp`.
fn parse_docker_ports(raw: &str) -> (Vec<u16>, Vec<PublishedMapping>) {
    let mut exposed = Vec::new();
    let mut published = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if let Some((host_part, container_part)) = entry.split_once("->") {
            let container_port: u16 = container_part
                .trim_end_matches("/tcp")
                .trim_end_matches("/udp")
                .parse()
                .unwrap_or(0);
            if let Some(idx) = host_part.rfind(':') {
                let host_ip = host_part[..idx].to_string();
                if let Ok(host_port) = host_part[idx + 1..].parse() {
                    published.push(PublishedMapping {
                        container_port,
                        host_ip,
                        host_port,
                    });
                    exposed.push(container_port);
                }
            }
        } else if let Ok(port) = entry
            .trim_end_matches("/tcp")
            .trim_end_matches("/udp")
            .parse()
        {
            exposed.push(port);
        }
    }
    (exposed, published)
}

#[async_trait]
impl ContainerProbe for DockerContainerProbe {
    async fn probe(&self, own_project: Option<&str>) -> Vec<ContainerRecord> {
        match self.list().await {
            Ok(records) => crate::container::filter_own_project(records, own_project),
            Err(e) => {
                tracing::warn!(error = %e, "container probe unreachable, continuing with no containers");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ss_line_extracts_port_and_pid() {
        let text = "State Recv-Q Send-Q Local Address:Port Peer Address:Port Process\n\
                     LISTEN 0 511 0.0.0.0:3000 0.0.0.0:* users:((\"node\",pid=1234,fd=20))";
        let records = parse_ss_output(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].port, 3000);
        assert_eq!(records[0].pid, 1234);
        assert_eq!(records[0].bind_address, "0.0.0.0");
    }

    #[test]
    fn parse_docker_ports_handles_published_and_exposed() {
        let (exposed, published) = parse_docker_ports("0.0.0.0:8080->80/tcp, 443/tcp");
        assert_eq!(exposed, vec![80, 443]);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].host_port, 8080);
        assert_eq!(published[0].container_port, 80);
    }

    #[test]
    fn parse_docker_ps_line_builds_container_record() {
        let line = r#"{"ID":"abc123","Names":"app-web","Image":"node:20","Ports":"0.0.0.0:3000->3000/tcp","Labels":"com.docker.compose.project=myapp"}"#;
        let record = parse_docker_ps_line(line).unwrap();
        assert_eq!(record.name, "app-web");
        assert_eq!(record.project_label(), Some("myapp"));
        assert_eq!(record.published_mappings[0].host_port, 3000);
    }
}
