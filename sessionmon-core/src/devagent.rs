//! devagent container discovery
//!
//! `devagent list` prints a JSON array of devcontainers. Containers that mount
//! a host directory at `/home/vscode/.claude` have their Claude logs on the
//! host, so their `projects/` directory can be watched like the local one.

use crate::error::{Error, Result};
use crate::watcher::WatchRoot;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Mount destination of the Claude state directory inside a container.
pub const CLAUDE_MOUNT_DESTINATION: &str = "/home/vscode/.claude";

/// Docker Desktop prefixes host paths with this on macOS.
const HOST_MNT_PREFIX: &str = "/host_mnt";

const DISCOVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Origin label prefix for sessions found in a container.
pub const ORIGIN_PREFIX: &str = "devagent:";

#[derive(Debug, Deserialize)]
struct Container {
    #[serde(default)]
    project_path: String,
    #[serde(default)]
    devcontainer: DevContainer,
    #[serde(default)]
    proxy_sidecar: ProxySidecar,
}

#[derive(Debug, Default, Deserialize)]
struct DevContainer {
    #[serde(default)]
    mounts: Vec<Mount>,
}

#[derive(Debug, Deserialize)]
struct Mount {
    #[serde(default)]
    source: String,
    #[serde(default)]
    destination: String,
}

#[derive(Debug, Default, Deserialize)]
struct ProxySidecar {
    #[serde(default)]
    container_name: String,
    #[serde(default)]
    state: String,
}

/// A devagent environment with host-side paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub container_name: String,
    pub project_path: String,
    /// Host directory holding the container's Claude session logs
    pub projects_dir: PathBuf,
    /// Container state as reported (`running`, `exited`, ...)
    pub state: String,
}

impl Environment {
    pub fn origin(&self) -> String {
        format!("{ORIGIN_PREFIX}{}", self.container_name)
    }

    pub fn watch_root(&self) -> WatchRoot {
        WatchRoot::new(self.projects_dir.clone(), self.origin())
    }
}

/// Parse `devagent list` output. Containers without the Claude mount are
/// skipped; every state is kept.
pub fn parse_output(data: &[u8]) -> Result<Vec<Environment>> {
    let containers: Vec<Container> = serde_json::from_slice(data)
        .map_err(|e| Error::Devagent(format!("failed to parse devagent output: {e}")))?;

    let envs = containers
        .into_iter()
        .filter_map(|container| {
            let mount = container
                .devcontainer
                .mounts
                .iter()
                .find(|m| m.destination == CLAUDE_MOUNT_DESTINATION)?;

            let base = strip_host_mnt(&mount.source);
            Some(Environment {
                projects_dir: PathBuf::from(format!("{base}/projects")),
                container_name: container.proxy_sidecar.container_name,
                project_path: container.project_path,
                state: container.proxy_sidecar.state,
            })
        })
        .collect();

    Ok(envs)
}

fn strip_host_mnt(path: &str) -> &str {
    match path.strip_prefix(HOST_MNT_PREFIX) {
        Some(rest) if !rest.is_empty() && rest != "/" => rest,
        _ => path,
    }
}

/// Run `devagent list` and parse its output.
pub async fn discover() -> Result<Vec<Environment>> {
    let output = tokio::time::timeout(
        DISCOVER_TIMEOUT,
        tokio::process::Command::new("devagent")
            .arg("list")
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| Error::Devagent(format!("devagent list timed out after {DISCOVER_TIMEOUT:?}")))?
    .map_err(|e| Error::Devagent(format!("failed to run devagent list: {e}")))?;

    if !output.status.success() {
        return Err(Error::Devagent(format!(
            "devagent list exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let envs = parse_output(&output.stdout)?;
    tracing::debug!(environments = envs.len(), "Discovered devagent environments");
    Ok(envs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
      {
        "project_path": "/Users/me/src/app",
        "devcontainer": {
          "mounts": [
            { "type": "bind", "source": "/host_mnt/Users/me/.devagent/app/claude", "destination": "/home/vscode/.claude", "read_only": false },
            { "type": "bind", "source": "/Users/me/src/app", "destination": "/workspace" }
          ]
        },
        "proxy_sidecar": { "container_name": "app-proxy", "state": "running" }
      },
      {
        "project_path": "/home/me/other",
        "devcontainer": { "mounts": [ { "source": "/home/me/.claude-other", "destination": "/home/vscode/.claude" } ] },
        "proxy_sidecar": { "container_name": "other-proxy", "state": "exited" }
      },
      {
        "project_path": "/no/mount",
        "devcontainer": { "mounts": [] },
        "proxy_sidecar": { "container_name": "bare", "state": "running" }
      }
    ]"#;

    #[test]
    fn test_parse_output() {
        let envs = parse_output(SAMPLE.as_bytes()).unwrap();
        assert_eq!(envs.len(), 2);

        assert_eq!(envs[0].container_name, "app-proxy");
        assert_eq!(envs[0].project_path, "/Users/me/src/app");
        assert_eq!(
            envs[0].projects_dir,
            PathBuf::from("/Users/me/.devagent/app/claude/projects")
        );
        assert_eq!(envs[0].state, "running");
        assert_eq!(envs[0].origin(), "devagent:app-proxy");

        assert_eq!(envs[1].projects_dir, PathBuf::from("/home/me/.claude-other/projects"));
        assert_eq!(envs[1].state, "exited");
        assert_eq!(envs[1].watch_root().origin, "devagent:other-proxy");
    }

    #[test]
    fn test_parse_output_rejects_garbage() {
        assert!(matches!(parse_output(b"not json"), Err(Error::Devagent(_))));
        assert!(parse_output(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_strip_host_mnt() {
        assert_eq!(strip_host_mnt("/host_mnt/Users/me"), "/Users/me");
        assert_eq!(strip_host_mnt("/host_mnt"), "/host_mnt");
        assert_eq!(strip_host_mnt("/host_mnt/"), "/host_mnt/");
        assert_eq!(strip_host_mnt("/home/me"), "/home/me");
    }
}
