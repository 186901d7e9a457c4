//! Reclaiming the containers an engine run leaves behind.
//!
//! The engine starts sandbox containers labelled with the run name. They
//! are not always stopped when a run ends abnormally, so the executor
//! reclaims them after every run and the scheduler sweeps all labelled
//! containers at startup.

use crate::error::EngineError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Container cleanup for engine runs.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Force-removes containers belonging to one run. Returns how many.
    async fn reclaim(&self, run_name: &str) -> Result<usize, EngineError>;

    /// Force-removes every container belonging to any run.
    async fn sweep(&self) -> Result<usize, EngineError>;
}

/// Sandbox cleanup through the docker CLI.
pub struct DockerSandbox {
    docker: String,
    label: String,
    command_timeout: Duration,
}

impl DockerSandbox {
    pub fn new(docker: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
            label: label.into(),
            command_timeout: Duration::from_secs(30),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, EngineError> {
        let result = timeout(self.command_timeout, Command::new(&self.docker).args(args).output()).await;

        match result {
            Ok(Ok(output)) if output.status.success() => Ok(String::from_utf8_lossy(&output.stdout).to_string()),
            Ok(Ok(output)) => Err(EngineError::Sandbox(format!(
                "{} {} exited with {}: {}",
                self.docker,
                args.first().unwrap_or(&""),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Ok(Err(e)) => Err(EngineError::Sandbox(e.to_string())),
            Err(_) => Err(EngineError::Sandbox(format!(
                "timed out after {}s",
                self.command_timeout.as_secs()
            ))),
        }
    }

    async fn remove_matching(&self, filter: &str) -> Result<usize, EngineError> {
        let listing = self.run(&["ps", "-aq", "--filter", filter]).await?;
        let ids = container_ids(&listing);
        if ids.is_empty() {
            debug!("No sandbox containers match {}", filter);
            return Ok(0);
        }

        let mut args = vec!["rm", "-f"];
        args.extend(ids.iter().map(String::as_str));
        self.run(&args).await?;
        Ok(ids.len())
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn reclaim(&self, run_name: &str) -> Result<usize, EngineError> {
        let removed = self
            .remove_matching(&format!("label={}={}", self.label, run_name))
            .await?;
        if removed > 0 {
            info!("Reclaimed {} sandbox container(s) for {}", removed, run_name);
        }
        Ok(removed)
    }

    async fn sweep(&self) -> Result<usize, EngineError> {
        let removed = self.remove_matching(&format!("label={}", self.label)).await?;
        if removed > 0 {
            warn!("Swept {} stale sandbox container(s)", removed);
        }
        Ok(removed)
    }
}

fn container_ids(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_ids() {
        assert_eq!(container_ids("abc123\n\n  def456 \n"), vec!["abc123", "def456"]);
        assert!(container_ids("").is_empty());
    }

    #[tokio::test]
    async fn test_missing_docker_is_an_error() {
        let sandbox = DockerSandbox::new("nullscan-test-no-such-docker", "strix-scan-id");
        let err = sandbox.reclaim("scan-1").await.unwrap_err();
        assert!(matches!(err, EngineError::Sandbox(_)));
    }
}
