//! Engine backed by an external command-line process.
//!
//! The process is started with the run parameters as arguments and
//! environment. It exchanges state with the worker through files in its
//! run directory: it keeps `telemetry.json` current and consumes
//! directives appended to `directives.jsonl`.

use super::{Engine, EngineInvocation, EngineOutput, EngineSession, Telemetry};
use crate::config::EngineConfig;
use crate::error::EngineError;
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const TELEMETRY_FILE: &str = "telemetry.json";
pub const DIRECTIVES_FILE: &str = "directives.jsonl";

/// Launches the engine executable once per run.
pub struct ProcessEngine {
    config: EngineConfig,
}

impl ProcessEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn command(&self, invocation: &EngineInvocation, run_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.arg("--target")
            .arg(&invocation.target)
            .arg("--run-name")
            .arg(&invocation.run_name)
            .arg("--scan-mode")
            .arg(&invocation.scan_mode)
            .arg("--max-iterations")
            .arg(invocation.max_iterations.to_string())
            .arg("--non-interactive")
            .env("STRIX_LLM", &invocation.model)
            .env("STRIX_MAX_AGENTS", invocation.max_agents.to_string())
            .env(
                "STRIX_AGENT_WAIT_TIMEOUT",
                invocation.agent_wait_timeout.as_secs().to_string(),
            )
            .env("STRIX_RUN_DIR", run_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(ref key) = self.config.llm_api_key {
            cmd.env("LLM_API_KEY", key);
        }

        cmd
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    async fn launch(&self, invocation: EngineInvocation) -> Result<Arc<dyn EngineSession>, EngineError> {
        let run_dir = self.config.runs_dir.join(&invocation.run_name);
        tokio::fs::create_dir_all(&run_dir).await?;

        let child = self
            .command(&invocation, &run_dir)
            .spawn()
            .map_err(|e| EngineError::Launch(format!("{}: {}", self.config.command, e)))?;

        info!(
            "Launched engine run {} (pid {:?}) against {}",
            invocation.run_name,
            child.id(),
            invocation.target
        );

        Ok(Arc::new(ProcessSession {
            run_name: invocation.run_name,
            run_dir,
            child: Mutex::new(Some(child)),
        }))
    }
}

struct ProcessSession {
    run_name: String,
    run_dir: PathBuf,
    child: Mutex<Option<Child>>,
}

impl ProcessSession {
    async fn append_directive(&self, line: serde_json::Value) -> Result<(), EngineError> {
        let path = self.run_dir.join(DIRECTIVES_FILE);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut bytes = serde_json::to_vec(&line).map_err(|e| EngineError::Io(e.into()))?;
        bytes.push(b'\n');
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EngineSession for ProcessSession {
    fn run_name(&self) -> &str {
        &self.run_name
    }

    async fn telemetry(&self) -> Result<Telemetry, EngineError> {
        read_telemetry(&self.run_dir.join(TELEMETRY_FILE)).await
    }

    async fn inject_directive(&self, message: &str) -> Result<(), EngineError> {
        self.append_directive(json!({
            "type": "message",
            "role": "user",
            "priority": "high",
            "content": message,
        }))
        .await
    }

    async fn limit_iterations(&self, max_iterations: u32) -> Result<(), EngineError> {
        self.append_directive(json!({
            "type": "iteration_limit",
            "max_iterations": max_iterations,
        }))
        .await
    }

    async fn execute(&self) -> Result<EngineOutput, EngineError> {
        let mut child = self
            .child
            .lock()
            .await
            .take()
            .ok_or_else(|| EngineError::Crashed(format!("run {} already executed", self.run_name)))?;

        let status = child.wait().await?;
        debug!("Engine run {} exited with {}", self.run_name, status);

        if !status.success() {
            let reason = match status.code() {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            };
            return Err(EngineError::Reported(reason));
        }

        Ok(EngineOutput {
            run_dir: self.run_dir.is_dir().then(|| self.run_dir.clone()),
        })
    }
}

/// Reads a telemetry file. A file that does not exist yet is an empty run.
pub async fn read_telemetry(path: &Path) -> Result<Telemetry, EngineError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Telemetry::default()),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content)
        .map_err(|e| EngineError::Telemetry(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn invocation(name: &str) -> EngineInvocation {
        EngineInvocation {
            run_name: name.to_string(),
            target: "https://example.com".to_string(),
            model: "openai/gpt-5.2".to_string(),
            max_iterations: 50,
            scan_mode: "quick".to_string(),
            max_agents: 15,
            agent_wait_timeout: Duration::from_secs(120),
        }
    }

    fn engine(dir: &TempDir, command: &str) -> ProcessEngine {
        ProcessEngine::new(EngineConfig {
            command: command.to_string(),
            runs_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        })
    }

    #[tokio::test]
    async fn test_missing_telemetry_is_empty() {
        let dir = TempDir::new().unwrap();
        let telemetry = read_telemetry(&dir.path().join(TELEMETRY_FILE)).await.unwrap();
        assert_eq!(telemetry, Telemetry::default());
    }

    #[tokio::test]
    async fn test_torn_telemetry_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(TELEMETRY_FILE);
        std::fs::write(&path, r#"{"agents": [{"id": "ro"#).unwrap();
        let err = read_telemetry(&path).await.unwrap_err();
        assert!(matches!(err, EngineError::Telemetry(_)));
    }

    #[tokio::test]
    async fn test_launch_failure_for_missing_command() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, "nullscan-test-no-such-engine");
        let err = engine.launch(invocation("run-missing")).await.err().unwrap();
        assert!(matches!(err, EngineError::Launch(_)));
        assert!(!err.is_retryable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_retryable() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, "false");
        let session = engine.launch(invocation("run-false")).await.unwrap();
        let err = session.execute().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directives_are_appended() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, "true");
        let session = engine.launch(invocation("run-true")).await.unwrap();
        session.inject_directive("wrap up").await.unwrap();
        session.limit_iterations(12).await.unwrap();

        let output = session.execute().await.unwrap();
        let run_dir = output.run_dir.unwrap();
        let lines = std::fs::read_to_string(run_dir.join(DIRECTIVES_FILE)).unwrap();
        let parsed: Vec<serde_json::Value> = lines
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["content"], "wrap up");
        assert_eq!(parsed[0]["priority"], "high");
        assert_eq!(parsed[1]["max_iterations"], 12);

        assert!(session.execute().await.is_err());
    }
}
