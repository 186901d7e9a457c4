//! Seam to the external scanning engine.
//!
//! The engine is an autonomous multi-agent tool that runs against one
//! target and writes artifacts into a per-run directory. The executor only
//! talks to it through these traits: launch a run, read its telemetry,
//! steer it with directives, wait for it, and tear it down.

pub mod process;
pub mod sandbox;
#[cfg(test)]
pub mod testing;

use crate::config::TierProfile;
use crate::error::EngineError;
use crate::models::{AgentStatus, ScanRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use process::ProcessEngine;
pub use sandbox::{DockerSandbox, Sandbox};

/// Everything the engine needs to start one run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInvocation {
    pub run_name: String,
    pub target: String,
    pub model: String,
    pub max_iterations: u32,
    pub scan_mode: String,
    pub max_agents: u32,
    pub agent_wait_timeout: Duration,
}

impl EngineInvocation {
    pub fn for_scan(scan: &ScanRequest, profile: &TierProfile) -> Self {
        Self {
            run_name: run_name_for(scan),
            target: scan.target.clone(),
            model: profile.model.clone(),
            max_iterations: profile.max_iterations,
            scan_mode: profile.scan_mode.clone(),
            max_agents: profile.max_agents,
            agent_wait_timeout: Duration::from_secs(profile.agent_wait_timeout_secs),
        }
    }
}

/// Run names are unique per attempt so retries never reuse artifacts.
pub fn run_name_for(scan: &ScanRequest) -> String {
    let id = scan.id.simple().to_string();
    format!("scan-{}-{}", &id[..8], scan.retry_count)
}

/// One sub-agent as seen in telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    #[serde(default)]
    pub task: String,
    pub status: AgentStatus,
    /// Ids of tool executions this agent performed, oldest first.
    #[serde(default)]
    pub tool_executions: Vec<u64>,
}

/// One tool invocation as seen in telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub id: u64,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub status: String,
}

/// Cumulative LLM usage as reported by the engine. Not guaranteed monotonic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmTotals {
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Iteration counter of the root agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationBudget {
    pub current: u32,
    pub max: u32,
}

/// A vulnerability the engine reported while running.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportedVulnerability {
    pub title: String,
    pub severity: String,
    pub endpoint: String,
    pub impact: String,
    pub description: String,
    pub technical_analysis: String,
    pub poc_script_code: String,
    pub poc_description: String,
    pub remediation_steps: String,
    pub owasp_category: String,
}

/// Live view of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    pub agents: Vec<AgentRecord>,
    pub tool_executions: Vec<ToolExecution>,
    pub totals: LlmTotals,
    /// Tool calls made, excluding internal bookkeeping tools.
    pub tool_count: u64,
    pub iteration: IterationBudget,
    pub vulnerabilities: Vec<ReportedVulnerability>,
}

/// What a finished run leaves behind.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    /// Directory holding `vulnerabilities/` and the markdown report.
    pub run_dir: Option<PathBuf>,
}

/// Starts engine runs.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Starts a run. The returned session is live until `execute` returns.
    async fn launch(&self, invocation: EngineInvocation) -> Result<Arc<dyn EngineSession>, EngineError>;
}

/// Handle to one live run.
#[async_trait]
pub trait EngineSession: Send + Sync {
    fn run_name(&self) -> &str;

    /// Reads the current telemetry.
    async fn telemetry(&self) -> Result<Telemetry, EngineError>;

    /// Queues a high-priority message for the root agent.
    async fn inject_directive(&self, message: &str) -> Result<(), EngineError>;

    /// Lowers the root agent's iteration ceiling.
    async fn limit_iterations(&self, max_iterations: u32) -> Result<(), EngineError>;

    /// Waits for the run to finish. Dropping the future stops the run.
    async fn execute(&self) -> Result<EngineOutput, EngineError>;
}
