//! Configuration file handling.
//!
//! This module handles loading configuration from `nullscan.toml` and
//! merging command-line overrides on top of it.

use crate::models::ScanTier;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "nullscan.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scheduler and executor timing.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// External scanning engine.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-tier engine profiles.
    #[serde(default)]
    pub tiers: TierProfiles,

    /// Submission limits and retention.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Report extraction model.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Outbound notifications.
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Scan state persistence.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Admin access.
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Worker loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds between queue polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds between progress ticks of a running scan.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Iterations granted past the current one once the budget trips.
    #[serde(default = "default_wrap_up_allowance")]
    pub wrap_up_allowance: u32,

    /// Number of activity entries kept in a progress snapshot.
    #[serde(default = "default_activity_log_cap")]
    pub activity_log_cap: usize,

    /// Extra attempts after a transient engine failure; values above 1 act as 1.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-notification delivery timeout in seconds.
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            tick_interval_secs: default_tick_interval(),
            wrap_up_allowance: default_wrap_up_allowance(),
            activity_log_cap: default_activity_log_cap(),
            max_retries: default_max_retries(),
            notify_timeout_secs: default_notify_timeout(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs.max(1))
    }
}

fn default_poll_interval() -> u64 {
    5
}

fn default_tick_interval() -> u64 {
    5
}

fn default_wrap_up_allowance() -> u32 {
    8
}

fn default_activity_log_cap() -> usize {
    100
}

fn default_max_retries() -> u32 {
    1
}

fn default_notify_timeout() -> u64 {
    10
}

/// Engine process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine executable.
    #[serde(default = "default_engine_command")]
    pub command: String,

    /// Directory the engine writes `<run_name>/` artifacts into.
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,

    /// LLM key handed to the engine. Usually supplied by environment.
    #[serde(default)]
    pub llm_api_key: Option<String>,

    /// Docker executable used to reclaim sandboxes.
    #[serde(default = "default_docker_command")]
    pub docker_command: String,

    /// Container label carrying the run name.
    #[serde(default = "default_sandbox_label")]
    pub sandbox_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            runs_dir: default_runs_dir(),
            llm_api_key: None,
            docker_command: default_docker_command(),
            sandbox_label: default_sandbox_label(),
        }
    }
}

fn default_engine_command() -> String {
    "strix".to_string()
}

fn default_runs_dir() -> PathBuf {
    PathBuf::from("strix_runs")
}

fn default_docker_command() -> String {
    "docker".to_string()
}

fn default_sandbox_label() -> String {
    "strix-scan-id".to_string()
}

/// Engine profile for one scan tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierProfile {
    pub model: String,
    pub max_iterations: u32,
    /// Cost ceiling in dollars. Zero or negative disables the governor.
    pub cost_limit: f64,
    pub scan_mode: String,
    pub max_agents: u32,
    pub agent_wait_timeout_secs: u64,
}

/// Profiles for every tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierProfiles {
    #[serde(default = "default_quick_profile")]
    pub quick: TierProfile,
    #[serde(default = "default_pro_profile")]
    pub pro: TierProfile,
    #[serde(default = "default_deep_profile")]
    pub deep: TierProfile,
}

impl Default for TierProfiles {
    fn default() -> Self {
        Self {
            quick: default_quick_profile(),
            pro: default_pro_profile(),
            deep: default_deep_profile(),
        }
    }
}

impl TierProfiles {
    pub fn profile(&self, tier: ScanTier) -> &TierProfile {
        match tier {
            ScanTier::Quick => &self.quick,
            ScanTier::Pro => &self.pro,
            ScanTier::Deep => &self.deep,
        }
    }
}

fn default_quick_profile() -> TierProfile {
    TierProfile {
        model: "openai/gpt-5.2".to_string(),
        max_iterations: 50,
        cost_limit: 4.0,
        scan_mode: "quick".to_string(),
        max_agents: 15,
        agent_wait_timeout_secs: 120,
    }
}

fn default_pro_profile() -> TierProfile {
    TierProfile {
        model: "openai/gpt-5.2".to_string(),
        max_iterations: 300,
        cost_limit: 150.0,
        scan_mode: "standard".to_string(),
        max_agents: 25,
        agent_wait_timeout_secs: 300,
    }
}

fn default_deep_profile() -> TierProfile {
    TierProfile {
        model: "openai/gpt-5.2".to_string(),
        max_iterations: 500,
        cost_limit: 600.0,
        scan_mode: "deep".to_string(),
        max_agents: 40,
        agent_wait_timeout_secs: 600,
    }
}

/// Submission and retention limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Free scans per identity per calendar month.
    #[serde(default = "default_monthly_scans")]
    pub scans_per_month: u32,

    /// Identities exempt from the monthly limit.
    #[serde(default)]
    pub unlimited_identities: Vec<String>,

    /// Days an unpaid result stays viewable.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            scans_per_month: default_monthly_scans(),
            unlimited_identities: Vec::new(),
            retention_days: default_retention_days(),
        }
    }
}

impl LimitsConfig {
    pub fn is_unlimited(&self, identity: &str) -> bool {
        self.unlimited_identities
            .iter()
            .any(|i| i.trim().eq_ignore_ascii_case(identity.trim()))
    }
}

fn default_monthly_scans() -> u32 {
    3
}

fn default_retention_days() -> i64 {
    30
}

/// Report extraction settings (OpenAI-compatible chat endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_url")]
    pub api_url: String,

    #[serde(default = "default_extraction_model")]
    pub model: String,

    /// Usually supplied by environment.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_extraction_temperature")]
    pub temperature: f32,

    #[serde(default = "default_extraction_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_url: default_extraction_url(),
            model: default_extraction_model(),
            api_key: None,
            temperature: default_extraction_temperature(),
            timeout_seconds: default_extraction_timeout(),
        }
    }
}

fn default_extraction_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_extraction_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_extraction_temperature() -> f32 {
    0.1
}

fn default_extraction_timeout() -> u64 {
    120
}

/// Notification delivery settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// JSON webhook endpoint. Notifications are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Scan state persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("nullscan-state.json")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Shared key for the admin listing. Admin access is disabled when unset.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge command-line overrides into this configuration.
    ///
    /// Only values the user actually supplied are applied.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref path) = args.state {
            self.storage.path = path.clone();
        }
        if let Some(ref key) = args.llm_api_key {
            self.engine.llm_api_key = Some(key.clone());
            if self.extraction.api_key.is_none() {
                self.extraction.api_key = Some(key.clone());
            }
        }
        if let Some(ref url) = args.webhook_url {
            self.notifications.webhook_url = Some(url.clone());
        }
        if let Some(ref key) = args.admin_key {
            self.admin.api_key = Some(key.clone());
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
