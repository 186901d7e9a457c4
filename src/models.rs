//! Data models for the scan lifecycle.
//!
//! This module contains the core data structures shared by the executor,
//! the stores and the disclosure layer: scan requests and their lifecycle,
//! tiers, findings, structured reports and progress snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a scan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Waiting in the queue.
    Pending,
    /// Picked up by the scheduler; the engine is running.
    Running,
    /// A cancel was requested while running; the worker has not yet torn down.
    Cancelling,
    /// Finished with results.
    Completed,
    /// Finished without results; see the stored failure cause.
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Cancelling => "cancelling",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    /// Statuses that imply a live engine run somewhere.
    pub fn is_active(&self) -> bool {
        matches!(self, ScanStatus::Running | ScanStatus::Cancelling)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Depth of a scan run. Selects the engine profile (model, iterations, budget).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanTier {
    #[default]
    Quick,
    Pro,
    Deep,
}

impl ScanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanTier::Quick => "quick",
            ScanTier::Pro => "pro",
            ScanTier::Deep => "deep",
        }
    }
}

impl fmt::Display for ScanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchased service level. Ordered by rank: `Unlock < Pro < Deep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaidTier {
    /// Unlocks the full report of an existing scan.
    Unlock,
    /// Unlock plus a pro-depth rescan.
    Pro,
    /// Unlock plus a deep rescan.
    Deep,
}

impl PaidTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaidTier::Unlock => "unlock",
            PaidTier::Pro => "pro",
            PaidTier::Deep => "deep",
        }
    }

    /// Rank on the paid scale. Unpaid scans have rank 0.
    pub fn rank(&self) -> u8 {
        match self {
            PaidTier::Unlock => 1,
            PaidTier::Pro => 2,
            PaidTier::Deep => 3,
        }
    }

    /// Rank of an optional tier, 0 when nothing has been paid.
    pub fn rank_of(tier: Option<PaidTier>) -> u8 {
        tier.map(|t| t.rank()).unwrap_or(0)
    }

    /// The rescan depth this purchase triggers, if any.
    pub fn rescan_tier(&self) -> Option<ScanTier> {
        match self {
            PaidTier::Unlock => None,
            PaidTier::Pro => Some(ScanTier::Pro),
            PaidTier::Deep => Some(ScanTier::Deep),
        }
    }
}

impl fmt::Display for PaidTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaidTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unlock" => Ok(PaidTier::Unlock),
            "pro" => Ok(PaidTier::Pro),
            "deep" => Ok(PaidTier::Deep),
            other => Err(format!("Invalid tier: {}", other)),
        }
    }
}

/// Severity level of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Informational observation
    Info,
    /// Low severity - hardening suggestions
    Low,
    /// Medium severity - exploitable with preconditions
    Medium,
    /// High severity - directly exploitable
    High,
    /// Critical severity - full compromise
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

impl Severity {
    /// Normalizes a free-form severity label by keyword containment.
    ///
    /// Returns `None` for an empty label or an explicit "none"; unrecognized
    /// non-empty labels default to `Medium`.
    pub fn normalize(raw: &str) -> Option<Severity> {
        let s = raw.trim().to_lowercase();
        if s.is_empty() || s == "none" {
            return None;
        }
        let level = if s.contains("critical") {
            Severity::Critical
        } else if s.contains("high") {
            Severity::High
        } else if s.contains("medium") {
            Severity::Medium
        } else if s.contains("low") {
            Severity::Low
        } else if s.contains("info") {
            Severity::Info
        } else {
            Severity::Medium
        };
        Some(level)
    }

    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Info => "🔵",
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        }
    }
}

/// Overall risk rating shown on a results page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
    Clean,
    Indeterminate,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Critical => "Critical",
            RiskLevel::High => "High",
            RiskLevel::Medium => "Medium",
            RiskLevel::Low => "Low",
            RiskLevel::Clean => "Clean",
            RiskLevel::Indeterminate => "Indeterminate",
        };
        f.write_str(s)
    }
}

/// One normalized, user-facing issue.
///
/// The optional fields are the paid details; the disclosure layer clears
/// them for unpaid viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    pub severity: Severity,
    pub endpoint: String,
    pub impact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owasp_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reproduction_steps: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_guidance: Option<String>,
}

/// Title and severity only, used for live progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingBrief {
    pub title: String,
    pub severity: String,
}

/// Summary of findings by severity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindingSummary {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl FindingSummary {
    /// Creates a summary from a list of findings.
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Self {
            total: findings.len(),
            ..Self::default()
        };

        for finding in findings {
            match finding.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
                Severity::Info => summary.info += 1,
            }
        }

        summary
    }
}

/// Coverage status of one attack category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryStatus {
    /// Fully tested, nothing found
    Tested,
    /// Limited or blocked
    Partial,
    /// Tested with issues found
    Findings,
    #[default]
    Skipped,
}

/// Quantitative facts about the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanStats {
    pub endpoints_discovered: u32,
    pub endpoints_tested: u32,
    pub subdomains_found: u32,
    pub requests_sent: u32,
    pub duration_minutes: u32,
    pub technologies_identified: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryResult {
    pub name: String,
    pub status: CategoryStatus,
    pub findings_count: u32,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaOfInterest {
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_area_severity")]
    pub severity: Severity,
    /// Always visible hook.
    #[serde(default)]
    pub teaser: String,
    #[serde(default)]
    pub technical_detail: String,
    #[serde(default)]
    pub affected_component: String,
    #[serde(default)]
    pub recommendation: String,
}

fn default_area_severity() -> Severity {
    Severity::Info
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// 0 is most urgent.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub effort: String,
    #[serde(default)]
    pub impact: String,
}

fn default_priority() -> u32 {
    99
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraint {
    pub description: String,
    pub impact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackSurface {
    pub subdomains: Vec<String>,
    pub key_routes: Vec<String>,
    pub technologies: Vec<String>,
    pub auth_mechanisms: Vec<String>,
    pub external_services: Vec<String>,
}

/// Structured report extracted from the engine's markdown report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredReport {
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub executive_summary_teaser: String,
    #[serde(default = "default_risk")]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub risk_rationale: String,
    #[serde(default)]
    pub scan_stats: ScanStats,
    #[serde(default)]
    pub categories_tested: Vec<CategoryResult>,
    #[serde(default)]
    pub attack_surface: AttackSurface,
    #[serde(default)]
    pub areas_of_interest: Vec<AreaOfInterest>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Upsell copy, shown to unpaid viewers only.
    #[serde(default)]
    pub deep_scan_value_prop: String,
    #[serde(default)]
    pub what_deep_scan_covers: Vec<String>,
}

fn default_risk() -> RiskLevel {
    RiskLevel::Indeterminate
}

impl StructuredReport {
    /// True when an extractor produced nothing usable.
    pub fn is_empty(&self) -> bool {
        self.executive_summary.trim().is_empty()
            && self.categories_tested.is_empty()
            && self.areas_of_interest.is_empty()
            && self.recommendations.is_empty()
    }
}

/// The stored outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanResults {
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_report: Option<StructuredReport>,
}

/// Coarse phase of a running scan, ordered from earliest to most advanced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    #[default]
    Init,
    Recon,
    Probe,
    Attack,
    Analyze,
}

/// Live status of one engine sub-agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Waiting,
    Completed,
    Failed,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl AgentStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, AgentStatus::Running | AgentStatus::Waiting)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAgent {
    pub label: String,
    pub description: String,
    pub status: AgentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub ts: String,
    pub description: String,
    pub status: String,
    /// Running line number across the whole run, not just the retained window.
    pub line: u64,
}

/// Point-in-time view of a running scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSnapshot {
    pub agents: usize,
    pub active_agents: usize,
    pub active_agent_list: Vec<ActiveAgent>,
    pub tools: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub vulnerabilities_found: usize,
    pub findings_so_far: Vec<FindingBrief>,
    pub recent_activity: Vec<ActivityEntry>,
    pub current_phase: ScanPhase,
}

/// Why a scan ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// The engine reported a failure on the final attempt.
    Engine { message: String },
    /// The run blew up outside the engine's own error reporting.
    Crashed { message: String },
    /// Cancelled on request.
    Cancelled,
    /// Found `running` at worker startup.
    Orphaned,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Engine { message } => write!(f, "engine failure: {}", message),
            FailureCause::Crashed { message } => write!(f, "crashed: {}", message),
            FailureCause::Cancelled => write!(f, "cancelled"),
            FailureCause::Orphaned => write!(f, "orphaned by worker restart"),
        }
    }
}

/// One user-submitted scan and everything recorded about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub id: Uuid,
    /// Requester identity (email).
    pub requester: String,
    pub target: String,
    pub tier: ScanTier,
    pub status: ScanStatus,
    #[serde(default)]
    pub paid_tier: Option<PaidTier>,
    #[serde(default)]
    pub payment_ref: Option<String>,
    /// Set on upgrade-spawned rescans.
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub results: Option<ScanResults>,
    #[serde(default)]
    pub progress: Option<ProgressSnapshot>,
    #[serde(default)]
    pub failure: Option<FailureCause>,
}

impl ScanRequest {
    /// Creates a new pending scan.
    pub fn new(requester: impl Into<String>, target: impl Into<String>, tier: ScanTier) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester: requester.into(),
            target: target.into(),
            tier,
            status: ScanStatus::Pending,
            paid_tier: None,
            payment_ref: None,
            parent_id: None,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            results: None,
            progress: None,
            failure: None,
        }
    }

    /// Creates a pending rescan spawned by an upgrade of `parent`.
    pub fn child_of(parent: &ScanRequest, tier: ScanTier) -> Self {
        let mut child = Self::new(parent.requester.clone(), parent.target.clone(), tier);
        child.parent_id = Some(parent.id);
        child
    }
}
