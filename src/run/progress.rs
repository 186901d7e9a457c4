//! Building progress snapshots from raw telemetry.
//!
//! Telemetry counters can glitch backwards; every counter shown to users
//! is clamped to its maximum observed value, and the phase never moves
//! back either.

use crate::engine::{LlmTotals, Telemetry, ToolExecution};
use crate::models::{ActiveAgent, ActivityEntry, FindingBrief, ProgressSnapshot, ScanPhase};
use crate::run::activity::{agent_label, agent_thought, describe_action, detect_phase, SKIPPED_TOOLS};
use std::collections::HashMap;

/// Running maxima of the usage counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MonotonicCounters {
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl MonotonicCounters {
    /// Folds in a new observation and returns the clamped values.
    pub fn observe(&mut self, totals: &LlmTotals) -> MonotonicCounters {
        if totals.cost.is_finite() && totals.cost > self.cost {
            self.cost = totals.cost;
        }
        self.input_tokens = self.input_tokens.max(totals.input_tokens);
        self.output_tokens = self.output_tokens.max(totals.output_tokens);
        *self
    }
}

/// Turns telemetry into snapshots for one run.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    activity_cap: usize,
    counters: MonotonicCounters,
    phase: ScanPhase,
    tools: u64,
    agents: usize,
    vulnerabilities: usize,
}

impl ProgressAggregator {
    pub fn new(activity_cap: usize) -> Self {
        Self {
            activity_cap: activity_cap.max(1),
            counters: MonotonicCounters::default(),
            phase: ScanPhase::Init,
            tools: 0,
            agents: 0,
            vulnerabilities: 0,
        }
    }

    /// Current clamped counters.
    pub fn counters(&self) -> MonotonicCounters {
        self.counters
    }

    /// Folds telemetry into the running maxima without building a snapshot.
    pub fn observe(&mut self, telemetry: &Telemetry) -> MonotonicCounters {
        self.counters.observe(&telemetry.totals)
    }

    /// Builds a snapshot from telemetry.
    pub fn snapshot(&mut self, telemetry: &Telemetry) -> ProgressSnapshot {
        let counters = self.observe(telemetry);

        let vulnerabilities_found = telemetry.vulnerabilities.len();
        self.vulnerabilities = self.vulnerabilities.max(vulnerabilities_found);
        self.tools = self.tools.max(telemetry.tool_count);
        self.agents = self.agents.max(telemetry.agents.len());
        self.phase = self
            .phase
            .max(detect_phase(&telemetry.tool_executions, self.vulnerabilities));

        let executions: HashMap<u64, &ToolExecution> =
            telemetry.tool_executions.iter().map(|e| (e.id, e)).collect();

        let active_agent_list: Vec<ActiveAgent> = telemetry
            .agents
            .iter()
            .filter(|a| a.status.is_active())
            .enumerate()
            .map(|(index, agent)| {
                let last_call = agent
                    .tool_executions
                    .last()
                    .and_then(|id| executions.get(id))
                    .map(|e| (e.tool_name.as_str(), &e.args));
                ActiveAgent {
                    label: agent_label(&agent.task, index),
                    description: agent_thought(last_call, &agent.task),
                    status: agent.status,
                }
            })
            .collect();

        ProgressSnapshot {
            agents: self.agents,
            active_agents: active_agent_list.len(),
            active_agent_list,
            tools: self.tools,
            input_tokens: counters.input_tokens,
            output_tokens: counters.output_tokens,
            cost: counters.cost,
            vulnerabilities_found: self.vulnerabilities,
            findings_so_far: telemetry
                .vulnerabilities
                .iter()
                .map(|v| FindingBrief {
                    title: v.title.clone(),
                    severity: v.severity.clone(),
                })
                .collect(),
            recent_activity: self.activity(&telemetry.tool_executions),
            current_phase: self.phase,
        }
    }

    /// Snapshot of a run that has ended: nothing is active any more.
    pub fn finalize(&self, mut snapshot: ProgressSnapshot) -> ProgressSnapshot {
        snapshot.active_agents = 0;
        snapshot.active_agent_list.clear();
        snapshot.cost = snapshot.cost.max(self.counters.cost);
        snapshot.input_tokens = snapshot.input_tokens.max(self.counters.input_tokens);
        snapshot.output_tokens = snapshot.output_tokens.max(self.counters.output_tokens);
        snapshot.tools = snapshot.tools.max(self.tools);
        snapshot.current_phase = snapshot.current_phase.max(self.phase);
        snapshot
    }

    /// Snapshot from counters alone, for runs without readable telemetry.
    pub fn counters_only(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            agents: self.agents,
            tools: self.tools,
            input_tokens: self.counters.input_tokens,
            output_tokens: self.counters.output_tokens,
            cost: self.counters.cost,
            vulnerabilities_found: self.vulnerabilities,
            current_phase: self.phase,
            ..ProgressSnapshot::default()
        }
    }

    fn activity(&self, executions: &[ToolExecution]) -> Vec<ActivityEntry> {
        let mut entries: Vec<(&str, ActivityEntry)> = executions
            .iter()
            .filter(|e| !SKIPPED_TOOLS.contains(&e.tool_name.as_str()))
            .map(|e| {
                let status = if e.status.is_empty() {
                    "running".to_string()
                } else {
                    e.status.clone()
                };
                (
                    e.started_at.as_str(),
                    ActivityEntry {
                        ts: e.started_at.clone(),
                        description: describe_action(&e.tool_name, &e.args),
                        status,
                        line: 0,
                    },
                )
            })
            .collect();

        entries.sort_by(|a, b| a.0.cmp(b.0));

        let total = entries.len();
        let skip = total.saturating_sub(self.activity_cap);
        entries
            .into_iter()
            .skip(skip)
            .enumerate()
            .map(|(i, (_, mut entry))| {
                entry.line = (skip + i + 1) as u64;
                entry
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AgentRecord, ReportedVulnerability};
    use crate::models::AgentStatus;
    use serde_json::json;

    fn exec(id: u64, tool: &str, args: serde_json::Value, ts: &str) -> ToolExecution {
        ToolExecution {
            id,
            tool_name: tool.to_string(),
            args,
            started_at: ts.to_string(),
            status: "completed".to_string(),
        }
    }

    fn with_cost(cost: f64, input: u64) -> Telemetry {
        Telemetry {
            totals: LlmTotals {
                cost,
                input_tokens: input,
                output_tokens: 0,
            },
            ..Telemetry::default()
        }
    }

    #[test]
    fn test_cost_never_decreases() {
        let mut agg = ProgressAggregator::new(100);
        let shown: Vec<f64> = [1.0, 2.5, 2.0, 4.2]
            .iter()
            .map(|&c| agg.snapshot(&with_cost(c, 0)).cost)
            .collect();
        assert_eq!(shown, vec![1.0, 2.5, 2.5, 4.2]);
    }

    #[test]
    fn test_tokens_never_decrease() {
        let mut agg = ProgressAggregator::new(100);
        assert_eq!(agg.snapshot(&with_cost(0.0, 500)).input_tokens, 500);
        assert_eq!(agg.snapshot(&with_cost(0.0, 120)).input_tokens, 500);
    }

    #[test]
    fn test_active_agents_and_labels() {
        let telemetry = Telemetry {
            agents: vec![
                AgentRecord {
                    id: "root".into(),
                    task: "Coordinate the assessment".into(),
                    status: AgentStatus::Running,
                    tool_executions: vec![1],
                },
                AgentRecord {
                    id: "a2".into(),
                    task: "Enumerate subdomains".into(),
                    status: AgentStatus::Completed,
                    tool_executions: vec![],
                },
                AgentRecord {
                    id: "a3".into(),
                    task: "Probe SQL injection in search".into(),
                    status: AgentStatus::Waiting,
                    tool_executions: vec![],
                },
            ],
            tool_executions: vec![exec(1, "terminal_execute", json!({"command": "nmap x"}), "t1")],
            ..Telemetry::default()
        };

        let snap = ProgressAggregator::new(100).snapshot(&telemetry);
        assert_eq!(snap.agents, 3);
        assert_eq!(snap.active_agents, 2);
        assert_eq!(snap.active_agent_list[0].label, "Agent Alpha");
        assert_eq!(snap.active_agent_list[0].description, "Scanning for open ports and services...");
        assert_eq!(snap.active_agent_list[1].label, "SQLi Scanner");
        assert_eq!(snap.active_agent_list[1].description, "Probe SQL injection in search");
    }

    #[test]
    fn test_activity_sorted_capped_and_numbered() {
        let mut executions = vec![exec(0, "think", json!({}), "0000")];
        for i in 0..5u64 {
            // Reverse chronological input.
            executions.push(exec(i + 1, "python_action", json!({}), &format!("t{}", 9 - i)));
        }
        let telemetry = Telemetry {
            tool_executions: executions,
            ..Telemetry::default()
        };

        let snap = ProgressAggregator::new(3).snapshot(&telemetry);
        let lines: Vec<u64> = snap.recent_activity.iter().map(|e| e.line).collect();
        let stamps: Vec<&str> = snap.recent_activity.iter().map(|e| e.ts.as_str()).collect();
        assert_eq!(lines, vec![3, 4, 5]);
        assert_eq!(stamps, vec!["t7", "t8", "t9"]);
        assert_eq!(snap.recent_activity[0].description, "[ANALYZE] Running analysis script");
    }

    #[test]
    fn test_phase_and_findings() {
        let mut agg = ProgressAggregator::new(100);
        let attack = Telemetry {
            tool_executions: vec![exec(1, "terminal_execute", json!({"command": "sqlmap -u x"}), "t")],
            ..Telemetry::default()
        };
        assert_eq!(agg.snapshot(&attack).current_phase, ScanPhase::Attack);

        // A later frame with less history does not move the phase back.
        assert_eq!(agg.snapshot(&Telemetry::default()).current_phase, ScanPhase::Attack);

        let found = Telemetry {
            vulnerabilities: vec![ReportedVulnerability {
                title: "SQLi".into(),
                severity: "high".into(),
                ..ReportedVulnerability::default()
            }],
            ..Telemetry::default()
        };
        let snap = agg.snapshot(&found);
        assert_eq!(snap.current_phase, ScanPhase::Analyze);
        assert_eq!(snap.vulnerabilities_found, 1);
        assert_eq!(snap.findings_so_far[0].title, "SQLi");
    }

    #[test]
    fn test_finalize_clears_active_agents() {
        let mut agg = ProgressAggregator::new(100);
        let mut telemetry = with_cost(3.0, 10);
        telemetry.agents.push(AgentRecord {
            id: "root".into(),
            task: String::new(),
            status: AgentStatus::Running,
            tool_executions: vec![],
        });
        let snap = agg.snapshot(&telemetry);
        assert_eq!(snap.active_agents, 1);

        let last = agg.snapshot(&with_cost(1.0, 0));
        let final_snap = agg.finalize(last);
        assert_eq!(final_snap.active_agents, 0);
        assert!(final_snap.active_agent_list.is_empty());
        assert_eq!(final_snap.cost, 3.0);
        assert_eq!(final_snap.agents, 1);
    }
}
