//! Nullscan - scan-lifecycle orchestrator for autonomous web security scans.
//!
//! Accepts scan requests against web targets, drives an external
//! multi-agent scanning engine under per-tier cost and iteration budgets,
//! streams live progress, normalizes the engine's findings, extracts a
//! structured report, and serves results redacted by purchased tier.

pub mod billing;
pub mod cli;
pub mod config;
pub mod disclosure;
pub mod engine;
pub mod error;
pub mod findings;
pub mod models;
pub mod notify;
pub mod report;
pub mod run;
pub mod scheduler;
pub mod service;
pub mod store;
