//! Fixed report used when extraction fails or returns nothing.

use crate::models::{
    AreaOfInterest, AttackSurface, CategoryResult, CategoryStatus, Constraint, Recommendation,
    RiskLevel, ScanStats, Severity, StructuredReport,
};

/// Categories listed as skipped in a fallback report.
pub const STANDARD_CATEGORIES: &[&str] = &[
    "SQL Injection",
    "Cross-Site Scripting (XSS)",
    "Authentication Bypass",
    "IDOR / Access Control",
    "SSRF",
    "Directory Traversal",
    "Security Headers",
];

pub const DEEP_SCAN_VALUE_PROP: &str = "A deep scan provides 1-4 hours of thorough testing across all \
vulnerability categories with detailed technical analysis.";

pub const DEEP_SCAN_COVERS: &[&str] = &[
    "Extended reconnaissance and enumeration",
    "Comprehensive authentication testing",
    "Full API endpoint analysis",
    "Business logic vulnerability testing",
    "Detailed remediation guidance",
];

/// Builds the fallback report for `target`, carrying `error` as the cause.
pub fn fallback_report(target: &str, error: &str) -> StructuredReport {
    StructuredReport {
        executive_summary: format!(
            "Security assessment of {} was completed. Please review the detailed findings below.",
            target
        ),
        executive_summary_teaser: format!("Security assessment of {} completed.", target),
        risk_level: RiskLevel::Indeterminate,
        risk_rationale: "Unable to fully process scan results. Manual review recommended."
            .to_string(),
        scan_stats: ScanStats::default(),
        categories_tested: STANDARD_CATEGORIES
            .iter()
            .map(|name| CategoryResult {
                name: name.to_string(),
                status: CategoryStatus::Skipped,
                findings_count: 0,
                note: None,
            })
            .collect(),
        attack_surface: AttackSurface::default(),
        areas_of_interest: vec![AreaOfInterest {
            title: "Report Processing Error".to_string(),
            severity: Severity::Info,
            teaser: "The scan completed but results could not be fully processed.".to_string(),
            technical_detail: format!("Error during report extraction: {}", error),
            affected_component: "Report generation".to_string(),
            recommendation: "Contact support or retry the scan.".to_string(),
        }],
        recommendations: vec![Recommendation {
            priority: 0,
            title: "Retry scan or contact support".to_string(),
            description: "The scan results could not be fully processed. Please retry or contact \
support for assistance."
                .to_string(),
            effort: "Low".to_string(),
            impact: "High".to_string(),
        }],
        constraints: vec![Constraint {
            description: "Report extraction failed".to_string(),
            impact: format!("Full results may not be displayed: {}", error),
        }],
        deep_scan_value_prop: DEEP_SCAN_VALUE_PROP.to_string(),
        what_deep_scan_covers: DEEP_SCAN_COVERS.iter().map(|s| s.to_string()).collect(),
    }
}
