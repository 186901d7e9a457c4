//! What a viewer may see of a completed scan.
//!
//! Everything here is pure: given the stored results and the paid tier
//! recorded on the scan, produce the redacted view. Unpaid viewers get
//! titles, severities, teasers and the coverage facts; any purchase
//! unlocks the full detail and hides the upsell copy.

use crate::models::{
    AreaOfInterest, AttackSurface, CategoryResult, Constraint, Finding, PaidTier, Recommendation,
    RiskLevel, ScanResults, ScanStats, Severity, StructuredReport,
};
use serde::{Deserialize, Serialize};

/// Length of the summary teaser derived when the report carries none.
const TEASER_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaOfInterestView {
    pub title: String,
    pub severity: Severity,
    pub teaser: String,
    pub affected_component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationView {
    pub priority: u32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
}

/// Structured report as shown to one viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportView {
    /// The teaser for unpaid viewers, the full summary otherwise.
    pub executive_summary: String,
    pub risk_level: RiskLevel,
    pub risk_rationale: String,
    pub scan_stats: ScanStats,
    pub categories_tested: Vec<CategoryResult>,
    pub attack_surface: AttackSurface,
    pub areas_of_interest: Vec<AreaOfInterestView>,
    pub recommendations: Vec<RecommendationView>,
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_scan_value_prop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what_deep_scan_covers: Option<Vec<String>>,
}

/// Findings and report after redaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisclosedResults {
    pub risk_level: RiskLevel,
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportView>,
}

/// Any purchase unlocks the full report.
pub fn is_paid(paid: Option<PaidTier>) -> bool {
    PaidTier::rank_of(paid) >= PaidTier::Unlock.rank()
}

/// A purchase is an upgrade only if it outranks what is already recorded.
pub fn is_upgrade(current: Option<PaidTier>, requested: PaidTier) -> bool {
    requested.rank() > PaidTier::rank_of(current)
}

/// Redacts `results` for a viewer who has paid `paid`.
pub fn disclose(results: &ScanResults, paid: Option<PaidTier>) -> DisclosedResults {
    let unlocked = is_paid(paid);
    DisclosedResults {
        risk_level: risk_level(&results.findings, results.structured_report.as_ref()),
        findings: results
            .findings
            .iter()
            .map(|f| disclose_finding(f, unlocked))
            .collect(),
        report: results
            .structured_report
            .as_ref()
            .map(|r| disclose_report(r, unlocked)),
    }
}

pub fn disclose_finding(finding: &Finding, unlocked: bool) -> Finding {
    if unlocked {
        return finding.clone();
    }
    Finding {
        owasp_category: None,
        reproduction_steps: None,
        poc: None,
        fix_guidance: None,
        ..finding.clone()
    }
}

pub fn disclose_report(report: &StructuredReport, unlocked: bool) -> ReportView {
    let gated = |value: &str| unlocked.then(|| value.to_string());

    let executive_summary = if unlocked {
        report.executive_summary.clone()
    } else {
        summary_teaser(report)
    };

    ReportView {
        executive_summary,
        risk_level: report.risk_level,
        risk_rationale: report.risk_rationale.clone(),
        scan_stats: report.scan_stats.clone(),
        categories_tested: report.categories_tested.clone(),
        attack_surface: report.attack_surface.clone(),
        areas_of_interest: report
            .areas_of_interest
            .iter()
            .map(|area: &AreaOfInterest| AreaOfInterestView {
                title: area.title.clone(),
                severity: area.severity,
                teaser: area.teaser.clone(),
                affected_component: area.affected_component.clone(),
                technical_detail: gated(area.technical_detail.as_str()),
                recommendation: gated(area.recommendation.as_str()),
            })
            .collect(),
        recommendations: report
            .recommendations
            .iter()
            .map(|rec: &Recommendation| RecommendationView {
                priority: rec.priority,
                title: rec.title.clone(),
                description: gated(rec.description.as_str()),
                effort: gated(rec.effort.as_str()),
                impact: gated(rec.impact.as_str()),
            })
            .collect(),
        constraints: report.constraints.clone(),
        deep_scan_value_prop: (!unlocked).then(|| report.deep_scan_value_prop.clone()),
        what_deep_scan_covers: (!unlocked).then(|| report.what_deep_scan_covers.clone()),
    }
}

/// The report's own teaser, else the first 200 characters of the summary.
fn summary_teaser(report: &StructuredReport) -> String {
    let teaser = report.executive_summary_teaser.trim();
    if !teaser.is_empty() {
        return teaser.to_string();
    }

    let summary = report.executive_summary.trim();
    if summary.chars().count() <= TEASER_CHARS {
        return summary.to_string();
    }
    let cut: String = summary.chars().take(TEASER_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// Risk from the report when there is one, else worst severity wins.
pub fn risk_level(findings: &[Finding], report: Option<&StructuredReport>) -> RiskLevel {
    if let Some(report) = report {
        return report.risk_level;
    }
    match findings.iter().map(|f| f.severity).max() {
        None => RiskLevel::Clean,
        Some(Severity::Critical) => RiskLevel::Critical,
        Some(Severity::High) => RiskLevel::High,
        Some(Severity::Medium) => RiskLevel::Medium,
        Some(Severity::Low) | Some(Severity::Info) => RiskLevel::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_finding(severity: Severity) -> Finding {
        Finding {
            title: "IDOR on invoices".to_string(),
            severity,
            endpoint: "/api/invoices/{id}".to_string(),
            impact: "Read other tenants' invoices".to_string(),
            owasp_category: Some("A01:2021".to_string()),
            reproduction_steps: Some("1. Log in as A\n2. Fetch B's id".to_string()),
            poc: Some("curl /api/invoices/2".to_string()),
            fix_guidance: Some("Check ownership".to_string()),
        }
    }

    fn report() -> StructuredReport {
        StructuredReport {
            executive_summary: "S".repeat(500),
            executive_summary_teaser: String::new(),
            risk_level: RiskLevel::High,
            risk_rationale: "Broken access control".to_string(),
            scan_stats: ScanStats {
                endpoints_tested: 12,
                ..ScanStats::default()
            },
            categories_tested: vec![CategoryResult {
                name: "IDOR / Access Control".to_string(),
                status: crate::models::CategoryStatus::Findings,
                findings_count: 1,
                note: None,
            }],
            attack_surface: AttackSurface::default(),
            areas_of_interest: vec![AreaOfInterest {
                title: "Session handling".to_string(),
                severity: Severity::Medium,
                teaser: "Cookies look loose".to_string(),
                technical_detail: "SameSite=None on session cookie".to_string(),
                affected_component: "auth".to_string(),
                recommendation: "Set SameSite=Lax".to_string(),
            }],
            recommendations: vec![Recommendation {
                priority: 1,
                title: "Enforce ownership checks".to_string(),
                description: "Every invoice read must verify tenant".to_string(),
                effort: "low".to_string(),
                impact: "high".to_string(),
            }],
            constraints: vec![Constraint {
                description: "WAF throttled requests".to_string(),
                impact: "Partial coverage".to_string(),
            }],
            deep_scan_value_prop: "Go deeper".to_string(),
            what_deep_scan_covers: vec!["Business logic".to_string()],
        }
    }

    fn results() -> ScanResults {
        ScanResults {
            findings: vec![full_finding(Severity::High)],
            structured_report: Some(report()),
        }
    }

    #[test]
    fn test_free_view_hides_gated_fields() {
        let view = disclose(&results(), None);
        let finding = &view.findings[0];
        assert_eq!(finding.endpoint, "/api/invoices/{id}");
        assert!(finding.owasp_category.is_none());
        assert!(finding.reproduction_steps.is_none());
        assert!(finding.poc.is_none());
        assert!(finding.fix_guidance.is_none());

        let report = view.report.unwrap();
        assert_eq!(report.executive_summary.chars().count(), 203);
        assert!(report.executive_summary.ends_with("..."));
        assert!(report.areas_of_interest[0].technical_detail.is_none());
        assert!(report.areas_of_interest[0].recommendation.is_none());
        assert_eq!(report.areas_of_interest[0].teaser, "Cookies look loose");
        assert_eq!(report.recommendations[0].title, "Enforce ownership checks");
        assert!(report.recommendations[0].description.is_none());
        assert!(report.recommendations[0].effort.is_none());
        assert!(report.recommendations[0].impact.is_none());
        assert_eq!(report.constraints.len(), 1);
        assert_eq!(report.scan_stats.endpoints_tested, 12);
        assert_eq!(report.deep_scan_value_prop.as_deref(), Some("Go deeper"));
    }

    #[test]
    fn test_every_paid_tier_unlocks_everything() {
        for tier in [PaidTier::Unlock, PaidTier::Pro, PaidTier::Deep] {
            let view = disclose(&results(), Some(tier));
            assert_eq!(view.findings[0], full_finding(Severity::High));

            let report = view.report.unwrap();
            assert_eq!(report.executive_summary.len(), 500);
            assert_eq!(
                report.areas_of_interest[0].technical_detail.as_deref(),
                Some("SameSite=None on session cookie")
            );
            assert_eq!(report.recommendations[0].effort.as_deref(), Some("low"));
            assert!(report.deep_scan_value_prop.is_none());
            assert!(report.what_deep_scan_covers.is_none());
        }
    }

    #[test]
    fn test_report_teaser_preferred() {
        let mut r = report();
        r.executive_summary_teaser = "Two issues need attention.".to_string();
        let view = disclose_report(&r, false);
        assert_eq!(view.executive_summary, "Two issues need attention.");
    }

    #[test]
    fn test_risk_level_from_findings() {
        assert_eq!(risk_level(&[], None), RiskLevel::Clean);
        assert_eq!(
            risk_level(&[full_finding(Severity::Low), full_finding(Severity::Critical)], None),
            RiskLevel::Critical
        );
        assert_eq!(risk_level(&[full_finding(Severity::Info)], None), RiskLevel::Low);
        assert_eq!(
            risk_level(&[full_finding(Severity::Critical)], Some(&report())),
            RiskLevel::High
        );
    }

    #[test]
    fn test_upgrade_rank() {
        assert!(is_upgrade(None, PaidTier::Unlock));
        assert!(is_upgrade(Some(PaidTier::Unlock), PaidTier::Pro));
        assert!(!is_upgrade(Some(PaidTier::Pro), PaidTier::Unlock));
        assert!(!is_upgrade(Some(PaidTier::Deep), PaidTier::Deep));
        assert!(!is_paid(None));
        assert!(is_paid(Some(PaidTier::Unlock)));
    }
}
