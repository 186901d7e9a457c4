//! Markdown and JSON rendering of a disclosed results view.
//!
//! Rendering works on the already-redacted view, so whatever it prints is
//! exactly what the viewer is entitled to.

use crate::disclosure::ReportView;
use crate::models::{CategoryStatus, Finding, FindingSummary, Severity};
use crate::service::{Availability, ResultsView};
use anyhow::Result;

/// Generate the Markdown rendering of a results view.
pub fn generate_markdown_results(view: &ResultsView) -> String {
    let mut output = String::new();

    output.push_str("# Nullscan Results\n\n");
    output.push_str(&generate_metadata_section(view));

    if view.availability == Availability::Expired {
        output.push_str("## Expired\n\n");
        output.push_str(
            "These results are past their retention window. Unlock the report to keep access.\n\n",
        );
        output.push_str(&generate_footer());
        return output;
    }

    output.push_str(&generate_summary_section(&view.summary));

    if let Some(ref report) = view.report {
        output.push_str(&generate_report_sections(report));
    }

    output.push_str(&generate_findings_section(&view.findings));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(view: &ResultsView) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Scan:** `{}`\n", view.scan_id));
    section.push_str(&format!("- **Target:** {}\n", view.target));
    section.push_str(&format!("- **Scan Type:** {}\n", view.scan_type));
    if let Some(completed) = view.completed_at {
        section.push_str(&format!(
            "- **Completed:** {}\n",
            completed.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    match view.paid_tier {
        Some(tier) => section.push_str(&format!("- **Access:** {}\n", tier)),
        None => section.push_str("- **Access:** free\n"),
    }
    if let Some(expires) = view.expires_at {
        section.push_str(&format!("- **Expires:** {}\n", expires.format("%Y-%m-%d")));
    }
    section.push_str(&format!("- **Risk Level:** {}\n", view.risk_level));
    section.push('\n');

    section
}

fn generate_summary_section(summary: &FindingSummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str(&format!(
        "| {} Critical | {} High | {} Medium | {} Low | {} Info | **Total** |\n",
        Severity::Critical.emoji(),
        Severity::High.emoji(),
        Severity::Medium.emoji(),
        Severity::Low.emoji(),
        Severity::Info.emoji(),
    ));
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | **{}** |\n\n",
        summary.critical, summary.high, summary.medium, summary.low, summary.info, summary.total
    ));

    section
}

fn generate_report_sections(report: &ReportView) -> String {
    let mut section = String::new();

    section.push_str("## Executive Summary\n\n");
    section.push_str(&report.executive_summary);
    section.push_str("\n\n");
    if !report.risk_rationale.is_empty() {
        section.push_str(&format!("*{}*\n\n", report.risk_rationale));
    }

    if !report.categories_tested.is_empty() {
        section.push_str("### Coverage\n\n");
        section.push_str("| Category | Status | Findings |\n");
        section.push_str("|:---|:---:|:---:|\n");
        for category in &report.categories_tested {
            let status = match category.status {
                CategoryStatus::Tested => "tested",
                CategoryStatus::Partial => "partial",
                CategoryStatus::Findings => "findings",
                CategoryStatus::Skipped => "skipped",
            };
            section.push_str(&format!(
                "| {} | {} | {} |\n",
                category.name, status, category.findings_count
            ));
        }
        section.push('\n');
    }

    if !report.areas_of_interest.is_empty() {
        section.push_str("### Areas of Interest\n\n");
        for area in &report.areas_of_interest {
            section.push_str(&format!(
                "#### {} {} ({})\n\n{}\n\n",
                area.severity.emoji(),
                area.title,
                area.affected_component,
                area.teaser
            ));
            if let Some(ref detail) = area.technical_detail {
                section.push_str(&format!("{}\n\n", detail));
            }
            if let Some(ref rec) = area.recommendation {
                section.push_str(&format!("> **Recommendation:** {}\n\n", rec));
            }
        }
    }

    if !report.recommendations.is_empty() {
        section.push_str("### Recommendations\n\n");
        let mut recs = report.recommendations.clone();
        recs.sort_by_key(|r| r.priority);
        for (i, rec) in recs.iter().enumerate() {
            match rec.description {
                Some(ref description) => {
                    section.push_str(&format!("{}. **{}** - {}\n", i + 1, rec.title, description))
                }
                None => section.push_str(&format!("{}. **{}**\n", i + 1, rec.title)),
            }
        }
        section.push('\n');
    }

    if !report.constraints.is_empty() {
        section.push_str("### Constraints\n\n");
        for constraint in &report.constraints {
            section.push_str(&format!("- {}: {}\n", constraint.description, constraint.impact));
        }
        section.push('\n');
    }

    if let Some(ref prop) = report.deep_scan_value_prop {
        section.push_str("### Go Deeper\n\n");
        section.push_str(prop);
        section.push_str("\n\n");
        for item in report.what_deep_scan_covers.iter().flatten() {
            section.push_str(&format!("- {}\n", item));
        }
        section.push('\n');
    }

    section
}

fn generate_findings_section(findings: &[Finding]) -> String {
    let mut section = String::new();

    section.push_str("## Findings\n\n");
    if findings.is_empty() {
        section.push_str("No vulnerabilities were reported for this target.\n\n");
        return section;
    }

    let mut sorted: Vec<&Finding> = findings.iter().collect();
    sorted.sort_by(|a, b| b.severity.cmp(&a.severity));

    for finding in sorted {
        section.push_str(&generate_finding_block(finding));
    }

    section
}

fn generate_finding_block(finding: &Finding) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "### {} **{}** - {}\n\n",
        finding.severity.emoji(),
        finding.severity.to_string().to_uppercase(),
        finding.title
    ));

    if !finding.endpoint.is_empty() {
        block.push_str(&format!("**Endpoint:** `{}`\n\n", finding.endpoint));
    }
    if !finding.impact.is_empty() {
        block.push_str(&format!("**Impact:** {}\n\n", finding.impact));
    }
    if let Some(ref owasp) = finding.owasp_category {
        block.push_str(&format!("**OWASP:** {}\n\n", owasp));
    }
    if let Some(ref steps) = finding.reproduction_steps {
        block.push_str(&format!("**Reproduction:**\n\n{}\n\n", steps));
    }
    if let Some(ref poc) = finding.poc {
        block.push_str("<details>\n<summary>Proof of Concept</summary>\n\n```\n");
        block.push_str(poc);
        block.push_str("\n```\n</details>\n\n");
    }
    if let Some(ref fix) = finding.fix_guidance {
        block.push_str(&format!("> **Fix:** {}\n\n", fix));
    }

    block.push_str("---\n\n");

    block
}

fn generate_footer() -> String {
    "---\n\n*Generated by nullscan*\n".to_string()
}

/// Generate a JSON rendering of a results view.
pub fn generate_json_results(view: &ResultsView) -> Result<String> {
    serde_json::to_string_pretty(view).map_err(Into::into)
}
