//! Turns engine artifacts into the final list of findings.
//!
//! Two sources feed the result: files in the run directory
//! (`vulnerabilities.csv` plus `vulnerabilities/*.md`) and vulnerabilities
//! the engine reported live through telemetry. They are merged by
//! case-insensitive title, filtered for non-findings, and guarded by a
//! safety net so that live reports are never silently lost.

use crate::engine::ReportedVulnerability;
use crate::findings::index::{parse_index, IndexRow};
use crate::findings::markdown::{parse_document, ParsedDocument};
use crate::models::{Finding, Severity};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Titles that usually describe the scan itself rather than an issue.
pub const NON_FINDING_TITLES: &[&str] = &[
    "no vulnerabilities",
    "no issues",
    "scan complete",
    "scan summary",
    "no findings",
    "clean",
];

/// Detail values that carry no information.
const EMPTY_DETAIL_VALUES: &[&str] = &["n/a", "none", "no"];

/// A finding before filtering. `severity` is `None` for explicit "none".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidate {
    pub title: String,
    pub severity: Option<Severity>,
    pub endpoint: String,
    pub impact: String,
    pub reproduction_steps: String,
    pub poc: String,
    pub fix_guidance: String,
    pub owasp_category: String,
}

impl Candidate {
    /// Builds a candidate from a live engine report.
    pub fn from_reported(v: &ReportedVulnerability) -> Self {
        let severity_label = if v.severity.trim().is_empty() {
            "medium"
        } else {
            v.severity.as_str()
        };
        Self {
            title: non_empty_or(&v.title, "Unknown"),
            severity: Severity::normalize(severity_label),
            endpoint: v.endpoint.trim().to_string(),
            impact: non_empty_or(&v.impact, v.description.trim()),
            reproduction_steps: v.technical_analysis.trim().to_string(),
            poc: non_empty_or(&v.poc_script_code, v.poc_description.trim()),
            fix_guidance: v.remediation_steps.trim().to_string(),
            owasp_category: v.owasp_category.trim().to_string(),
        }
    }

    /// Overlays every non-empty field of `other` onto `self`.
    fn overlay(&mut self, other: Candidate) {
        fn take(slot: &mut String, value: String) {
            if !value.is_empty() {
                *slot = value;
            }
        }
        if other.severity.is_some() {
            self.severity = other.severity;
        }
        take(&mut self.endpoint, other.endpoint);
        take(&mut self.impact, other.impact);
        take(&mut self.reproduction_steps, other.reproduction_steps);
        take(&mut self.poc, other.poc);
        take(&mut self.fix_guidance, other.fix_guidance);
        take(&mut self.owasp_category, other.owasp_category);
    }

    fn has_substantive_detail(&self) -> bool {
        [&self.impact, &self.reproduction_steps, &self.poc]
            .iter()
            .any(|value| is_substantive(value))
    }

    /// Whether this candidate describes a real issue.
    pub fn is_real_finding(&self) -> bool {
        if self.severity.is_none() {
            return false;
        }

        let title = self.title.to_lowercase();
        if NON_FINDING_TITLES.iter().any(|p| title.contains(p)) {
            return self.has_substantive_detail();
        }

        if self.title.chars().count() > 3 {
            return true;
        }

        self.has_substantive_detail()
    }

    /// Converts into a stored finding. A missing severity becomes `Info`.
    pub fn into_finding(self) -> Finding {
        Finding {
            title: self.title,
            severity: self.severity.unwrap_or(Severity::Info),
            endpoint: self.endpoint,
            impact: self.impact,
            owasp_category: optional(self.owasp_category),
            reproduction_steps: optional(self.reproduction_steps),
            poc: optional(self.poc),
            fix_guidance: optional(self.fix_guidance),
        }
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn optional(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn is_substantive(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && !EMPTY_DETAIL_VALUES.contains(&value.to_lowercase().as_str())
}

/// Candidates recovered from a run directory.
#[derive(Debug, Clone, Default)]
pub struct RunArtifacts {
    pub candidates: Vec<Candidate>,
    /// `(document, heading)` pairs the markdown parser could not map.
    pub unmapped_sections: Vec<(String, String)>,
}

/// Reads findings from a run directory.
///
/// Uses the CSV index when present, falling back to every markdown file
/// under `vulnerabilities/` sorted by name. Never fails: unreadable files
/// are logged and skipped.
pub fn read_run_dir(run_dir: &Path) -> RunArtifacts {
    let mut artifacts = RunArtifacts::default();
    let docs_dir = run_dir.join("vulnerabilities");
    let index_path = run_dir.join("vulnerabilities.csv");

    match std::fs::read_to_string(&index_path) {
        Ok(text) => {
            for row in parse_index(&text) {
                let candidate = candidate_from_row(&row, &docs_dir, &mut artifacts);
                artifacts.candidates.push(candidate);
            }
        }
        Err(_) if docs_dir.is_dir() => {
            debug!("No index in {}, reading documents directly", run_dir.display());
            for entry in WalkDir::new(&docs_dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                let Some(content) = read_document(path) else {
                    continue;
                };
                let name = file_name(path);
                let doc = parse_document(&content);
                record_unmapped(&mut artifacts, &name, &doc);
                let mut candidate = Candidate {
                    title: stem_title(path),
                    severity: Some(Severity::Medium),
                    ..Candidate::default()
                };
                apply_document(&mut candidate, doc);
                artifacts.candidates.push(candidate);
            }
        }
        Err(_) => debug!("No vulnerability artifacts in {}", run_dir.display()),
    }

    artifacts
}

fn candidate_from_row(row: &IndexRow, docs_dir: &Path, artifacts: &mut RunArtifacts) -> Candidate {
    let mut candidate = Candidate {
        title: non_empty_or(row.title(), "Unknown"),
        severity: Severity::normalize(if row.severity().is_empty() {
            "medium"
        } else {
            row.severity()
        }),
        ..Candidate::default()
    };

    if let Some(name) = row.document_name() {
        let path = docs_dir.join(&name);
        if path.is_file() {
            if let Some(content) = read_document(&path) {
                let doc = parse_document(&content);
                record_unmapped(artifacts, &name, &doc);
                apply_document(&mut candidate, doc);
            }
        }
    }

    candidate
}

fn apply_document(candidate: &mut Candidate, doc: ParsedDocument) {
    if let Some(title) = doc.title {
        candidate.title = title;
    }
    if let Some(severity) = doc.severity {
        candidate.severity = Severity::normalize(&severity);
    }
    let fields = [
        (&mut candidate.endpoint, doc.endpoint),
        (&mut candidate.impact, doc.impact),
        (&mut candidate.reproduction_steps, doc.reproduction),
        (&mut candidate.poc, doc.poc),
        (&mut candidate.fix_guidance, doc.fix),
        (&mut candidate.owasp_category, doc.owasp),
    ];
    for (slot, value) in fields {
        if let Some(value) = value {
            *slot = value;
        }
    }
}

fn record_unmapped(artifacts: &mut RunArtifacts, name: &str, doc: &ParsedDocument) {
    for heading in &doc.unmapped_sections {
        debug!("Unmapped section '{}' in {}", heading, name);
        artifacts.unmapped_sections.push((name.to_string(), heading.clone()));
    }
}

fn read_document(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `vuln-0001_sql_injection.md` becomes `Vuln 0001 Sql Injection`.
fn stem_title(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Merges file candidates with live reports by case-insensitive title.
///
/// A live report matching a file finding overlays its non-empty fields
/// onto it in place; unmatched live reports are appended in order.
pub fn merge(file_candidates: Vec<Candidate>, reported: &[ReportedVulnerability]) -> Vec<Candidate> {
    let mut merged = file_candidates;
    let mut by_title: HashMap<String, usize> = HashMap::new();
    for (i, candidate) in merged.iter().enumerate() {
        by_title.entry(candidate.title.to_lowercase()).or_insert(i);
    }

    for vuln in reported {
        let candidate = Candidate::from_reported(vuln);
        let key = candidate.title.to_lowercase();
        match by_title.get(&key) {
            Some(&i) => merged[i].overlay(candidate),
            None => {
                by_title.insert(key, merged.len());
                merged.push(candidate);
            }
        }
    }

    merged
}

/// Full normalization: read, merge, filter, then apply the safety net.
///
/// Deterministic for fixed inputs.
pub fn normalize_findings(run_dir: Option<&Path>, reported: &[ReportedVulnerability]) -> Vec<Finding> {
    let file_candidates = run_dir
        .map(|dir| read_run_dir(dir).candidates)
        .unwrap_or_default();
    let file_count = file_candidates.len();

    let merged = merge(file_candidates, reported);
    let merged_count = merged.len();
    let kept: Vec<Finding> = merged
        .into_iter()
        .filter(Candidate::is_real_finding)
        .map(Candidate::into_finding)
        .collect();

    debug!(
        "Normalized findings: {} from files, {} reported live, {} merged, {} kept",
        file_count,
        reported.len(),
        merged_count,
        kept.len()
    );

    if kept.is_empty() && !reported.is_empty() {
        warn!(
            "Filtering dropped all {} reported vulnerabilities, keeping them unfiltered",
            reported.len()
        );
        return reported
            .iter()
            .map(|v| Candidate::from_reported(v).into_finding())
            .collect();
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn reported(title: &str, severity: &str) -> ReportedVulnerability {
        ReportedVulnerability {
            title: title.to_string(),
            severity: severity.to_string(),
            ..ReportedVulnerability::default()
        }
    }

    fn write_run_dir(index: Option<&str>, docs: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        if let Some(index) = index {
            fs::write(dir.path().join("vulnerabilities.csv"), index).unwrap();
        }
        if !docs.is_empty() {
            fs::create_dir(dir.path().join("vulnerabilities")).unwrap();
            for (name, content) in docs {
                fs::write(dir.path().join("vulnerabilities").join(name), content).unwrap();
            }
        }
        dir
    }

    #[test]
    fn test_index_and_documents() {
        let dir = write_run_dir(
            Some("id,title,severity\nvuln-0001,Login SQLi,high\nvuln-0002,Verbose errors,low\n"),
            &[(
                "vuln-0001.md",
                "# SQL Injection in Login\n## Severity\nCritical\n## Impact\nFull database read\n## Custom Notes\nx\n",
            )],
        );

        let artifacts = read_run_dir(dir.path());
        assert_eq!(artifacts.candidates.len(), 2);
        assert_eq!(artifacts.candidates[0].title, "SQL Injection in Login");
        assert_eq!(artifacts.candidates[0].severity, Some(Severity::Critical));
        assert_eq!(artifacts.candidates[0].impact, "Full database read");
        assert_eq!(artifacts.candidates[1].title, "Verbose errors");
        assert_eq!(artifacts.candidates[1].severity, Some(Severity::Low));
        assert_eq!(
            artifacts.unmapped_sections,
            vec![("vuln-0001.md".to_string(), "Custom Notes".to_string())]
        );
    }

    #[test]
    fn test_documents_without_index() {
        let dir = write_run_dir(
            None,
            &[
                ("b_open_redirect.md", "## Impact\nPhishing\n"),
                ("a-idor.md", "# IDOR on invoices\n"),
                ("notes.txt", "ignored"),
            ],
        );

        let artifacts = read_run_dir(dir.path());
        let titles: Vec<&str> = artifacts.candidates.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["IDOR on invoices", "B Open Redirect"]);
        assert_eq!(artifacts.candidates[1].impact, "Phishing");
    }

    #[test]
    fn test_missing_run_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(read_run_dir(&dir.path().join("nope")).candidates.is_empty());
    }

    #[test]
    fn test_merge_reported_wins_and_keeps_position() {
        let files = vec![
            Candidate {
                title: "Stored XSS".into(),
                severity: Some(Severity::Medium),
                impact: "Session theft".into(),
                ..Candidate::default()
            },
            Candidate {
                title: "CSRF".into(),
                severity: Some(Severity::Low),
                ..Candidate::default()
            },
        ];
        let mut live = reported("stored xss", "high");
        live.poc_description = "<script>alert(1)</script>".into();
        let live_new = reported("Exposed .git directory", "medium");

        let merged = merge(files, &[live, live_new]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].title, "Stored XSS");
        assert_eq!(merged[0].severity, Some(Severity::High));
        assert_eq!(merged[0].impact, "Session theft");
        assert_eq!(merged[0].poc, "<script>alert(1)</script>");
        assert_eq!(merged[2].title, "Exposed .git directory");
    }

    #[test]
    fn test_reported_field_fallbacks() {
        let v = ReportedVulnerability {
            title: String::new(),
            severity: String::new(),
            description: "desc".into(),
            technical_analysis: "steps".into(),
            poc_script_code: "import requests".into(),
            poc_description: "ignored".into(),
            remediation_steps: "patch".into(),
            ..ReportedVulnerability::default()
        };
        let c = Candidate::from_reported(&v);
        assert_eq!(c.title, "Unknown");
        assert_eq!(c.severity, Some(Severity::Medium));
        assert_eq!(c.impact, "desc");
        assert_eq!(c.reproduction_steps, "steps");
        assert_eq!(c.poc, "import requests");
        assert_eq!(c.fix_guidance, "patch");
    }

    #[test]
    fn test_filter_rules() {
        let base = Candidate {
            title: "Scan Summary".into(),
            severity: Some(Severity::Low),
            ..Candidate::default()
        };
        assert!(!base.is_real_finding());

        let mut with_detail = base.clone();
        with_detail.impact = "Admin panel exposed".into();
        assert!(with_detail.is_real_finding());

        let mut placeholder = base.clone();
        placeholder.impact = "N/A".into();
        placeholder.poc = "none".into();
        assert!(!placeholder.is_real_finding());

        let none_severity = Candidate {
            title: "Weak TLS ciphers".into(),
            severity: None,
            ..Candidate::default()
        };
        assert!(!none_severity.is_real_finding());

        let short = Candidate {
            title: "XSS".into(),
            severity: Some(Severity::High),
            ..Candidate::default()
        };
        assert!(!short.is_real_finding());

        let long = Candidate {
            title: "Open redirect".into(),
            severity: Some(Severity::Medium),
            ..Candidate::default()
        };
        assert!(long.is_real_finding());
    }

    #[test]
    fn test_safety_net_keeps_reported() {
        let live = vec![reported("No vulnerabilities found", "info")];
        let findings = normalize_findings(None, &live);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].title, "No vulnerabilities found");
        assert_eq!(findings[0].severity, Severity::Info);
    }

    #[test]
    fn test_safety_net_not_applied_without_reports() {
        let dir = write_run_dir(Some("id,title,severity\nv1,Scan complete,info\n"), &[]);
        assert!(normalize_findings(Some(dir.path()), &[]).is_empty());
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let dir = write_run_dir(
            Some("id,title,severity\nv1,Broken access control,high\nv2,Clickjacking,low\n"),
            &[],
        );
        let live = vec![reported("Clickjacking", "medium"), reported("Host header injection", "low")];
        let first = normalize_findings(Some(dir.path()), &live);
        let second = normalize_findings(Some(dir.path()), &live);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(first[1].severity, Severity::Medium);
    }

    #[test]
    fn test_stem_title() {
        assert_eq!(stem_title(Path::new("vuln-0001_sql_injection.md")), "Vuln 0001 Sql Injection");
    }

    #[test]
    fn test_sample_run_fixture() {
        let run_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/sample_run");
        let findings = normalize_findings(Some(&run_dir), &[]);
        assert_eq!(findings.len(), 2);

        let sqli = &findings[0];
        assert_eq!(sqli.title, "SQL Injection in Product Search");
        assert_eq!(sqli.severity, Severity::Critical);
        assert!(sqli.endpoint.contains("/products"));
        assert!(sqli.owasp_category.as_deref().unwrap_or("").contains("A03"));
        assert!(sqli.poc.as_deref().unwrap_or("").contains("UNION"));
        assert!(sqli.fix_guidance.as_deref().unwrap_or("").contains("parameterized"));

        // No document for this row; the index still carries it.
        assert_eq!(findings[1].title, "Missing security headers, including CSP");
        assert_eq!(findings[1].severity, Severity::Low);
    }
}
