//! Tolerant parser for per-vulnerability markdown documents.
//!
//! Documents are produced by an LLM and follow no strict grammar. The
//! parser never fails: it maps the sections it recognizes onto finding
//! fields and reports the headings it could not map.

/// Finding field a section can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingField {
    Severity,
    Endpoint,
    Owasp,
    Impact,
    /// Fills `Impact` only when no impact section exists.
    Description,
    Poc,
    Reproduction,
    Fix,
}

/// Heading keywords, matched in order against the lowercased heading.
pub const SECTION_KEYWORDS: &[(&str, FindingField)] = &[
    ("severity", FindingField::Severity),
    ("endpoint", FindingField::Endpoint),
    ("target", FindingField::Endpoint),
    ("owasp", FindingField::Owasp),
    ("impact", FindingField::Impact),
    ("description", FindingField::Description),
    ("proof of concept", FindingField::Poc),
    ("poc", FindingField::Poc),
    ("technical analysis", FindingField::Reproduction),
    ("reproduc", FindingField::Reproduction),
    ("remediation", FindingField::Fix),
    ("fix", FindingField::Fix),
];

/// Bold inline keys recognized near the top of a document.
const INLINE_KEYS: &[(&str, FindingField)] = &[
    ("endpoint", FindingField::Endpoint),
    ("severity", FindingField::Severity),
];

/// How many leading lines are searched for inline keys.
const INLINE_SCAN_LINES: usize = 20;

/// Fields recovered from one document. Empty values are never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub title: Option<String>,
    pub severity: Option<String>,
    pub endpoint: Option<String>,
    pub owasp: Option<String>,
    pub impact: Option<String>,
    pub reproduction: Option<String>,
    pub poc: Option<String>,
    pub fix: Option<String>,
    /// Headings that matched no keyword, in document order.
    pub unmapped_sections: Vec<String>,
}

impl ParsedDocument {
    fn set(&mut self, field: FindingField, value: String) {
        if value.is_empty() {
            return;
        }
        let slot = match field {
            FindingField::Severity => &mut self.severity,
            FindingField::Endpoint => &mut self.endpoint,
            FindingField::Owasp => &mut self.owasp,
            FindingField::Impact => &mut self.impact,
            FindingField::Description => {
                if self.impact.is_some() {
                    return;
                }
                &mut self.impact
            }
            FindingField::Poc => &mut self.poc,
            FindingField::Reproduction => &mut self.reproduction,
            FindingField::Fix => &mut self.fix,
        };
        *slot = Some(value);
    }
}

/// Maps a heading onto a field by keyword containment.
pub fn classify_heading(heading: &str) -> Option<FindingField> {
    let lower = heading.to_lowercase();
    SECTION_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, field)| *field)
}

/// Parses one markdown document.
pub fn parse_document(content: &str) -> ParsedDocument {
    let mut doc = ParsedDocument::default();
    let mut sections: Vec<(String, Vec<&str>)> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim_end();
        if let Some(heading) = trimmed.strip_prefix("### ").or_else(|| trimmed.strip_prefix("## ")) {
            sections.push((heading.trim().to_string(), Vec::new()));
        } else if let Some(title) = trimmed.strip_prefix("# ") {
            if doc.title.is_none() && !title.trim().is_empty() {
                doc.title = Some(title.trim().to_string());
            }
        } else if let Some((_, body)) = sections.last_mut() {
            body.push(line);
        }
    }

    // Impact sections apply before descriptions regardless of order.
    sections.sort_by_key(|(heading, _)| classify_heading(heading) == Some(FindingField::Description));

    for (heading, body) in sections {
        let body = body.join("\n").trim().to_string();
        match classify_heading(&heading) {
            Some(field @ (FindingField::Severity | FindingField::Endpoint | FindingField::Owasp)) => {
                let first = body.lines().next().unwrap_or("").trim().to_string();
                doc.set(field, first);
            }
            Some(field) => doc.set(field, body),
            None => doc.unmapped_sections.push(heading),
        }
    }

    for line in content.lines().take(INLINE_SCAN_LINES) {
        let line = line.trim();
        let line = line.strip_prefix("- ").unwrap_or(line);
        let Some(rest) = line.strip_prefix("**") else {
            continue;
        };
        let lower = rest.to_lowercase();
        for (key, field) in INLINE_KEYS {
            if lower.starts_with(key) {
                if let Some((_, value)) = rest.split_once(':') {
                    let value = value.trim().trim_matches('*').trim().to_string();
                    doc.set(*field, value);
                }
            }
        }
    }

    doc
}
