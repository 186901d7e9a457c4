//! Reader for the engine's `vulnerabilities.csv` index.
//!
//! The index lists one vulnerability per row with at least `id`, `title`
//! and `severity` columns, plus an optional `file` column naming the
//! markdown document under `vulnerabilities/`. Quoted fields may contain
//! commas, doubled quotes and newlines.

use std::collections::HashMap;

/// One row of the index, keyed by lowercased header name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexRow {
    columns: HashMap<String, String>,
}

impl IndexRow {
    /// Returns the trimmed value of a column, or "" when absent.
    pub fn get(&self, column: &str) -> &str {
        self.columns.get(column).map(|v| v.trim()).unwrap_or("")
    }

    pub fn id(&self) -> &str {
        self.get("id")
    }

    pub fn title(&self) -> &str {
        self.get("title")
    }

    pub fn severity(&self) -> &str {
        self.get("severity")
    }

    /// Markdown file name for this row, defaulting to `<id>.md`.
    pub fn document_name(&self) -> Option<String> {
        let file = self.get("file");
        if !file.is_empty() {
            return Some(file.to_string());
        }
        let id = self.id();
        if id.is_empty() {
            None
        } else {
            Some(format!("{}.md", id))
        }
    }
}

/// Parses the index text into rows. Rows with no non-empty cell are skipped.
pub fn parse_index(text: &str) -> Vec<IndexRow> {
    let mut records = split_records(text.trim_start_matches('\u{feff}')).into_iter();

    let headers: Vec<String> = match records.next() {
        Some(h) => h.into_iter().map(|c| c.trim().to_lowercase()).collect(),
        None => return Vec::new(),
    };

    records
        .filter(|cells| cells.iter().any(|c| !c.trim().is_empty()))
        .map(|cells| {
            let columns = headers
                .iter()
                .cloned()
                .zip(cells.into_iter().chain(std::iter::repeat(String::new())))
                .collect();
            IndexRow { columns }
        })
        .collect()
}

fn split_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    records
}
