//! Structured reports: locating the engine's markdown report, extracting
//! a structured report from it, and rendering results for operators.

pub mod extractor;
pub mod fallback;
pub mod render;

use crate::models::StructuredReport;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub use extractor::{LlmReportExtractor, ReportExtractor};
pub use fallback::fallback_report;

/// Report file the engine writes on a normal finish.
pub const REPORT_FILE: &str = "penetration_test_report.md";

/// Stand-in reports shorter than this are ignored.
const MIN_ALTERNATE_REPORT_CHARS: usize = 200;

/// Entries of the run directory listed at debug level.
const INVENTORY_LIMIT: usize = 30;

/// Finds and reads the markdown report of a run.
///
/// Prefers [`REPORT_FILE`]; otherwise the first markdown file in the
/// directory root long enough to be a report.
pub async fn discover_report_markdown(run_dir: &Path) -> Option<(PathBuf, String)> {
    log_inventory(run_dir);

    let primary = run_dir.join(REPORT_FILE);
    match tokio::fs::read_to_string(&primary).await {
        Ok(content) => return Some((primary, content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("No {} in {}", REPORT_FILE, run_dir.display());
        }
        Err(e) => warn!("Failed to read {}: {}", primary.display(), e),
    }

    let mut candidates: Vec<PathBuf> = WalkDir::new(run_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().map(|ext| ext == "md").unwrap_or(false))
        .collect();
    candidates.sort();

    for path in candidates {
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.chars().count() > MIN_ALTERNATE_REPORT_CHARS => {
                info!("Using {} as the report ({} chars)", path.display(), content.len());
                return Some((path, content));
            }
            Ok(_) => debug!("Skipping short markdown file {}", path.display()),
            Err(e) => warn!("Failed to read {}: {}", path.display(), e),
        }
    }

    None
}

fn log_inventory(run_dir: &Path) {
    if !run_dir.exists() {
        warn!("Run directory does not exist: {}", run_dir.display());
        return;
    }
    let entries: Vec<String> = WalkDir::new(run_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .take(INVENTORY_LIMIT)
        .map(|e| {
            let rel = e.path().strip_prefix(run_dir).unwrap_or(e.path());
            let size = e.metadata().map(|m| m.len()).unwrap_or(0);
            format!("{} ({}b)", rel.display(), size)
        })
        .collect();
    debug!("Run directory {}: {:?}", run_dir.display(), entries);
}

/// Builds the structured report for a finished run.
///
/// Returns `None` when the run left no markdown report. Extraction
/// failures and empty extractions yield the fallback report instead.
pub async fn build_structured_report(
    extractor: &dyn ReportExtractor,
    run_dir: &Path,
    target: &str,
) -> Option<StructuredReport> {
    let (path, markdown) = discover_report_markdown(run_dir).await?;
    info!("Extracting structured report from {} ({} chars)", path.display(), markdown.len());

    match extractor.extract(&markdown).await {
        Ok(report) if report.is_empty() => {
            warn!("Extraction returned an empty report, using fallback");
            Some(fallback_report(target, "extraction returned an empty report"))
        }
        Ok(report) => {
            info!("Structured report extracted, risk: {}", report.risk_level);
            Some(report)
        }
        Err(e) => {
            warn!("Report extraction failed: {}", e);
            Some(fallback_report(target, &e.to_string()))
        }
    }
}
