//! Rebuilding the results of a finished scan from its run directory.
//!
//! Used after parser or extraction fixes: the engine's artifacts are read
//! again and the stored results swapped in place. The scan stays
//! `completed` and keeps its timestamps. Live vulnerability reports are
//! not kept by the engine, so only file findings are recovered.

use crate::engine::run_name_for;
use crate::error::{ServiceError, StoreError};
use crate::findings::normalize_findings;
use crate::models::{ScanRequest, ScanResults, ScanStatus};
use crate::report::{build_structured_report, ReportExtractor};
use crate::store::{ScanStore, ScanUpdate};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ReprocessOptions {
    /// Read this directory instead of the scan's last run directory.
    pub run_dir: Option<PathBuf>,
    /// Keep the stored structured report instead of extracting a new one.
    pub keep_report: bool,
    /// Build the results without storing them.
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct Reprocessed {
    /// The scan as stored afterwards.
    pub scan: ScanRequest,
    pub run_dir: PathBuf,
    pub previous_findings: usize,
    pub results: ScanResults,
    pub stored: bool,
}

pub struct Reprocessor {
    store: Arc<dyn ScanStore>,
    extractor: Arc<dyn ReportExtractor>,
    runs_dir: PathBuf,
}

impl Reprocessor {
    pub fn new(store: Arc<dyn ScanStore>, extractor: Arc<dyn ReportExtractor>, runs_dir: PathBuf) -> Self {
        Self {
            store,
            extractor,
            runs_dir,
        }
    }

    pub async fn reprocess(&self, scan_id: Uuid, options: ReprocessOptions) -> Result<Reprocessed, ServiceError> {
        let scan = self
            .store
            .get(scan_id)
            .await
            .map_err(ServiceError::from_store)?
            .ok_or(ServiceError::NotFound)?;
        if scan.status != ScanStatus::Completed {
            return Err(ServiceError::NotCompleted { status: scan.status });
        }

        let run_dir = options
            .run_dir
            .clone()
            .unwrap_or_else(|| self.runs_dir.join(run_name_for(&scan)));
        if !run_dir.is_dir() {
            return Err(ServiceError::Invalid(format!(
                "Run directory {} not found",
                run_dir.display()
            )));
        }
        info!(%scan_id, "Reprocessing from {}", run_dir.display());

        let previous = scan.results.clone().unwrap_or_default();

        let dir = run_dir.clone();
        let findings = tokio::task::spawn_blocking(move || normalize_findings(Some(&dir), &[]))
            .await
            .map_err(|e| ServiceError::Invalid(format!("Finding normalization failed: {}", e)))?;

        let structured_report = if options.keep_report {
            previous.structured_report.clone()
        } else {
            build_structured_report(self.extractor.as_ref(), &run_dir, &scan.target).await
        };

        let results = ScanResults {
            findings,
            structured_report,
        };
        info!(
            %scan_id,
            "Rebuilt {} finding(s) (was {}), structured report: {}",
            results.findings.len(),
            previous.findings.len(),
            if results.structured_report.is_some() { "yes" } else { "no" }
        );

        let (scan, stored) = if options.dry_run {
            (scan, false)
        } else {
            let updated = self
                .store
                .update(scan_id, ScanUpdate::ResultsReplaced(results.clone()))
                .await
                .map_err(|e| match e {
                    StoreError::InvalidTransition { from, .. } => {
                        warn!(%scan_id, "Scan became {} while reprocessing", from);
                        ServiceError::NotCompleted { status: from }
                    }
                    other => ServiceError::from_store(other),
                })?;
            (updated, true)
        };

        Ok(Reprocessed {
            scan,
            run_dir,
            previous_findings: previous.findings.len(),
            results,
            stored,
        })
    }
}
