//! Lifecycle of one scan.
//!
//! An attempt launches the engine, runs it as its own task, and alongside
//! it a monitor loop that ticks on a fixed period: read telemetry, update
//! the clamped counters, let the governor fire, persist a snapshot. Both
//! are owned by the attempt. Cancellation aborts the engine task and stops
//! the monitor before anything final is written, so the final snapshot
//! always lands after the run is gone and before the terminal status.

use crate::config::{Config, TierProfiles};
use crate::engine::{
    Engine, EngineInvocation, EngineOutput, EngineSession, ReportedVulnerability, Sandbox, Telemetry,
};
use crate::error::{EngineError, StoreError};
use crate::findings::normalize_findings;
use crate::models::{FailureCause, ProgressSnapshot, ScanRequest, ScanResults, ScanStatus};
use crate::notify::{Notification, Notifications};
use crate::report::{build_structured_report, ReportExtractor};
use crate::run::governor::BudgetGovernor;
use crate::run::progress::ProgressAggregator;
use crate::store::{ScanStore, ScanUpdate};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Stored failure messages are cut to this many characters.
const MAX_FAILURE_MESSAGE: usize = 2000;

/// A transient failure is retried at most this many times, whatever the
/// configuration says.
pub const MAX_RETRIES: u32 = 1;

/// Executor knobs, taken from the `[worker]` and `[tiers]` config sections.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub tiers: TierProfiles,
    pub tick_interval: Duration,
    pub wrap_up_allowance: u32,
    pub activity_log_cap: usize,
    pub max_retries: u32,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tiers: config.tiers.clone(),
            tick_interval: config.worker.tick_interval(),
            wrap_up_allowance: config.worker.wrap_up_allowance,
            activity_log_cap: config.worker.activity_log_cap,
            max_retries: config.worker.max_retries.min(MAX_RETRIES),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// State private to one attempt.
struct RunContext {
    governor: BudgetGovernor,
    aggregator: ProgressAggregator,
    last_snapshot: Option<ProgressSnapshot>,
    /// Latest live vulnerability reports.
    vulnerabilities: Vec<ReportedVulnerability>,
}

impl RunContext {
    fn new(cost_limit: f64, settings: &ExecutorSettings) -> Self {
        Self {
            governor: BudgetGovernor::new(cost_limit, settings.wrap_up_allowance),
            aggregator: ProgressAggregator::new(settings.activity_log_cap),
            last_snapshot: None,
            vulnerabilities: Vec::new(),
        }
    }

    /// Keeps the longest report list seen; telemetry may briefly show fewer.
    fn observe_vulnerabilities(&mut self, telemetry: &Telemetry) {
        if telemetry.vulnerabilities.len() >= self.vulnerabilities.len() {
            self.vulnerabilities = telemetry.vulnerabilities.clone();
        }
    }
}

enum RunOutcome {
    Finished(EngineOutput),
    Failed(EngineError),
    Cancelled,
}

enum AttemptOutcome {
    Completed(ScanResults),
    Failed(EngineError),
    Cancelled,
}

pub struct ScanExecutor {
    store: Arc<dyn ScanStore>,
    engine: Arc<dyn Engine>,
    sandbox: Arc<dyn Sandbox>,
    extractor: Arc<dyn ReportExtractor>,
    notifications: Notifications,
    settings: ExecutorSettings,
}

impl ScanExecutor {
    pub fn new(
        store: Arc<dyn ScanStore>,
        engine: Arc<dyn Engine>,
        sandbox: Arc<dyn Sandbox>,
        extractor: Arc<dyn ReportExtractor>,
        notifications: Notifications,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            store,
            engine,
            sandbox,
            extractor,
            notifications,
            settings,
        }
    }

    /// Runs a pending scan to a terminal status, retrying a transient
    /// failure up to the configured number of times.
    ///
    /// Returns the status the scan was left in. A scan that is no longer
    /// pending is left alone and its current status returned.
    pub async fn process(&self, scan_id: Uuid, cancel: CancellationToken) -> Result<ScanStatus, StoreError> {
        let mut scan = match self.store.update(scan_id, ScanUpdate::Started).await {
            Ok(scan) => scan,
            Err(StoreError::InvalidTransition { from, .. }) => {
                info!(%scan_id, "Scan is {}, not pending; skipping", from);
                return Ok(from);
            }
            Err(e) => return Err(e),
        };

        if scan.retry_count == 0 {
            self.notifications
                .dispatch(Notification::ScanStarted {
                    scan_id,
                    requester: scan.requester.clone(),
                    target: scan.target.clone(),
                    tier: scan.tier,
                })
                .await;
        }

        loop {
            let error = match self.attempt(&scan, &cancel).await {
                AttemptOutcome::Completed(results) => return self.complete(&scan, results).await,
                AttemptOutcome::Cancelled => return self.fail(&scan, FailureCause::Cancelled).await,
                AttemptOutcome::Failed(_) if cancel.is_cancelled() => {
                    return self.fail(&scan, FailureCause::Cancelled).await
                }
                AttemptOutcome::Failed(error) => error,
            };

            if !error.is_retryable() || scan.retry_count >= self.settings.max_retries.min(MAX_RETRIES) {
                let cause = match error {
                    EngineError::Crashed(message) => FailureCause::Crashed {
                        message: truncate(&message),
                    },
                    other => FailureCause::Engine {
                        message: truncate(&other.to_string()),
                    },
                };
                return self.fail(&scan, cause).await;
            }

            warn!(
                %scan_id,
                "Attempt {} failed, retrying: {}",
                scan.retry_count + 1,
                error
            );
            match self.store.update(scan_id, ScanUpdate::RetryScheduled).await {
                Ok(_) => {}
                // A cancel landed while the attempt was failing.
                Err(StoreError::InvalidTransition { .. }) => {
                    return self.fail(&scan, FailureCause::Cancelled).await
                }
                Err(e) => return Err(e),
            }
            scan = match self.store.update(scan_id, ScanUpdate::Started).await {
                Ok(scan) => scan,
                Err(StoreError::InvalidTransition { from, .. }) => {
                    info!(%scan_id, "Scan became {} before its retry started", from);
                    return Ok(from);
                }
                Err(e) => return Err(e),
            };
        }
    }

    /// Waits until notifications sent by finished scans are delivered.
    pub async fn flush_notifications(&self) {
        self.notifications.flush().await;
    }

    async fn attempt(&self, scan: &ScanRequest, cancel: &CancellationToken) -> AttemptOutcome {
        let profile = self.settings.tiers.profile(scan.tier);
        let invocation = EngineInvocation::for_scan(scan, profile);
        let run_name = invocation.run_name.clone();
        let ctx = Arc::new(Mutex::new(RunContext::new(profile.cost_limit, &self.settings)));

        info!(
            scan_id = %scan.id,
            "Starting run {} against {} ({} tier, {} iterations, ${:.2} budget, attempt {})",
            run_name,
            scan.target,
            scan.tier,
            profile.max_iterations,
            profile.cost_limit,
            scan.retry_count + 1
        );

        let (outcome, final_telemetry) = match self.engine.launch(invocation).await {
            Ok(session) => {
                let outcome = self.drive(scan.id, session.clone(), ctx.clone(), cancel).await;
                (outcome, session.telemetry().await.ok())
            }
            Err(e) => {
                error!(scan_id = %scan.id, "Failed to launch run {}: {}", run_name, e);
                (RunOutcome::Failed(e), None)
            }
        };

        let vulnerabilities = {
            let mut ctx = ctx.lock().await;
            self.write_final_snapshot(scan.id, &mut ctx, final_telemetry).await;
            ctx.vulnerabilities.clone()
        };
        self.reclaim(&run_name).await;

        match outcome {
            RunOutcome::Finished(output) => {
                AttemptOutcome::Completed(self.collect_results(scan, output, vulnerabilities).await)
            }
            RunOutcome::Failed(e) => AttemptOutcome::Failed(e),
            RunOutcome::Cancelled => AttemptOutcome::Cancelled,
        }
    }

    /// Runs the engine task and the monitor until the task ends or the
    /// scan is cancelled. The monitor has stopped when this returns.
    async fn drive(
        &self,
        scan_id: Uuid,
        session: Arc<dyn EngineSession>,
        ctx: Arc<Mutex<RunContext>>,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let stop = CancellationToken::new();
        let monitor = tokio::spawn(monitor(
            ctx,
            session.clone(),
            self.store.clone(),
            scan_id,
            self.settings.tick_interval,
            stop.clone(),
        ));

        let runner = session.clone();
        let mut task = tokio::spawn(async move { runner.execute().await });

        let outcome = tokio::select! {
            joined = &mut task => match joined {
                Ok(Ok(output)) => RunOutcome::Finished(output),
                Ok(Err(e)) => RunOutcome::Failed(e),
                Err(e) => RunOutcome::Failed(EngineError::Crashed(join_error_message(e))),
            },
            _ = cancel.cancelled() => {
                info!(%scan_id, "Cancelling run {}", session.run_name());
                task.abort();
                let _ = task.await;
                RunOutcome::Cancelled
            }
        };

        stop.cancel();
        if let Err(e) = monitor.await {
            error!(%scan_id, "Progress monitor ended abnormally: {}", e);
        }

        outcome
    }

    async fn write_final_snapshot(&self, scan_id: Uuid, ctx: &mut RunContext, telemetry: Option<Telemetry>) {
        let snapshot = match telemetry {
            Some(telemetry) => {
                ctx.observe_vulnerabilities(&telemetry);
                ctx.aggregator.snapshot(&telemetry)
            }
            None => ctx
                .last_snapshot
                .take()
                .unwrap_or_else(|| ctx.aggregator.counters_only()),
        };
        let snapshot = ctx.aggregator.finalize(snapshot);

        debug!(
            %scan_id,
            "Final snapshot: ${:.2}, {} tools, {} vulnerabilities",
            snapshot.cost,
            snapshot.tools,
            snapshot.vulnerabilities_found
        );
        if let Err(e) = self.store.update(scan_id, ScanUpdate::Progress(snapshot)).await {
            warn!(%scan_id, "Failed to store final snapshot: {}", e);
        }
    }

    async fn reclaim(&self, run_name: &str) {
        match self.sandbox.reclaim(run_name).await {
            Ok(0) => debug!("No sandbox containers left by {}", run_name),
            Ok(n) => info!("Removed {} sandbox container(s) of {}", n, run_name),
            Err(e) => warn!("Failed to reclaim sandbox of {}: {}", run_name, e),
        }
    }

    async fn collect_results(
        &self,
        scan: &ScanRequest,
        output: EngineOutput,
        vulnerabilities: Vec<ReportedVulnerability>,
    ) -> ScanResults {
        let run_dir = output.run_dir;

        let dir = run_dir.clone();
        let findings = match tokio::task::spawn_blocking(move || {
            normalize_findings(dir.as_deref(), &vulnerabilities)
        })
        .await
        {
            Ok(findings) => findings,
            Err(e) => {
                error!(scan_id = %scan.id, "Finding normalization failed: {}", e);
                Vec::new()
            }
        };

        let structured_report = match run_dir {
            Some(ref dir) => build_structured_report(self.extractor.as_ref(), dir, &scan.target).await,
            None => {
                warn!(scan_id = %scan.id, "Run left no output directory");
                None
            }
        };

        info!(
            scan_id = %scan.id,
            "Run finished: {} findings, structured report: {}",
            findings.len(),
            if structured_report.is_some() { "yes" } else { "no" }
        );

        ScanResults {
            findings,
            structured_report,
        }
    }

    async fn complete(&self, scan: &ScanRequest, results: ScanResults) -> Result<ScanStatus, StoreError> {
        let findings_count = results.findings.len();
        let stored = self.store.update(scan.id, ScanUpdate::Completed(results)).await?;

        self.notifications
            .dispatch(Notification::ScanCompleted {
                scan_id: scan.id,
                requester: scan.requester.clone(),
                target: scan.target.clone(),
                findings_count,
            })
            .await;

        Ok(stored.status)
    }

    async fn fail(&self, scan: &ScanRequest, cause: FailureCause) -> Result<ScanStatus, StoreError> {
        let reason = cause.to_string();
        let stored = match self.store.update(scan.id, ScanUpdate::Failed(cause)).await {
            Ok(stored) => stored,
            Err(StoreError::InvalidTransition { from, .. }) => return Ok(from),
            Err(e) => return Err(e),
        };
        warn!(scan_id = %scan.id, "Scan failed: {}", reason);

        self.notifications
            .dispatch(Notification::ScanFailed {
                scan_id: scan.id,
                requester: scan.requester.clone(),
                target: scan.target.clone(),
                reason,
            })
            .await;

        Ok(stored.status)
    }
}

/// Ticks until `stop` fires. A failing or panicking tick is logged and
/// the loop carries on.
async fn monitor(
    ctx: Arc<Mutex<RunContext>>,
    session: Arc<dyn EngineSession>,
    store: Arc<dyn ScanStore>,
    scan_id: Uuid,
    period: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = AssertUnwindSafe(tick(&ctx, session.as_ref(), store.as_ref(), scan_id))
            .catch_unwind()
            .await;
        if result.is_err() {
            error!(%scan_id, "Progress tick panicked");
        }
    }
}

async fn tick(ctx: &Mutex<RunContext>, session: &dyn EngineSession, store: &dyn ScanStore, scan_id: Uuid) {
    let telemetry = match session.telemetry().await {
        Ok(telemetry) => telemetry,
        Err(e) => {
            debug!(%scan_id, "Telemetry unavailable: {}", e);
            return;
        }
    };

    let snapshot = {
        let mut ctx = ctx.lock().await;
        let snapshot = ctx.aggregator.snapshot(&telemetry);
        ctx.observe_vulnerabilities(&telemetry);
        if let Some(wrap_up) = ctx.governor.check(snapshot.cost, telemetry.iteration) {
            ctx.governor.enforce(wrap_up, session).await;
        }
        ctx.last_snapshot = Some(snapshot.clone());
        snapshot
    };

    if let Err(e) = store.update(scan_id, ScanUpdate::Progress(snapshot)).await {
        warn!(%scan_id, "Failed to store progress: {}", e);
    }
}

fn join_error_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "run task panicked".to_string()
    }
}

fn truncate(message: &str) -> String {
    message.chars().take(MAX_FAILURE_MESSAGE).collect()
}
