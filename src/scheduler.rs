//! The worker loop: recover after a restart, then pick up pending scans
//! one at a time, oldest first.
//!
//! Cancel requests arrive through the store as a `cancelling` status. While
//! a scan runs, a watcher task polls for that status and trips the run's
//! cancellation token.

use crate::engine::Sandbox;
use crate::error::StoreError;
use crate::models::{FailureCause, ScanStatus};
use crate::run::ScanExecutor;
use crate::store::{ScanStore, ScanUpdate};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct Scheduler {
    store: Arc<dyn ScanStore>,
    executor: Arc<ScanExecutor>,
    sandbox: Arc<dyn Sandbox>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ScanStore>,
        executor: Arc<ScanExecutor>,
        sandbox: Arc<dyn Sandbox>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            sandbox,
            poll_interval,
        }
    }

    /// Fails scans left live by a previous worker and removes stray
    /// sandbox containers. Returns how many scans were failed.
    pub async fn recover(&self) -> Result<usize, StoreError> {
        let mut recovered = 0;

        for (status, cause) in [
            (ScanStatus::Running, FailureCause::Orphaned),
            (ScanStatus::Cancelling, FailureCause::Cancelled),
        ] {
            for scan in self.store.list_by_status(status).await? {
                match self.store.update(scan.id, ScanUpdate::Failed(cause.clone())).await {
                    Ok(_) => {
                        warn!("Scan {} was {} at startup; marked failed ({})", scan.id, status, cause);
                        recovered += 1;
                    }
                    Err(StoreError::InvalidTransition { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        match self.sandbox.sweep().await {
            Ok(removed) => debug!("Startup sweep removed {} container(s)", removed),
            Err(e) => warn!("Startup sandbox sweep failed: {}", e),
        }

        Ok(recovered)
    }

    /// Processes every scan pending right now. Returns how many were run.
    pub async fn poll_once(&self) -> Result<usize, StoreError> {
        let pending = self.store.list_by_status(ScanStatus::Pending).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        debug!("{} pending scan(s)", pending.len());

        let mut processed = 0;
        for scan in pending {
            let status = self.run_one(scan.id).await?;
            info!("Scan {} finished as {}", scan.id, status);
            processed += 1;
        }
        Ok(processed)
    }

    async fn run_one(&self, scan_id: Uuid) -> Result<ScanStatus, StoreError> {
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_for_cancel(
            self.store.clone(),
            scan_id,
            cancel.clone(),
            self.poll_interval,
        ));

        let result = self.executor.process(scan_id, cancel.clone()).await;

        // Stops the watcher; the run is already over.
        cancel.cancel();
        if let Err(e) = watcher.await {
            warn!("Cancel watcher for scan {} ended abnormally: {}", scan_id, e);
        }

        result
    }

    /// Runs until `shutdown` fires.
    ///
    /// Shutdown stops the loop without failing the scan in flight; the next
    /// start recovers it as orphaned.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), StoreError> {
        let recovered = self.recover().await?;
        if recovered > 0 {
            info!("Recovered {} interrupted scan(s)", recovered);
        }
        info!("Worker started, polling every {:?}", self.poll_interval);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.poll_once() => {
                    if let Err(e) = result {
                        error!("Worker poll failed: {}", e);
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.executor.flush_notifications().await;
        info!("Worker stopped");
        Ok(())
    }
}

async fn watch_for_cancel(
    store: Arc<dyn ScanStore>,
    scan_id: Uuid,
    cancel: CancellationToken,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match store.get(scan_id).await {
            Ok(Some(scan)) if scan.status == ScanStatus::Cancelling => {
                info!("Cancel requested for scan {}", scan_id);
                cancel.cancel();
                return;
            }
            Ok(Some(scan)) if scan.status.is_terminal() => return,
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(e) => warn!("Cancel watcher could not read scan {}: {}", scan_id, e),
        }
    }
}
