//! Persistence of scan requests, rate-limit counters and processed payments.
//!
//! The store is the only shared state between the request-facing service
//! and the worker. Every mutating operation is atomic with respect to the
//! others and enforces the lifecycle transitions, so callers never
//! read-modify-write a scan themselves.

pub mod backend;
pub mod state;

use crate::error::StoreError;
use crate::models::{
    FailureCause, PaidTier, ProgressSnapshot, ScanRequest, ScanResults, ScanStatus,
};
use async_trait::async_trait;
use uuid::Uuid;

pub use backend::StateStore;
pub use state::StoreState;

/// A lifecycle change applied atomically to one scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanUpdate {
    /// `pending -> running`.
    Started,
    /// `running -> pending` with the retry counter incremented.
    RetryScheduled,
    /// Replaces the progress snapshot of a live scan.
    Progress(ProgressSnapshot),
    /// `running|cancelling -> completed`.
    Completed(ScanResults),
    /// `pending|running|cancelling -> failed`.
    Failed(FailureCause),
    /// `pending -> failed(cancelled)` or `running -> cancelling`.
    CancelRequested,
    /// Swaps the results of a `completed` scan, keeping its status and times.
    ResultsReplaced(ScanResults),
}

impl ScanUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            ScanUpdate::Started => "start",
            ScanUpdate::RetryScheduled => "retry",
            ScanUpdate::Progress(_) => "progress",
            ScanUpdate::Completed(_) => "completion",
            ScanUpdate::Failed(_) => "failure",
            ScanUpdate::CancelRequested => "cancel",
            ScanUpdate::ResultsReplaced(_) => "results replacement",
        }
    }
}

/// A confirmed payment to apply to a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRecord {
    pub scan_id: Uuid,
    pub tier: PaidTier,
    /// Processor reference; each is applied at most once.
    pub payment_ref: String,
}

/// Result of applying a payment.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentApplied {
    /// The scan's paid tier was raised; holds the updated scan.
    Raised(ScanRequest),
    /// This payment reference was already processed.
    Duplicate,
    /// The tier does not outrank the recorded one. The reference is consumed.
    NotAnUpgrade(ScanRequest),
}

#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn insert(&self, scan: ScanRequest) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<ScanRequest>, StoreError>;

    /// Scans in a status, oldest first.
    async fn list_by_status(&self, status: ScanStatus) -> Result<Vec<ScanRequest>, StoreError>;

    /// Most recently created scans, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<ScanRequest>, StoreError>;

    /// Rescans spawned from `parent`, oldest first.
    async fn children(&self, parent: Uuid) -> Result<Vec<ScanRequest>, StoreError>;

    /// Applies a lifecycle change and returns the updated scan.
    async fn update(&self, id: Uuid, update: ScanUpdate) -> Result<ScanRequest, StoreError>;

    /// Counts one scan against `identity` for `month` if under `limit`.
    ///
    /// Returns `false` without counting when the limit is reached. A new
    /// month resets the counter.
    async fn consume_quota(&self, identity: &str, month: &str, limit: u32) -> Result<bool, StoreError>;

    /// Applies a payment idempotently.
    async fn apply_payment(&self, payment: &PaymentRecord) -> Result<PaymentApplied, StoreError>;
}
