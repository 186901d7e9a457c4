//! In-memory image of the store and the rules for changing it.

use super::{PaymentApplied, PaymentRecord, ScanUpdate};
use crate::error::StoreError;
use crate::models::{FailureCause, PaidTier, ScanRequest, ScanStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Monthly submission counter for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    /// `YYYY-MM` the count belongs to.
    pub month: String,
    pub count: u32,
}

/// Everything the store holds. Serialized as the state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    /// In creation order.
    #[serde(default)]
    pub scans: Vec<ScanRequest>,
    #[serde(default)]
    pub rate_limits: BTreeMap<String, RateLimitEntry>,
    #[serde(default)]
    pub processed_payments: BTreeSet<String>,
}

impl StoreState {
    pub fn get(&self, id: Uuid) -> Option<&ScanRequest> {
        self.scans.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: Uuid) -> Result<&mut ScanRequest, StoreError> {
        self.scans
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    pub fn insert(&mut self, scan: ScanRequest) -> Result<(), StoreError> {
        if self.get(scan.id).is_some() {
            return Err(StoreError::Duplicate(scan.id));
        }
        self.scans.push(scan);
        Ok(())
    }

    pub fn list_by_status(&self, status: ScanStatus) -> Vec<ScanRequest> {
        self.scans.iter().filter(|s| s.status == status).cloned().collect()
    }

    pub fn recent(&self, limit: usize) -> Vec<ScanRequest> {
        self.scans.iter().rev().take(limit).cloned().collect()
    }

    pub fn children(&self, parent: Uuid) -> Vec<ScanRequest> {
        self.scans
            .iter()
            .filter(|s| s.parent_id == Some(parent))
            .cloned()
            .collect()
    }

    /// Applies a lifecycle change, rejecting transitions the lifecycle forbids.
    pub fn apply(&mut self, id: Uuid, update: ScanUpdate) -> Result<ScanRequest, StoreError> {
        let scan = self.get_mut(id)?;
        let from = scan.status;
        let invalid = || StoreError::InvalidTransition {
            from,
            update: update.name(),
        };

        match (&update, from) {
            (ScanUpdate::Started, ScanStatus::Pending) => {
                scan.status = ScanStatus::Running;
                scan.started_at = Some(Utc::now());
                scan.failure = None;
            }
            (ScanUpdate::RetryScheduled, ScanStatus::Running) => {
                scan.status = ScanStatus::Pending;
                scan.retry_count += 1;
            }
            (ScanUpdate::Progress(snapshot), s) if s.is_active() => {
                scan.progress = Some(snapshot.clone());
            }
            (ScanUpdate::Completed(results), s) if s.is_active() => {
                scan.status = ScanStatus::Completed;
                scan.results = Some(results.clone());
                scan.completed_at = Some(Utc::now());
            }
            (ScanUpdate::Failed(cause), s) if !s.is_terminal() => {
                scan.status = ScanStatus::Failed;
                scan.failure = Some(cause.clone());
                scan.completed_at = Some(Utc::now());
            }
            (ScanUpdate::CancelRequested, ScanStatus::Pending) => {
                scan.status = ScanStatus::Failed;
                scan.failure = Some(FailureCause::Cancelled);
                scan.completed_at = Some(Utc::now());
            }
            (ScanUpdate::CancelRequested, ScanStatus::Running) => {
                scan.status = ScanStatus::Cancelling;
            }
            // Repeated or late cancels are no-ops.
            (ScanUpdate::CancelRequested, _) => {}
            (ScanUpdate::ResultsReplaced(results), ScanStatus::Completed) => {
                scan.results = Some(results.clone());
            }
            _ => return Err(invalid()),
        }

        Ok(scan.clone())
    }

    pub fn consume_quota(&mut self, identity: &str, month: &str, limit: u32) -> bool {
        let key = identity.trim().to_lowercase();
        let entry = self.rate_limits.entry(key).or_insert_with(|| RateLimitEntry {
            month: month.to_string(),
            count: 0,
        });

        if entry.month != month {
            entry.month = month.to_string();
            entry.count = 0;
        }
        if entry.count >= limit {
            return false;
        }
        entry.count += 1;
        true
    }

    pub fn apply_payment(&mut self, payment: &PaymentRecord) -> Result<PaymentApplied, StoreError> {
        if self.processed_payments.contains(&payment.payment_ref) {
            return Ok(PaymentApplied::Duplicate);
        }

        let scan = self.get_mut(payment.scan_id)?;
        let upgrade = payment.tier.rank() > PaidTier::rank_of(scan.paid_tier);
        if upgrade {
            scan.paid_tier = Some(payment.tier);
            scan.payment_ref = Some(payment.payment_ref.clone());
        }
        let scan = scan.clone();
        self.processed_payments.insert(payment.payment_ref.clone());

        Ok(if upgrade {
            PaymentApplied::Raised(scan)
        } else {
            PaymentApplied::NotAnUpgrade(scan)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProgressSnapshot, ScanResults, ScanTier};

    fn state_with(status: ScanStatus) -> (StoreState, Uuid) {
        let mut scan = ScanRequest::new("a@example.com", "https://example.com", ScanTier::Quick);
        scan.status = status;
        let id = scan.id;
        let mut state = StoreState::default();
        state.insert(scan).unwrap();
        (state, id)
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let (mut state, id) = state_with(ScanStatus::Pending);
        let scan = state.apply(id, ScanUpdate::Started).unwrap();
        assert_eq!(scan.status, ScanStatus::Running);
        assert!(scan.started_at.is_some());

        state
            .apply(id, ScanUpdate::Progress(ProgressSnapshot::default()))
            .unwrap();
        let scan = state
            .apply(id, ScanUpdate::Completed(ScanResults::default()))
            .unwrap();
        assert_eq!(scan.status, ScanStatus::Completed);
        assert!(scan.results.is_some());
        assert!(scan.completed_at.is_some());
    }

    #[test]
    fn test_retry_resets_to_pending() {
        let (mut state, id) = state_with(ScanStatus::Running);
        let scan = state.apply(id, ScanUpdate::RetryScheduled).unwrap();
        assert_eq!(scan.status, ScanStatus::Pending);
        assert_eq!(scan.retry_count, 1);
    }

    #[test]
    fn test_terminal_states_reject_changes() {
        let (mut state, id) = state_with(ScanStatus::Completed);
        for update in [
            ScanUpdate::Started,
            ScanUpdate::RetryScheduled,
            ScanUpdate::Progress(ProgressSnapshot::default()),
            ScanUpdate::Failed(FailureCause::Orphaned),
        ] {
            let err = state.apply(id, update).unwrap_err();
            assert!(matches!(err, StoreError::InvalidTransition { .. }));
        }
        // Cancel after completion is a no-op.
        let scan = state.apply(id, ScanUpdate::CancelRequested).unwrap();
        assert_eq!(scan.status, ScanStatus::Completed);
    }

    #[test]
    fn test_results_replaced_only_when_completed() {
        let (mut state, id) = state_with(ScanStatus::Completed);
        let results = ScanResults {
            findings: Vec::new(),
            structured_report: Some(crate::report::fallback_report("https://example.com", "retry")),
        };
        let scan = state
            .apply(id, ScanUpdate::ResultsReplaced(results.clone()))
            .unwrap();
        assert_eq!(scan.status, ScanStatus::Completed);
        assert_eq!(scan.results, Some(results));

        for status in [
            ScanStatus::Pending,
            ScanStatus::Running,
            ScanStatus::Cancelling,
            ScanStatus::Failed,
        ] {
            let (mut state, id) = state_with(status);
            let err = state
                .apply(id, ScanUpdate::ResultsReplaced(ScanResults::default()))
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidTransition { from, .. } if from == status));
            assert!(state.get(id).unwrap().results.is_none());
        }
    }

    #[test]
    fn test_cancel_transitions() {
        let (mut state, id) = state_with(ScanStatus::Pending);
        let scan = state.apply(id, ScanUpdate::CancelRequested).unwrap();
        assert_eq!(scan.status, ScanStatus::Failed);
        assert_eq!(scan.failure, Some(FailureCause::Cancelled));

        let (mut state, id) = state_with(ScanStatus::Running);
        let scan = state.apply(id, ScanUpdate::CancelRequested).unwrap();
        assert_eq!(scan.status, ScanStatus::Cancelling);
        assert!(state.apply(id, ScanUpdate::RetryScheduled).is_err());
        let scan = state
            .apply(id, ScanUpdate::Failed(FailureCause::Cancelled))
            .unwrap();
        assert_eq!(scan.status, ScanStatus::Failed);
    }

    #[test]
    fn test_quota_rollover() {
        let mut state = StoreState::default();
        for _ in 0..3 {
            assert!(state.consume_quota("User@Example.com", "2026-01", 3));
        }
        assert!(!state.consume_quota("user@example.com", "2026-01", 3));
        assert_eq!(state.rate_limits["user@example.com"].count, 3);

        assert!(state.consume_quota("user@example.com", "2026-02", 3));
        assert_eq!(state.rate_limits["user@example.com"].count, 1);
    }

    #[test]
    fn test_payment_idempotence_and_rank() {
        let (mut state, id) = state_with(ScanStatus::Completed);
        let pro = PaymentRecord {
            scan_id: id,
            tier: PaidTier::Pro,
            payment_ref: "pi_1".into(),
        };
        assert!(matches!(state.apply_payment(&pro).unwrap(), PaymentApplied::Raised(_)));
        assert_eq!(state.apply_payment(&pro).unwrap(), PaymentApplied::Duplicate);

        let unlock = PaymentRecord {
            scan_id: id,
            tier: PaidTier::Unlock,
            payment_ref: "pi_2".into(),
        };
        match state.apply_payment(&unlock).unwrap() {
            PaymentApplied::NotAnUpgrade(scan) => assert_eq!(scan.paid_tier, Some(PaidTier::Pro)),
            other => panic!("unexpected {:?}", other),
        }

        let deep = PaymentRecord {
            scan_id: id,
            tier: PaidTier::Deep,
            payment_ref: "pi_3".into(),
        };
        match state.apply_payment(&deep).unwrap() {
            PaymentApplied::Raised(scan) => {
                assert_eq!(scan.paid_tier, Some(PaidTier::Deep));
                assert_eq!(scan.payment_ref.as_deref(), Some("pi_3"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_payment_for_unknown_scan() {
        let mut state = StoreState::default();
        let payment = PaymentRecord {
            scan_id: Uuid::new_v4(),
            tier: PaidTier::Unlock,
            payment_ref: "pi_x".into(),
        };
        assert!(matches!(state.apply_payment(&payment), Err(StoreError::NotFound(_))));
        assert!(state.processed_payments.is_empty());
    }

    #[test]
    fn test_recent_and_children() {
        let mut state = StoreState::default();
        let parent = ScanRequest::new("a@example.com", "https://a.example", ScanTier::Quick);
        let child = ScanRequest::child_of(&parent, ScanTier::Pro);
        let other = ScanRequest::new("b@example.com", "https://b.example", ScanTier::Quick);
        let (parent_id, child_id, other_id) = (parent.id, child.id, other.id);
        state.insert(parent).unwrap();
        state.insert(child).unwrap();
        state.insert(other).unwrap();

        let recent: Vec<Uuid> = state.recent(2).iter().map(|s| s.id).collect();
        assert_eq!(recent, vec![other_id, child_id]);
        let children: Vec<Uuid> = state.children(parent_id).iter().map(|s| s.id).collect();
        assert_eq!(children, vec![child_id]);
    }
}
