//! Paid tiers: prices, checkout preconditions and payment confirmation.
//!
//! A confirmed payment raises the scan's paid tier (never lowers it) and,
//! for the rescan tiers, queues a child scan at the purchased depth.
//! Payment references are applied at most once, so redelivered
//! confirmations are harmless.

use crate::disclosure::is_upgrade;
use crate::error::ServiceError;
use crate::models::{PaidTier, ScanRequest};
use crate::notify::{Notification, Notifications};
use crate::store::{PaymentApplied, PaymentRecord, ScanStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Price of a tier in cents.
pub fn price_cents(tier: PaidTier) -> u32 {
    match tier {
        PaidTier::Unlock => 3_900,
        PaidTier::Pro => 25_000,
        PaidTier::Deep => 89_900,
    }
}

/// What a checkout for a scan would charge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutQuote {
    pub scan_id: Uuid,
    pub tier: PaidTier,
    pub amount_cents: u32,
    pub requester: String,
}

/// A payment the processor reports as succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentConfirmation {
    /// Scan the checkout was opened for.
    pub scan_id: Uuid,
    pub tier: PaidTier,
    pub payment_ref: String,
    pub amount_cents: u32,
    /// Scan and tier echoed back from the checkout metadata.
    pub metadata_scan_id: Uuid,
    pub metadata_tier: PaidTier,
}

impl PaymentConfirmation {
    /// A confirmation whose metadata matches the scan and tier.
    pub fn new(scan_id: Uuid, tier: PaidTier, payment_ref: impl Into<String>, amount_cents: u32) -> Self {
        Self {
            scan_id,
            tier,
            payment_ref: payment_ref.into(),
            amount_cents,
            metadata_scan_id: scan_id,
            metadata_tier: tier,
        }
    }
}

/// Result of recording a payment.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    /// The paid tier was raised. `rescan` is the queued child scan, if any.
    Upgraded {
        scan: ScanRequest,
        rescan: Option<ScanRequest>,
    },
    /// The reference was processed before; nothing changed.
    AlreadyProcessed,
    /// The tier does not outrank what is already paid; nothing changed.
    NotAnUpgrade { current: Option<PaidTier> },
}

/// Checkout and payment handling over the scan store.
pub struct Billing {
    store: Arc<dyn ScanStore>,
    notifications: Notifications,
}

impl Billing {
    pub fn new(store: Arc<dyn ScanStore>, notifications: Notifications) -> Self {
        Self {
            store,
            notifications,
        }
    }

    /// Checks that `tier` can be bought for a scan and quotes its price.
    pub async fn quote(&self, scan_id: Uuid, tier: PaidTier) -> Result<CheckoutQuote, ServiceError> {
        let scan = self
            .store
            .get(scan_id)
            .await?
            .ok_or(ServiceError::NotFound)?;

        if !is_upgrade(scan.paid_tier, tier) {
            return Err(ServiceError::Invalid(
                "Already at this tier or higher".to_string(),
            ));
        }

        Ok(CheckoutQuote {
            scan_id,
            tier,
            amount_cents: price_cents(tier),
            requester: scan.requester,
        })
    }

    /// Records a confirmed payment.
    ///
    /// Mismatched metadata or amounts are rejected before anything is
    /// written.
    pub async fn record_payment(
        &self,
        confirmation: PaymentConfirmation,
    ) -> Result<PaymentOutcome, ServiceError> {
        verify(&confirmation)?;

        let record = PaymentRecord {
            scan_id: confirmation.scan_id,
            tier: confirmation.tier,
            payment_ref: confirmation.payment_ref.clone(),
        };

        let applied = self
            .store
            .apply_payment(&record)
            .await
            .map_err(ServiceError::from_store)?;

        match applied {
            PaymentApplied::Duplicate => {
                info!("Payment {} already processed", record.payment_ref);
                Ok(PaymentOutcome::AlreadyProcessed)
            }
            PaymentApplied::NotAnUpgrade(scan) => {
                warn!(
                    "Payment {} for {} does not outrank paid tier {:?} of scan {}",
                    record.payment_ref, record.tier, scan.paid_tier, scan.id
                );
                Ok(PaymentOutcome::NotAnUpgrade {
                    current: scan.paid_tier,
                })
            }
            PaymentApplied::Raised(scan) => {
                info!("Scan {} upgraded to {}", scan.id, record.tier);
                self.notifications
                    .emit(Notification::PaymentReceived {
                        scan_id: scan.id,
                        requester: scan.requester.clone(),
                        tier: record.tier,
                    })
                    .await;

                let rescan = match record.tier.rescan_tier() {
                    Some(depth) => Some(self.queue_rescan(&scan, depth).await?),
                    None => None,
                };

                Ok(PaymentOutcome::Upgraded { scan, rescan })
            }
        }
    }

    async fn queue_rescan(
        &self,
        parent: &ScanRequest,
        depth: crate::models::ScanTier,
    ) -> Result<ScanRequest, ServiceError> {
        let child = ScanRequest::child_of(parent, depth);
        self.store.insert(child.clone()).await?;
        info!("Queued {} rescan {} for scan {}", depth, child.id, parent.id);

        self.notifications
            .emit(Notification::UpgradeStarted {
                scan_id: child.id,
                parent_id: parent.id,
                requester: child.requester.clone(),
                target: child.target.clone(),
                tier: depth,
            })
            .await;

        Ok(child)
    }
}

fn verify(confirmation: &PaymentConfirmation) -> Result<(), ServiceError> {
    if confirmation.payment_ref.trim().is_empty() {
        return Err(ServiceError::Invalid("Missing payment reference".to_string()));
    }
    if confirmation.metadata_scan_id != confirmation.scan_id {
        return Err(ServiceError::Invalid("Scan ID mismatch".to_string()));
    }
    if confirmation.metadata_tier != confirmation.tier {
        return Err(ServiceError::Invalid("Tier mismatch".to_string()));
    }
    let expected = price_cents(confirmation.tier);
    if confirmation.amount_cents != expected {
        return Err(ServiceError::Invalid(format!(
            "Amount mismatch: expected {} cents, got {}",
            expected, confirmation.amount_cents
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ScanStatus, ScanTier};
    use crate::notify::testing::RecordingNotifier;
    use crate::store::StateStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<StateStore>,
        notifier: Arc<RecordingNotifier>,
        billing: Billing,
        scan_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(StateStore::in_memory());
        let notifier = Arc::new(RecordingNotifier::default());
        let billing = Billing::new(
            store.clone(),
            Notifications::new(notifier.clone(), Duration::from_secs(1)),
        );
        let scan = ScanRequest::new("a@example.com", "https://shop.example", ScanTier::Quick);
        let scan_id = scan.id;
        store.insert(scan).await.unwrap();
        Fixture {
            store,
            notifier,
            billing,
            scan_id,
        }
    }

    fn paid(f: &Fixture, tier: PaidTier, payment_ref: &str) -> PaymentConfirmation {
        PaymentConfirmation::new(f.scan_id, tier, payment_ref, price_cents(tier))
    }

    #[test]
    fn test_prices() {
        assert_eq!(price_cents(PaidTier::Unlock), 3_900);
        assert_eq!(price_cents(PaidTier::Pro), 25_000);
        assert_eq!(price_cents(PaidTier::Deep), 89_900);
    }

    #[tokio::test]
    async fn test_quote_rejects_same_or_lower_tier() {
        let f = fixture().await;
        let quote = f.billing.quote(f.scan_id, PaidTier::Pro).await.unwrap();
        assert_eq!(quote.amount_cents, 25_000);

        f.billing.record_payment(paid(&f, PaidTier::Pro, "pi_1")).await.unwrap();

        let err = f.billing.quote(f.scan_id, PaidTier::Pro).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));
        let err = f.billing.quote(f.scan_id, PaidTier::Unlock).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));
        assert!(f.billing.quote(f.scan_id, PaidTier::Deep).await.is_ok());

        let err = f.billing.quote(Uuid::new_v4(), PaidTier::Deep).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound));
    }

    #[tokio::test]
    async fn test_unlock_raises_tier_without_rescan() {
        let f = fixture().await;
        let outcome = f
            .billing
            .record_payment(paid(&f, PaidTier::Unlock, "pi_1"))
            .await
            .unwrap();

        match outcome {
            PaymentOutcome::Upgraded { scan, rescan } => {
                assert_eq!(scan.paid_tier, Some(PaidTier::Unlock));
                assert!(rescan.is_none());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(f.store.children(f.scan_id).await.unwrap().is_empty());
        assert_eq!(f.notifier.kinds(), vec!["payment_received"]);
    }

    #[tokio::test]
    async fn test_deep_payment_queues_child_once() {
        let f = fixture().await;
        let confirmation = paid(&f, PaidTier::Deep, "pi_deep");

        let first = f.billing.record_payment(confirmation.clone()).await.unwrap();
        let child = match first {
            PaymentOutcome::Upgraded {
                rescan: Some(child),
                ..
            } => child,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(child.tier, ScanTier::Deep);
        assert_eq!(child.parent_id, Some(f.scan_id));
        assert_eq!(child.status, ScanStatus::Pending);

        let again = f.billing.record_payment(confirmation).await.unwrap();
        assert_eq!(again, PaymentOutcome::AlreadyProcessed);

        assert_eq!(f.store.children(f.scan_id).await.unwrap().len(), 1);
        assert_eq!(f.notifier.kinds(), vec!["payment_received", "upgrade_started"]);
    }

    #[tokio::test]
    async fn test_lower_tier_after_higher_is_rejected() {
        let f = fixture().await;
        f.billing.record_payment(paid(&f, PaidTier::Pro, "pi_pro")).await.unwrap();

        let outcome = f
            .billing
            .record_payment(paid(&f, PaidTier::Unlock, "pi_unlock"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PaymentOutcome::NotAnUpgrade {
                current: Some(PaidTier::Pro)
            }
        );

        let scan = f.store.get(f.scan_id).await.unwrap().unwrap();
        assert_eq!(scan.paid_tier, Some(PaidTier::Pro));
        assert_eq!(f.store.children(f.scan_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_confirmation_is_rejected() {
        let f = fixture().await;

        let mut wrong_amount = paid(&f, PaidTier::Pro, "pi_1");
        wrong_amount.amount_cents = 100;
        assert!(matches!(
            f.billing.record_payment(wrong_amount).await,
            Err(ServiceError::Invalid(_))
        ));

        let mut wrong_tier = paid(&f, PaidTier::Pro, "pi_2");
        wrong_tier.metadata_tier = PaidTier::Deep;
        assert!(f.billing.record_payment(wrong_tier).await.is_err());

        let mut wrong_scan = paid(&f, PaidTier::Pro, "pi_3");
        wrong_scan.metadata_scan_id = Uuid::new_v4();
        assert!(f.billing.record_payment(wrong_scan).await.is_err());

        let scan = f.store.get(f.scan_id).await.unwrap().unwrap();
        assert!(scan.paid_tier.is_none());
        assert!(f.notifier.kinds().is_empty());
    }

    #[tokio::test]
    async fn test_payment_for_unknown_scan() {
        let f = fixture().await;
        let confirmation =
            PaymentConfirmation::new(Uuid::new_v4(), PaidTier::Unlock, "pi_x", 3_900);
        assert!(matches!(
            f.billing.record_payment(confirmation).await,
            Err(ServiceError::NotFound)
        ));
    }
}
