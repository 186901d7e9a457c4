//! Request-facing operations: submitting scans, polling progress, viewing
//! results, cancelling, and the admin listing.
//!
//! Everything here reads or writes through the scan store only, so the
//! service never waits on the worker.

use crate::config::LimitsConfig;
use crate::disclosure::{disclose, ReportView};
use crate::error::{ServiceError, StoreError};
use crate::models::{
    FailureCause, Finding, FindingSummary, PaidTier, ProgressSnapshot, RiskLevel, ScanRequest,
    ScanStatus, ScanTier,
};
use crate::store::{ScanStore, ScanUpdate};
use chrono::{DateTime, Duration, Utc};
use constant_time_eq::constant_time_eq;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::{Host, Url};
use uuid::Uuid;

/// Scans shown in the admin listing.
const ADMIN_LISTING_LIMIT: usize = 100;

/// A new scan as submitted by a requester.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub requester: String,
    pub target: String,
    /// The requester confirmed they are authorized to test the target.
    pub consent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressView {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    pub progress: Option<ProgressSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
}

/// Whether stored results can still be viewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    /// Unpaid results past the retention window.
    Expired,
}

/// Results of a scan as the viewer is entitled to see them.
#[derive(Debug, Clone, Serialize)]
pub struct ResultsView {
    pub scan_id: Uuid,
    pub target: String,
    /// Depth of the run the results come from.
    pub scan_type: ScanTier,
    pub completed_at: Option<DateTime<Utc>>,
    pub paid_tier: Option<PaidTier>,
    pub availability: Availability,
    pub expires_at: Option<DateTime<Utc>>,
    pub risk_level: RiskLevel,
    pub summary: FindingSummary,
    pub findings: Vec<Finding>,
    pub report: Option<ReportView>,
}

/// The newest upgrade rescan of a scan.
#[derive(Debug, Clone, Serialize)]
pub struct ChildStatus {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    pub scan_type: ScanTier,
    pub progress: Option<ProgressSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminScanEntry {
    pub id: Uuid,
    pub requester: String,
    pub target: String,
    pub status: ScanStatus,
    pub scan_type: ScanTier,
    pub paid_tier: Option<PaidTier>,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cost: Option<f64>,
    pub tools: Option<u64>,
    pub active_agents: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminSummary {
    pub counts: BTreeMap<&'static str, usize>,
    pub scans: Vec<AdminScanEntry>,
}

pub struct ScanService {
    store: Arc<dyn ScanStore>,
    limits: LimitsConfig,
    admin_key: Option<String>,
}

impl ScanService {
    pub fn new(store: Arc<dyn ScanStore>, limits: LimitsConfig, admin_key: Option<String>) -> Self {
        Self {
            store,
            limits,
            admin_key,
        }
    }

    /// Validates and queues a new quick scan.
    pub async fn submit(&self, request: SubmitRequest) -> Result<ScanRequest, ServiceError> {
        self.submit_at(request, Utc::now()).await
    }

    pub async fn submit_at(
        &self,
        request: SubmitRequest,
        now: DateTime<Utc>,
    ) -> Result<ScanRequest, ServiceError> {
        if !request.consent {
            return Err(ServiceError::Invalid(
                "Authorization consent is required".to_string(),
            ));
        }

        let requester = request.requester.trim().to_lowercase();
        validate_email(&requester)?;
        let target = request.target.trim().to_string();
        validate_target(&target).await?;

        if self.limits.is_unlimited(&requester) {
            debug!("{} is exempt from the monthly limit", mask_email(&requester));
        } else {
            let month = now.format("%Y-%m").to_string();
            let allowed = self
                .store
                .consume_quota(&requester, &month, self.limits.scans_per_month)
                .await?;
            if !allowed {
                info!("Monthly limit reached for {}", mask_email(&requester));
                return Err(ServiceError::RateLimited {
                    limit: self.limits.scans_per_month,
                });
            }
        }

        let scan = ScanRequest::new(requester, target, ScanTier::Quick);
        self.store.insert(scan.clone()).await?;
        info!("Queued scan {} for {}", scan.id, scan.target);
        Ok(scan)
    }

    pub async fn progress(&self, scan_id: Uuid) -> Result<ProgressView, ServiceError> {
        let scan = self.load(scan_id).await?;
        Ok(ProgressView {
            scan_id,
            status: scan.status,
            progress: scan.progress,
            failure: scan.failure,
        })
    }

    /// Results of a completed scan, redacted for its paid tier.
    pub async fn results(&self, scan_id: Uuid) -> Result<ResultsView, ServiceError> {
        self.results_at(scan_id, Utc::now()).await
    }

    /// Like [`results`](Self::results), evaluating expiry at `now`.
    ///
    /// When an upgrade rescan has completed, its results stand in for the
    /// parent's; access is always decided by the parent's paid tier.
    pub async fn results_at(
        &self,
        scan_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ResultsView, ServiceError> {
        let scan = self.load(scan_id).await?;
        if scan.status != ScanStatus::Completed {
            return Err(ServiceError::NotCompleted {
                status: scan.status,
            });
        }

        let latest_child = self
            .store
            .children(scan_id)
            .await?
            .into_iter()
            .filter(|c| c.status == ScanStatus::Completed)
            .max_by_key(|c| c.completed_at);
        let source = latest_child.as_ref().unwrap_or(&scan);
        if source.id != scan.id {
            debug!("Serving results of rescan {} for scan {}", source.id, scan.id);
        }

        let results = source.results.clone().unwrap_or_default();
        let disclosed = disclose(&results, scan.paid_tier);

        let expires_at = match scan.paid_tier {
            Some(_) => None,
            None => Some(scan.created_at + Duration::days(self.limits.retention_days)),
        };
        let expired = expires_at.map(|at| now >= at).unwrap_or(false);

        let (availability, findings, report) = if expired {
            (Availability::Expired, Vec::new(), None)
        } else {
            (Availability::Available, disclosed.findings, disclosed.report)
        };

        Ok(ResultsView {
            scan_id,
            target: scan.target.clone(),
            scan_type: source.tier,
            completed_at: source.completed_at,
            paid_tier: scan.paid_tier,
            availability,
            expires_at,
            risk_level: disclosed.risk_level,
            summary: FindingSummary::from_findings(&findings),
            findings,
            report,
        })
    }

    /// Status of the newest rescan spawned from a scan, if any.
    pub async fn child_status(&self, scan_id: Uuid) -> Result<Option<ChildStatus>, ServiceError> {
        self.load(scan_id).await?;
        let newest = self
            .store
            .children(scan_id)
            .await?
            .into_iter()
            .max_by_key(|c| c.created_at);

        Ok(newest.map(|child| ChildStatus {
            scan_id: child.id,
            status: child.status,
            scan_type: child.tier,
            progress: child.progress,
        }))
    }

    /// Requests cancellation. A pending scan fails immediately; a running
    /// one moves to `cancelling` until the worker tears it down.
    pub async fn cancel(&self, scan_id: Uuid) -> Result<ScanStatus, ServiceError> {
        let scan = self
            .store
            .update(scan_id, ScanUpdate::CancelRequested)
            .await
            .map_err(|e| match e {
                StoreError::InvalidTransition { from, .. } => {
                    ServiceError::Invalid(format!("Cannot cancel a scan that is {}", from))
                }
                other => ServiceError::from_store(other),
            })?;
        info!("Cancel requested for scan {} (now {})", scan_id, scan.status);
        Ok(scan.status)
    }

    /// Recent scans with status counts, for operators holding the admin key.
    pub async fn admin_summary(&self, key: &str) -> Result<AdminSummary, ServiceError> {
        let expected = self
            .admin_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ServiceError::Forbidden)?;
        if !constant_time_eq(expected.as_bytes(), key.as_bytes()) {
            warn!("Rejected admin request with a bad key");
            return Err(ServiceError::Forbidden);
        }

        let recent = self.store.recent(ADMIN_LISTING_LIMIT).await?;

        let mut counts: BTreeMap<&'static str, usize> = [
            ScanStatus::Pending,
            ScanStatus::Running,
            ScanStatus::Cancelling,
            ScanStatus::Completed,
            ScanStatus::Failed,
        ]
        .iter()
        .map(|s| (s.as_str(), 0))
        .collect();

        let scans = recent
            .into_iter()
            .map(|scan| {
                *counts.entry(scan.status.as_str()).or_insert(0) += 1;
                admin_entry(scan)
            })
            .collect();

        Ok(AdminSummary { counts, scans })
    }

    async fn load(&self, scan_id: Uuid) -> Result<ScanRequest, ServiceError> {
        self.store.get(scan_id).await?.ok_or(ServiceError::NotFound)
    }
}

fn admin_entry(scan: ScanRequest) -> AdminScanEntry {
    let live = matches!(
        scan.status,
        ScanStatus::Running | ScanStatus::Cancelling | ScanStatus::Completed | ScanStatus::Failed
    );
    let progress = scan.progress.as_ref().filter(|_| live);

    AdminScanEntry {
        id: scan.id,
        requester: mask_email(&scan.requester),
        target: scan.target.clone(),
        status: scan.status,
        scan_type: scan.tier,
        paid_tier: scan.paid_tier,
        parent_id: scan.parent_id,
        created_at: scan.created_at,
        completed_at: scan.completed_at,
        cost: progress.map(|p| p.cost),
        tools: progress.map(|p| p.tools),
        active_agents: progress
            .filter(|_| scan.status.is_active())
            .map(|p| p.active_agents),
    }
}

fn validate_email(email: &str) -> Result<(), ServiceError> {
    let invalid = || ServiceError::Invalid(format!("Invalid email address: {}", email));
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
    {
        return Err(invalid());
    }
    Ok(())
}

/// Checks that a target is a public http(s) URL.
///
/// Hosts that resolve to private, loopback, link-local or reserved
/// addresses are refused. A failed lookup is let through; the engine will
/// report an unreachable target on its own.
pub async fn validate_target(target: &str) -> Result<(), ServiceError> {
    let url = Url::parse(target)
        .map_err(|e| ServiceError::Invalid(format!("Invalid target URL: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ServiceError::Invalid(
            "Target URL must use http or https".to_string(),
        ));
    }

    let blocked = || ServiceError::Invalid("Target resolves to a non-public address".to_string());
    let port = url.port_or_known_default().unwrap_or(80);

    match url.host() {
        None => Err(ServiceError::Invalid(
            "Target URL must have a hostname".to_string(),
        )),
        Some(Host::Ipv4(ip)) if is_blocked_v4(ip) => Err(blocked()),
        Some(Host::Ipv6(ip)) if is_blocked_v6(ip) => Err(blocked()),
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => Ok(()),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_lowercase();
            if domain == "localhost"
                || domain == "localhost.localdomain"
                || domain.ends_with(".localhost")
            {
                return Err(blocked());
            }

            let resolved = tokio::net::lookup_host((domain.as_str(), port)).await;
            match resolved {
                Ok(addrs) => {
                    for addr in addrs {
                        if is_blocked(addr.ip()) {
                            warn!("Refusing {}: resolves to {}", domain, addr.ip());
                            return Err(blocked());
                        }
                    }
                    Ok(())
                }
                Err(e) => {
                    debug!("Could not resolve {}: {}", domain, e);
                    Ok(())
                }
            }
        }
    }
}

fn is_blocked(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b & 0xfe) == 18)
        || a >= 240
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}

/// Keeps the first character of the local part: `a***@example.com`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}
