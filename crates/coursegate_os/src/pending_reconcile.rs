#![forbid(unsafe_code)]

use std::sync::Arc;

use coursegate_engines::gate::resolve_gate;
use coursegate_engines::order_scan::newest_pending_order;
use coursegate_kernel_contracts::course::CourseId;
use coursegate_kernel_contracts::gate::GateStatus;
use coursegate_kernel_contracts::Validate;
use coursegate_storage::pending_orders::PendingOrderRecord;
use coursegate_storage::repo::PendingOrderRepo;
use tracing::{debug, warn};

use crate::backend::CourseAccessBackend;
use crate::enrollment_cache::EnrollmentCache;

/// Keeps the pending-order memory of one course in line with its current gate status.
///
/// `ACTIVE` clears the entry. `PENDING` with nothing remembered scans the user's orders for
/// the newest pending one of this course and remembers it; the scan never fails outward.
/// Any other status leaves the memory untouched.
pub async fn reconcile_pending_order(
    backend: &Arc<dyn CourseAccessBackend>,
    repo: &dyn PendingOrderRepo,
    cache: &EnrollmentCache,
    course_id: CourseId,
) -> Option<PendingOrderRecord> {
    if course_id.validate().is_err() {
        return None;
    }
    match current_status(cache, course_id) {
        GateStatus::Active => {
            repo.clear_pending_order(course_id);
            None
        }
        GateStatus::Pending => {
            if let Some(record) = repo.pending_order(course_id) {
                return Some(record);
            }
            scan_and_remember(backend, repo, cache, course_id).await
        }
        GateStatus::Cancelled | GateStatus::NotEnrolled | GateStatus::Unknown => {
            repo.pending_order(course_id)
        }
    }
}

fn current_status(cache: &EnrollmentCache, course_id: CourseId) -> GateStatus {
    resolve_gate(course_id, &cache.snapshot(), false).status
}

async fn scan_and_remember(
    backend: &Arc<dyn CourseAccessBackend>,
    repo: &dyn PendingOrderRepo,
    cache: &EnrollmentCache,
    course_id: CourseId,
) -> Option<PendingOrderRecord> {
    let orders = match backend.fetch_my_orders().await {
        Ok(orders) => orders,
        Err(err) => {
            warn!(course_id = course_id.0, error = %err, "pending order scan failed");
            return None;
        }
    };
    let newest = newest_pending_order(&orders, course_id)?;
    // The gate may have settled while the scan was out.
    if current_status(cache, course_id) != GateStatus::Pending {
        debug!(course_id = course_id.0, "gate left pending during order scan");
        return None;
    }
    repo.remember_pending_order(newest);
    Some(
        repo.pending_order(course_id)
            .unwrap_or_else(|| PendingOrderRecord::from_order(newest)),
    )
}
