#![forbid(unsafe_code)]

use coursegate_kernel_contracts::course::CourseId;
use coursegate_kernel_contracts::order::Order;

use crate::kv::DurableKv;
use crate::pending_orders::{PendingOrderMemory, PendingOrderRecord};

/// Typed repository interface for pending-order memory. Implementations never fail
/// outward; storage trouble reads as "nothing remembered".
pub trait PendingOrderRepo: Send + Sync {
    fn pending_order(&self, course_id: CourseId) -> Option<PendingOrderRecord>;
    fn remember_pending_order(&self, order: &Order);
    fn clear_pending_order(&self, course_id: CourseId);
}

impl<K> PendingOrderRepo for PendingOrderMemory<K>
where
    K: DurableKv,
{
    fn pending_order(&self, course_id: CourseId) -> Option<PendingOrderRecord> {
        self.load(course_id)
    }

    fn remember_pending_order(&self, order: &Order) {
        self.remember(order)
    }

    fn clear_pending_order(&self, course_id: CourseId) {
        self.clear(course_id)
    }
}
