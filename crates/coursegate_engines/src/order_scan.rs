#![forbid(unsafe_code)]

use coursegate_kernel_contracts::course::CourseId;
use coursegate_kernel_contracts::order::Order;

/// Newest `PENDING` order for `course_id`, by creation time and then order id.
pub fn newest_pending_order(orders: &[Order], course_id: CourseId) -> Option<&Order> {
    orders
        .iter()
        .filter(|order| order.is_pending_for(course_id))
        .max_by_key(|order| (order.created_at, order.id))
}
