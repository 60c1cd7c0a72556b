#![forbid(unsafe_code)]

use coursegate_kernel_contracts::course::CourseId;
use coursegate_kernel_contracts::enrollment::{EnrollmentCacheState, EnrollmentStatus, FetchState};
use coursegate_kernel_contracts::gate::{GateSnapshot, GateStatus};
use coursegate_kernel_contracts::{ReasonCodeId, Validate};

pub mod reason_codes {
    use coursegate_kernel_contracts::ReasonCodeId;

    // GATE reason-code namespace.
    pub const GATE_DENY_PENDING: ReasonCodeId = ReasonCodeId(0x4741_0001);
    pub const GATE_DENY_CANCELLED: ReasonCodeId = ReasonCodeId(0x4741_0002);
    pub const GATE_DENY_NOT_ENROLLED: ReasonCodeId = ReasonCodeId(0x4741_0003);
    pub const GATE_DENY_UNDETERMINED: ReasonCodeId = ReasonCodeId(0x4741_0004);
    pub const GATE_ALLOW_ADMIN_BYPASS: ReasonCodeId = ReasonCodeId(0x4741_0010);
}

pub const REASON_PENDING: &str =
    "Your order is awaiting payment confirmation. Lessons unlock once it has been marked paid.";
pub const REASON_CANCELLED: &str = "Your enrollment in this course has been cancelled.";
pub const REASON_NOT_ENROLLED: &str =
    "You are not enrolled in this course. Purchase it to unlock the lessons.";
pub const REASON_UNDETERMINED: &str =
    "We could not determine your enrollment status. Please try again shortly.";

/// Pure gate decision for one course.
///
/// An invalid course id resolves to `NotEnrolled` without reading `state`. A cache in the
/// error state knows nothing about any course, so every course resolves to `Unknown`.
pub fn resolve_gate(
    course_id: CourseId,
    state: &EnrollmentCacheState,
    admin_bypass: bool,
) -> GateSnapshot {
    if course_id.validate().is_err() {
        return GateSnapshot {
            status: GateStatus::NotEnrolled,
            can_access: false,
            reason: Some(REASON_NOT_ENROLLED),
            reason_code: Some(reason_codes::GATE_DENY_NOT_ENROLLED),
            loading: false,
        };
    }

    let status = if state.fetch_state == FetchState::Error {
        GateStatus::Unknown
    } else {
        match state.enrollment(course_id).map(|e| &e.status) {
            None => GateStatus::NotEnrolled,
            Some(EnrollmentStatus::Active) => GateStatus::Active,
            Some(EnrollmentStatus::Pending) => GateStatus::Pending,
            Some(EnrollmentStatus::Cancelled) => GateStatus::Cancelled,
            Some(EnrollmentStatus::Unrecognized(_)) => GateStatus::Unknown,
        }
    };

    let (reason, deny_code) = deny_reason(status);
    let reason_code = if status != GateStatus::Active && admin_bypass {
        Some(reason_codes::GATE_ALLOW_ADMIN_BYPASS)
    } else {
        deny_code
    };
    GateSnapshot {
        status,
        can_access: admin_bypass || status == GateStatus::Active,
        reason,
        reason_code,
        loading: state.is_loading(),
    }
}

fn deny_reason(status: GateStatus) -> (Option<&'static str>, Option<ReasonCodeId>) {
    match status {
        GateStatus::Active => (None, None),
        GateStatus::Pending => (Some(REASON_PENDING), Some(reason_codes::GATE_DENY_PENDING)),
        GateStatus::Cancelled => (
            Some(REASON_CANCELLED),
            Some(reason_codes::GATE_DENY_CANCELLED),
        ),
        GateStatus::NotEnrolled => (
            Some(REASON_NOT_ENROLLED),
            Some(reason_codes::GATE_DENY_NOT_ENROLLED),
        ),
        GateStatus::Unknown => (
            Some(REASON_UNDETERMINED),
            Some(reason_codes::GATE_DENY_UNDETERMINED),
        ),
    }
}
