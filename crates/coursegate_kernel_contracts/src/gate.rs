#![forbid(unsafe_code)]

use serde::Serialize;

use crate::course::{Lesson, LessonId};
use crate::progress::ProgressStatus;
use crate::{ReasonCodeId, UnixTimeMs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Active,
    Pending,
    Cancelled,
    NotEnrolled,
    Unknown,
}

impl GateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GateStatus::Active => "ACTIVE",
            GateStatus::Pending => "PENDING",
            GateStatus::Cancelled => "CANCELLED",
            GateStatus::NotEnrolled => "NOT_ENROLLED",
            GateStatus::Unknown => "UNKNOWN",
        }
    }

    /// Statuses that an out-of-band settlement can still move.
    pub fn is_transitional(self) -> bool {
        matches!(self, GateStatus::Pending)
    }
}

/// Per-course enrollment gate decision. `status` and `can_access` are independent:
/// an administrative bypass grants access without changing the reported status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    pub status: GateStatus,
    pub can_access: bool,
    pub reason: Option<&'static str>,
    pub reason_code: Option<ReasonCodeId>,
    pub loading: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonRow {
    pub lesson: Lesson,
    pub status: ProgressStatus,
    pub unlocked: bool,
    pub locked_reason: Option<&'static str>,
    pub updated_at: Option<UnixTimeMs>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NavigationView {
    pub prev_id: Option<LessonId>,
    pub next_id: Option<LessonId>,
    pub unlocked: bool,
}

impl NavigationView {
    /// Returned for lesson ids that are not part of the row list.
    pub fn permissive() -> Self {
        Self {
            prev_id: None,
            next_id: None,
            unlocked: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CourseProgressSummary {
    pub total_lessons: u32,
    pub completed_lessons: u32,
    pub in_progress_lessons: u32,
    pub percent_complete: u8,
    pub all_completed: bool,
}
