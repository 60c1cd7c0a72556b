#![forbid(unsafe_code)]

use coursegate_kernel_contracts::course::LessonId;
use coursegate_kernel_contracts::gate::{LessonRow, NavigationView};
use coursegate_kernel_contracts::progress::ProgressStatus;

/// Picks the lesson a learner should land on. `None` means there is nothing to open.
///
/// Preference order, considering unlocked rows only:
/// 1. the most recently updated `IN_PROGRESS` row (rows without a timestamp rank last),
/// 2. the first row that is not `COMPLETED`,
/// 3. the last row of the course.
pub fn pick_continue_lesson(rows: &[LessonRow]) -> Option<LessonId> {
    let mut best_in_progress: Option<&LessonRow> = None;
    for row in rows
        .iter()
        .filter(|row| row.unlocked && row.status == ProgressStatus::InProgress)
    {
        let better = match best_in_progress {
            None => true,
            Some(current) => match (row.updated_at, current.updated_at) {
                (Some(candidate), Some(held)) => candidate > held,
                (Some(_), None) => true,
                _ => false,
            },
        };
        if better {
            best_in_progress = Some(row);
        }
    }
    if let Some(row) = best_in_progress {
        return Some(row.lesson.id);
    }

    rows.iter()
        .find(|row| row.unlocked && row.status != ProgressStatus::Completed)
        .or_else(|| rows.last())
        .map(|row| row.lesson.id)
}

pub fn navigate(rows: &[LessonRow], lesson_id: LessonId) -> NavigationView {
    let Some(index) = rows.iter().position(|row| row.lesson.id == lesson_id) else {
        return NavigationView::permissive();
    };
    let prev_id = index
        .checked_sub(1)
        .and_then(|prev| rows.get(prev))
        .map(|row| row.lesson.id);
    let next_id = rows
        .get(index + 1)
        .filter(|row| row.unlocked)
        .map(|row| row.lesson.id);
    NavigationView {
        prev_id,
        next_id,
        unlocked: rows[index].unlocked,
    }
}

pub fn lesson_status(rows: &[LessonRow], lesson_id: LessonId) -> ProgressStatus {
    rows.iter()
        .find(|row| row.lesson.id == lesson_id)
        .map(|row| row.status)
        .unwrap_or(ProgressStatus::NotStarted)
}

pub fn lock_reason(rows: &[LessonRow], lesson_id: LessonId) -> Option<&'static str> {
    rows.iter()
        .find(|row| row.lesson.id == lesson_id)
        .and_then(|row| row.locked_reason)
}
