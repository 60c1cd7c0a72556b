#![forbid(unsafe_code)]

use coursegate_kernel_contracts::gate::{CourseProgressSummary, LessonRow};
use coursegate_kernel_contracts::progress::ProgressStatus;

pub fn summarize(rows: &[LessonRow]) -> CourseProgressSummary {
    let total = rows.len() as u32;
    let completed = rows
        .iter()
        .filter(|row| row.status == ProgressStatus::Completed)
        .count() as u32;
    let in_progress = rows
        .iter()
        .filter(|row| row.status == ProgressStatus::InProgress)
        .count() as u32;
    let percent_complete = if total == 0 {
        0
    } else {
        (u64::from(completed) * 100 / u64::from(total)) as u8
    };
    CourseProgressSummary {
        total_lessons: total,
        completed_lessons: completed,
        in_progress_lessons: in_progress,
        percent_complete,
        all_completed: total > 0 && completed == total,
    }
}
