#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use coursegate_kernel_contracts::course::{Lesson, LessonId};
use coursegate_kernel_contracts::gate::LessonRow;
use coursegate_kernel_contracts::progress::{ProgressRecord, ProgressRecordWire, ProgressStatus};
use coursegate_kernel_contracts::UnixTimeMs;

pub const LOCKED_REASON_PREVIOUS_INCOMPLETE: &str =
    "Complete the previous lesson to unlock this one.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressIndexConfig {
    /// Drop unpublished lessons before building the chain.
    pub published_only: bool,
}

impl ProgressIndexConfig {
    pub fn mvp_v1() -> Self {
        Self {
            published_only: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressIndexRuntime {
    config: ProgressIndexConfig,
}

impl ProgressIndexRuntime {
    pub fn new(config: ProgressIndexConfig) -> Self {
        Self { config }
    }

    /// Builds the ordered lesson rows from collaborator-shaped progress records.
    pub fn build_rows(
        &self,
        lessons: &[Lesson],
        records: Option<&[ProgressRecordWire]>,
    ) -> Vec<LessonRow> {
        let normalized = records
            .unwrap_or_default()
            .iter()
            .filter_map(ProgressRecordWire::normalize)
            .collect::<Vec<_>>();
        self.build_rows_from_records(lessons, &normalized)
    }

    pub fn build_rows_from_records(
        &self,
        lessons: &[Lesson],
        records: &[ProgressRecord],
    ) -> Vec<LessonRow> {
        let mut sorted = lessons
            .iter()
            .filter(|lesson| !self.config.published_only || lesson.published)
            .collect::<Vec<_>>();
        sorted.sort_by_key(|lesson| lesson.sort_key());

        // Records for lessons outside the current list are never looked up.
        let lookup: BTreeMap<LessonId, (ProgressStatus, Option<UnixTimeMs>)> = records
            .iter()
            .map(|record| (record.lesson_id, (record.status, record.updated_at)))
            .collect();

        let mut rows = Vec::with_capacity(sorted.len());
        let mut previous_status: Option<ProgressStatus> = None;
        for lesson in sorted {
            let (status, updated_at) = lookup
                .get(&lesson.id)
                .copied()
                .unwrap_or((ProgressStatus::NotStarted, None));
            let unlocked = match previous_status {
                None => true,
                Some(prev) => prev == ProgressStatus::Completed,
            };
            rows.push(LessonRow {
                lesson: lesson.clone(),
                status,
                unlocked,
                locked_reason: (!unlocked).then_some(LOCKED_REASON_PREVIOUS_INCOMPLETE),
                updated_at,
            });
            previous_status = Some(status);
        }
        rows
    }
}

impl Default for ProgressIndexRuntime {
    fn default() -> Self {
        Self::new(ProgressIndexConfig::mvp_v1())
    }
}
