#![forbid(unsafe_code)]

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use crate::course::LessonId;
use crate::{ContractViolation, UnixTimeMs, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl ProgressStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "NOT_STARTED",
            ProgressStatus::InProgress => "IN_PROGRESS",
            ProgressStatus::Completed => "COMPLETED",
        }
    }

    /// Unknown or missing values collapse to `NotStarted`.
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_uppercase()) {
            Some(s) if s == "IN_PROGRESS" => ProgressStatus::InProgress,
            Some(s) if s == "COMPLETED" => ProgressStatus::Completed,
            _ => ProgressStatus::NotStarted,
        }
    }
}

/// Canonical per-lesson progress. The only shape the engines ever see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressRecord {
    pub lesson_id: LessonId,
    pub status: ProgressStatus,
    pub updated_at: Option<UnixTimeMs>,
}

impl ProgressRecord {
    pub fn v1(
        lesson_id: LessonId,
        status: ProgressStatus,
        updated_at: Option<UnixTimeMs>,
    ) -> Result<Self, ContractViolation> {
        let record = Self {
            lesson_id,
            status,
            updated_at,
        };
        record.validate()?;
        Ok(record)
    }
}

impl Validate for ProgressRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.lesson_id.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(u64),
    Text(String),
    Other(IgnoredAny),
}

impl WireTimestamp {
    fn resolve(&self) -> Option<UnixTimeMs> {
        match self {
            WireTimestamp::Millis(ms) => Some(UnixTimeMs(*ms)),
            WireTimestamp::Text(text) => UnixTimeMs::parse(text),
            WireTimestamp::Other(_) => None,
        }
    }
}

/// Lesson ids arrive as numbers or numeric strings; anything else names no lesson.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireLessonId {
    Number(u64),
    Float(f64),
    Text(String),
    Other(IgnoredAny),
}

impl WireLessonId {
    fn resolve(&self) -> Option<LessonId> {
        let id = match self {
            WireLessonId::Number(id) => LessonId(*id),
            WireLessonId::Float(value) => LessonId::coerce(&value.to_string())?,
            WireLessonId::Text(text) => LessonId::coerce(text)?,
            WireLessonId::Other(_) => return None,
        };
        id.validate().ok().map(|_| id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NestedProgressWire {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "updated_at")]
    #[serde(rename = "updatedAt")]
    updated_at: Option<WireTimestamp>,
}

/// Progress record as delivered by the collaborator. Both the flat shape
/// `{lessonId, status, updatedAt}` and the nested shape
/// `{lessonId, progress: {status, updatedAt}}` are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressRecordWire {
    #[serde(default, alias = "lesson_id")]
    #[serde(rename = "lessonId")]
    lesson_id: Option<WireLessonId>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "updated_at")]
    #[serde(rename = "updatedAt")]
    updated_at: Option<WireTimestamp>,
    #[serde(default)]
    progress: Option<NestedProgressWire>,
}

impl ProgressRecordWire {
    pub fn flat(lesson_id: u64, status: Option<&str>, updated_at: Option<u64>) -> Self {
        Self {
            lesson_id: Some(WireLessonId::Number(lesson_id)),
            status: status.map(str::to_string),
            updated_at: updated_at.map(WireTimestamp::Millis),
            progress: None,
        }
    }

    pub fn nested(lesson_id: u64, status: Option<&str>, updated_at: Option<u64>) -> Self {
        Self {
            lesson_id: Some(WireLessonId::Number(lesson_id)),
            status: None,
            updated_at: None,
            progress: Some(NestedProgressWire {
                status: status.map(str::to_string),
                updated_at: updated_at.map(WireTimestamp::Millis),
            }),
        }
    }

    /// Flat fields win; nested fields fill in whatever the flat shape left empty.
    /// Returns `None` for records that cannot name a lesson.
    pub fn normalize(&self) -> Option<ProgressRecord> {
        let lesson_id = self.lesson_id.as_ref().and_then(WireLessonId::resolve)?;
        let nested = self.progress.as_ref();
        let status = self
            .status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| nested.and_then(|p| p.status.as_deref()));
        let updated_at = self
            .updated_at
            .as_ref()
            .and_then(WireTimestamp::resolve)
            .or_else(|| {
                nested
                    .and_then(|p| p.updated_at.as_ref())
                    .and_then(WireTimestamp::resolve)
            });
        Some(ProgressRecord {
            lesson_id,
            status: ProgressStatus::from_wire(status),
            updated_at,
        })
    }
}
