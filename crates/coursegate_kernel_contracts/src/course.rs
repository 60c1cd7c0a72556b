#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_text;
use crate::{ContractViolation, Validate};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CourseId(pub u64);

impl CourseId {
    pub fn new(id: u64) -> Result<Self, ContractViolation> {
        let id = Self(id);
        id.validate()?;
        Ok(id)
    }

    /// Coerces a loosely-typed course id (route segment, query value, JSON scalar rendered as
    /// text) into a positive finite integer. Anything else is `None`.
    pub fn coerce(raw: &str) -> Option<Self> {
        coerce_positive_id(raw).map(Self)
    }
}

impl Validate for CourseId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "course_id",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LessonId(pub u64);

impl LessonId {
    /// Same coercion rules as [`CourseId::coerce`].
    pub fn coerce(raw: &str) -> Option<Self> {
        coerce_positive_id(raw).map(Self)
    }
}

impl Validate for LessonId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "lesson_id",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    #[serde(default, alias = "courseId")]
    pub course_id: Option<CourseId>,
    #[serde(default)]
    pub title: String,
    /// Position within the course. Missing positions sort as 0.
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default = "default_published")]
    pub published: bool,
}

fn default_published() -> bool {
    true
}

impl Lesson {
    pub fn v1(
        id: LessonId,
        course_id: Option<CourseId>,
        title: String,
        order: Option<i64>,
        published: bool,
    ) -> Result<Self, ContractViolation> {
        let lesson = Self {
            id,
            course_id,
            title,
            order,
            published,
        };
        lesson.validate()?;
        Ok(lesson)
    }

    /// Total order key within a course.
    pub fn sort_key(&self) -> (i64, LessonId) {
        (self.order.unwrap_or(0), self.id)
    }
}

impl Validate for Lesson {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        if let Some(course_id) = self.course_id {
            course_id.validate()?;
        }
        if !self.title.is_empty() {
            validate_text("lesson.title", &self.title, 512)?;
        }
        Ok(())
    }
}

fn coerce_positive_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<u64>() {
        return (id > 0).then_some(id);
    }
    let value = raw.parse::<f64>().ok()?;
    if !value.is_finite() || value <= 0.0 || value.fract() != 0.0 || value > u64::MAX as f64 {
        return None;
    }
    Some(value as u64)
}
