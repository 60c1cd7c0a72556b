#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::course::CourseId;
use crate::{ContractViolation, Validate};

/// Raw enrollment status as reported by the collaborator. Values outside the known set are
/// kept verbatim so the gate can report them as unknown instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnrollmentStatus {
    Active,
    Pending,
    Cancelled,
    Unrecognized(String),
}

impl EnrollmentStatus {
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => EnrollmentStatus::Active,
            "PENDING" => EnrollmentStatus::Pending,
            "CANCELLED" | "CANCELED" => EnrollmentStatus::Cancelled,
            _ => EnrollmentStatus::Unrecognized(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EnrollmentStatus::Active => "ACTIVE",
            EnrollmentStatus::Pending => "PENDING",
            EnrollmentStatus::Cancelled => "CANCELLED",
            EnrollmentStatus::Unrecognized(raw) => raw.as_str(),
        }
    }
}

impl Serialize for EnrollmentStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EnrollmentStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRef {
    pub id: CourseId,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    #[serde(alias = "courseId")]
    pub course_id: CourseId,
    pub status: EnrollmentStatus,
    #[serde(default)]
    pub course: Option<CourseRef>,
}

impl Enrollment {
    pub fn v1(
        course_id: CourseId,
        status: EnrollmentStatus,
        course: Option<CourseRef>,
    ) -> Result<Self, ContractViolation> {
        let enrollment = Self {
            course_id,
            status,
            course,
        };
        enrollment.validate()?;
        Ok(enrollment)
    }
}

impl Validate for Enrollment {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.course_id.validate()?;
        if let Some(course) = &self.course {
            if course.id != self.course_id {
                return Err(ContractViolation::InvalidValue {
                    field: "enrollment.course.id",
                    reason: "must match enrollment.course_id",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchState {
    Idle,
    Loading,
    Ready,
    Error,
}

/// Immutable enrollment-cache state. Replaced wholesale on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentCacheState {
    pub fetch_state: FetchState,
    pub error: Option<String>,
    pub records: BTreeMap<CourseId, Enrollment>,
}

impl EnrollmentCacheState {
    pub fn idle() -> Self {
        Self {
            fetch_state: FetchState::Idle,
            error: None,
            records: BTreeMap::new(),
        }
    }

    pub fn loading_from(previous: &Self) -> Self {
        Self {
            fetch_state: FetchState::Loading,
            error: None,
            records: previous.records.clone(),
        }
    }

    /// Later entries for the same course overwrite earlier ones; invalid course ids are
    /// skipped.
    pub fn ready(enrollments: Vec<Enrollment>) -> Self {
        let records = enrollments
            .into_iter()
            .filter(|e| e.course_id.validate().is_ok())
            .map(|e| (e.course_id, e))
            .collect();
        Self {
            fetch_state: FetchState::Ready,
            error: None,
            records,
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            fetch_state: FetchState::Error,
            error: Some(message),
            records: BTreeMap::new(),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.fetch_state, FetchState::Idle | FetchState::Loading)
    }

    pub fn enrollment(&self, course_id: CourseId) -> Option<&Enrollment> {
        self.records.get(&course_id)
    }
}
