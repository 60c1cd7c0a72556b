#![forbid(unsafe_code)]

use coursegate_kernel_contracts::course::{CourseId, LessonId};
use coursegate_kernel_contracts::enrollment::Enrollment;
use coursegate_kernel_contracts::order::Order;
use coursegate_kernel_contracts::progress::ProgressStatus;
use futures::future::BoxFuture;

pub const BACKEND_ERROR_FALLBACK: &str = "The request failed. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("http status {code}: {message}")]
    Status { code: u16, message: String },
    #[error("response decode failure: {0}")]
    Decode(String),
}

impl BackendError {
    /// Collaborator-supplied text, verbatim, or a generic fallback when there is none.
    pub fn message(&self) -> String {
        let raw = match self {
            BackendError::Transport(message)
            | BackendError::Status { message, .. }
            | BackendError::Decode(message) => message.trim(),
        };
        if raw.is_empty() {
            BACKEND_ERROR_FALLBACK.to_string()
        } else {
            raw.to_string()
        }
    }
}

/// REST collaborator contract, scoped to the signed-in user.
pub trait CourseAccessBackend: Send + Sync + 'static {
    fn fetch_my_enrollments(&self) -> BoxFuture<'static, Result<Vec<Enrollment>, BackendError>>;

    fn fetch_my_orders(&self) -> BoxFuture<'static, Result<Vec<Order>, BackendError>>;

    /// Creating an order has the server-side effect of a `PENDING` enrollment.
    fn create_order(&self, course_id: CourseId) -> BoxFuture<'static, Result<Order, BackendError>>;

    fn touch_progress(
        &self,
        lesson_id: LessonId,
        status: ProgressStatus,
    ) -> BoxFuture<'static, Result<(), BackendError>>;
}
