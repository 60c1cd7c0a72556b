#![forbid(unsafe_code)]

use std::time::Duration;

use coursegate_kernel_contracts::course::{CourseId, LessonId};
use coursegate_kernel_contracts::enrollment::{CourseRef, Enrollment, EnrollmentStatus};
use coursegate_kernel_contracts::order::Order;
use coursegate_kernel_contracts::progress::ProgressStatus;
use coursegate_os::backend::{BackendError, CourseAccessBackend};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

pub const API_BASE_URL_DEFAULT: &str = "http://127.0.0.1:8000/api";
pub const API_CONNECT_TIMEOUT_MS_DEFAULT: u64 = 2_000;
pub const API_REQUEST_TIMEOUT_MS_DEFAULT: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestBackendConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl RestBackendConfig {
    pub fn mvp_v1() -> Self {
        Self {
            base_url: API_BASE_URL_DEFAULT.to_string(),
            bearer_token: None,
            connect_timeout_ms: API_CONNECT_TIMEOUT_MS_DEFAULT,
            request_timeout_ms: API_REQUEST_TIMEOUT_MS_DEFAULT,
        }
    }

    pub fn from_env() -> Self {
        Self::from_env_var_map(|key| std::env::var(key).ok())
    }

    pub fn from_env_var_map<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::mvp_v1();
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let millis = |key: &str, default: u64| {
            text(key)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| (100..=120_000).contains(v))
                .unwrap_or(default)
        };
        Self {
            base_url: text("COURSEGATE_API_BASE_URL")
                .filter(|v| v.starts_with("http://") || v.starts_with("https://"))
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            bearer_token: text("COURSEGATE_API_TOKEN"),
            connect_timeout_ms: millis(
                "COURSEGATE_API_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout_ms,
            ),
            request_timeout_ms: millis(
                "COURSEGATE_API_REQUEST_TIMEOUT_MS",
                defaults.request_timeout_ms,
            ),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Learning platform REST API, scoped by the configured bearer token.
///
/// `ureq` is blocking, so every call runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct RestBackend {
    config: RestBackendConfig,
    agent: ureq::Agent,
}

impl RestBackend {
    pub fn new(config: RestBackendConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(config.connect_timeout_ms))
            .timeout_read(Duration::from_millis(config.request_timeout_ms))
            .timeout_write(Duration::from_millis(config.request_timeout_ms))
            .build();
        Self { config, agent }
    }

    pub fn config(&self) -> &RestBackendConfig {
        &self.config
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let mut req = self
            .agent
            .request(method, &self.config.endpoint(path))
            .set("accept", "application/json");
        if let Some(token) = self.config.bearer_token.as_ref() {
            req = req.set("authorization", &format!("Bearer {}", token));
        }
        req
    }

    fn call(
        &self,
        method: &'static str,
        path: &'static str,
        body: Option<Value>,
    ) -> BoxFuture<'static, Result<Value, BackendError>> {
        let req = self.request(method, path);
        async move {
            tokio::task::spawn_blocking(move || {
                debug!(method, path, "calling learning platform");
                let outcome = match body {
                    Some(body) => req.send_json(body),
                    None => req.call(),
                };
                match outcome {
                    Ok(resp) => {
                        let raw = resp
                            .into_string()
                            .map_err(|err| BackendError::Decode(err.to_string()))?;
                        if raw.trim().is_empty() {
                            return Ok(Value::Null);
                        }
                        serde_json::from_str(&raw).map_err(|err| BackendError::Decode(err.to_string()))
                    }
                    Err(ureq::Error::Status(code, resp)) => {
                        let body = resp.into_string().unwrap_or_default();
                        Err(BackendError::Status {
                            code,
                            message: error_message_from_body(&body),
                        })
                    }
                    Err(ureq::Error::Transport(err)) => {
                        Err(BackendError::Transport(err.to_string()))
                    }
                }
            })
            .await
            .map_err(|err| BackendError::Transport(format!("request task failed: {err}")))?
        }
        .boxed()
    }
}

impl CourseAccessBackend for RestBackend {
    fn fetch_my_enrollments(&self) -> BoxFuture<'static, Result<Vec<Enrollment>, BackendError>> {
        let call = self.call("GET", "me/enrollments", None);
        async move { decode_enrollments(call.await?) }.boxed()
    }

    fn fetch_my_orders(&self) -> BoxFuture<'static, Result<Vec<Order>, BackendError>> {
        let call = self.call("GET", "me/orders", None);
        async move { decode_orders(call.await?) }.boxed()
    }

    fn create_order(&self, course_id: CourseId) -> BoxFuture<'static, Result<Order, BackendError>> {
        let call = self.call("POST", "orders", Some(json!({ "courseId": course_id.0 })));
        async move {
            let value = call.await?;
            let value = match value {
                Value::Object(mut map) if map.contains_key("order") => {
                    map.remove("order").unwrap_or(Value::Null)
                }
                other => other,
            };
            decode_order(value)
                .ok_or_else(|| BackendError::Decode("created order payload is not an order".to_string()))
        }
        .boxed()
    }

    fn touch_progress(
        &self,
        lesson_id: LessonId,
        status: ProgressStatus,
    ) -> BoxFuture<'static, Result<(), BackendError>> {
        let call = self.call(
            "POST",
            "progress/touch",
            Some(json!({ "lessonId": lesson_id.0, "status": status.as_str() })),
        );
        async move { call.await.map(|_| ()) }.boxed()
    }
}

/// Pulls a human readable message out of an error body shaped `{message}` or `{error}`.
/// Anything else yields an empty string so callers fall back to the generic text.
pub fn error_message_from_body(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return String::new();
    };
    ["message", "error", "detail"]
        .iter()
        .find_map(|key| match value.get(key) {
            Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Some(Value::Object(inner)) => inner
                .get("message")
                .and_then(Value::as_str)
                .map(|text| text.trim().to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListEnvelope {
    Bare(Vec<Value>),
    Data { data: Vec<Value> },
    Items { items: Vec<Value> },
}

fn list_items(value: Value) -> Result<Vec<Value>, BackendError> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    match serde_json::from_value::<ListEnvelope>(value) {
        Ok(ListEnvelope::Bare(items))
        | Ok(ListEnvelope::Data { data: items })
        | Ok(ListEnvelope::Items { items }) => Ok(items),
        Err(err) => Err(BackendError::Decode(err.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct CourseRefWire {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnrollmentWire {
    #[serde(default, alias = "courseId")]
    course_id: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    course: Option<CourseRefWire>,
}

fn coerce_course_id(value: &Value) -> Option<CourseId> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|id| CourseId::new(id).ok())
            .or_else(|| CourseId::coerce(&n.to_string())),
        Value::String(text) => CourseId::coerce(text),
        _ => None,
    }
}

impl EnrollmentWire {
    /// The top-level `courseId` wins; `course.id` fills in when it is missing.
    fn into_enrollment(self) -> Option<Enrollment> {
        let nested_id = self
            .course
            .as_ref()
            .and_then(|c| c.id.as_ref())
            .and_then(coerce_course_id);
        let course_id = self
            .course_id
            .as_ref()
            .and_then(coerce_course_id)
            .or(nested_id)?;
        let status = EnrollmentStatus::from_wire(self.status.as_deref().unwrap_or_default());
        let course = self.course.map(|c| CourseRef {
            id: nested_id.unwrap_or(course_id),
            title: c.title,
        });
        let course = course.filter(|c| c.id == course_id);
        Enrollment::v1(course_id, status, course).ok()
    }
}

pub fn decode_enrollments(value: Value) -> Result<Vec<Enrollment>, BackendError> {
    let items = list_items(value)?;
    let total = items.len();
    let enrollments = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<EnrollmentWire>(item).ok())
        .filter_map(EnrollmentWire::into_enrollment)
        .collect::<Vec<_>>();
    if enrollments.len() != total {
        warn!(
            dropped = total - enrollments.len(),
            "ignoring malformed enrollment entries"
        );
    }
    Ok(enrollments)
}

fn decode_order(mut value: Value) -> Option<Order> {
    // Some payloads nest the course instead of carrying `courseId`.
    if let Value::Object(map) = &mut value {
        if !map.contains_key("courseId") {
            if let Some(id) = map.get("course").and_then(|c| c.get("id")).cloned() {
                map.insert("courseId".to_string(), id);
            }
        }
        if let Some(id) = map.get("courseId").and_then(coerce_course_id) {
            map.insert("courseId".to_string(), json!(id.0));
        }
    }
    let order = serde_json::from_value::<Order>(value).ok()?;
    Order::v1(
        order.id,
        order.code,
        order.course_id,
        order.status,
        order.total,
        order.currency,
        order.created_at,
    )
    .ok()
}

pub fn decode_orders(value: Value) -> Result<Vec<Order>, BackendError> {
    let items = list_items(value)?;
    let total = items.len();
    let orders = items.into_iter().filter_map(decode_order).collect::<Vec<_>>();
    if orders.len() != total {
        warn!(dropped = total - orders.len(), "ignoring malformed order entries");
    }
    Ok(orders)
}
