#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coursegate_kernel_contracts::course::{CourseId, LessonId};
use coursegate_kernel_contracts::enrollment::{Enrollment, EnrollmentStatus};
use coursegate_kernel_contracts::order::{Order, OrderId, OrderStatus};
use coursegate_kernel_contracts::progress::ProgressStatus;
use coursegate_kernel_contracts::UnixTimeMs;
use futures::future::BoxFuture;
use futures::FutureExt;
use rust_decimal::Decimal;
use tokio::sync::Notify;

use crate::backend::{BackendError, CourseAccessBackend};
use crate::lock;

pub(crate) fn enrollment(course: u64, status: EnrollmentStatus) -> Enrollment {
    Enrollment::v1(CourseId(course), status, None).unwrap()
}

pub(crate) fn pending_order(id: u64, course: u64, created_at: u64) -> Order {
    Order::v1(
        OrderId(id),
        format!("ORD-{id}"),
        CourseId(course),
        OrderStatus::Pending,
        Decimal::new(4900, 2),
        "USD".to_string(),
        UnixTimeMs(created_at),
    )
    .unwrap()
}

/// Backend double whose responses are swapped in by the test. Call counts are taken when a
/// request is issued, not when its future is polled.
pub(crate) struct ScriptedBackend {
    enrollments: Mutex<Result<Vec<Enrollment>, BackendError>>,
    orders: Mutex<Result<Vec<Order>, BackendError>>,
    create_result: Mutex<Option<BackendError>>,
    enrollment_calls: AtomicUsize,
    order_calls: AtomicUsize,
    create_calls: AtomicUsize,
    touch_calls: AtomicUsize,
    next_order_id: AtomicU64,
    hold: AtomicBool,
    panic_fetch: AtomicBool,
    orders_delay: Mutex<Option<Duration>>,
    gate: Arc<Notify>,
}

impl ScriptedBackend {
    pub(crate) fn new(enrollments: Vec<Enrollment>) -> Arc<Self> {
        Arc::new(Self {
            enrollments: Mutex::new(Ok(enrollments)),
            orders: Mutex::new(Ok(Vec::new())),
            create_result: Mutex::new(None),
            enrollment_calls: AtomicUsize::new(0),
            order_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            touch_calls: AtomicUsize::new(0),
            next_order_id: AtomicU64::new(500),
            hold: AtomicBool::new(false),
            panic_fetch: AtomicBool::new(false),
            orders_delay: Mutex::new(None),
            gate: Arc::new(Notify::new()),
        })
    }

    pub(crate) fn set_enrollments(&self, enrollments: Vec<Enrollment>) {
        *lock(&self.enrollments) = Ok(enrollments);
    }

    pub(crate) fn fail_enrollments(&self, err: BackendError) {
        *lock(&self.enrollments) = Err(err);
    }

    pub(crate) fn set_orders(&self, orders: Vec<Order>) {
        *lock(&self.orders) = Ok(orders);
    }

    pub(crate) fn fail_orders(&self, err: BackendError) {
        *lock(&self.orders) = Err(err);
    }

    pub(crate) fn fail_create(&self, err: BackendError) {
        *lock(&self.create_result) = Some(err);
    }

    /// Enrollment fetches issued from now on wait for [`Self::release_fetch`].
    pub(crate) fn hold_fetches(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release_fetch(&self) {
        self.gate.notify_one();
    }

    /// Order fetches sleep for `delay` before answering.
    pub(crate) fn delay_orders(&self, delay: Duration) {
        *lock(&self.orders_delay) = Some(delay);
    }

    pub(crate) fn panic_on_fetch(&self) {
        self.panic_fetch.store(true, Ordering::SeqCst);
    }

    pub(crate) fn enrollment_calls(&self) -> usize {
        self.enrollment_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn order_calls(&self) -> usize {
        self.order_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn touch_calls(&self) -> usize {
        self.touch_calls.load(Ordering::SeqCst)
    }
}

impl CourseAccessBackend for ScriptedBackend {
    fn fetch_my_enrollments(&self) -> BoxFuture<'static, Result<Vec<Enrollment>, BackendError>> {
        self.enrollment_calls.fetch_add(1, Ordering::SeqCst);
        let held = self.hold.load(Ordering::SeqCst);
        let panics = self.panic_fetch.load(Ordering::SeqCst);
        let gate = Arc::clone(&self.gate);
        let response = lock(&self.enrollments).clone();
        async move {
            if held {
                gate.notified().await;
            }
            if panics {
                panic!("scripted enrollment fetch panic");
            }
            response
        }
        .boxed()
    }

    fn fetch_my_orders(&self) -> BoxFuture<'static, Result<Vec<Order>, BackendError>> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        let response = lock(&self.orders).clone();
        let delay = *lock(&self.orders_delay);
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            response
        }
        .boxed()
    }

    fn create_order(&self, course_id: CourseId) -> BoxFuture<'static, Result<Order, BackendError>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let response = match lock(&self.create_result).clone() {
            Some(err) => Err(err),
            None => {
                let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
                Ok(pending_order(id, course_id.0, 10_000 + id))
            }
        };
        async move { response }.boxed()
    }

    fn touch_progress(
        &self,
        _lesson_id: LessonId,
        _status: ProgressStatus,
    ) -> BoxFuture<'static, Result<(), BackendError>> {
        self.touch_calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }.boxed()
    }
}
