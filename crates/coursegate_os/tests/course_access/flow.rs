#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coursegate_engines::navigator::{navigate, pick_continue_lesson};
use coursegate_engines::progress_index::{ProgressIndexConfig, ProgressIndexRuntime};
use coursegate_engines::summary::summarize;
use coursegate_kernel_contracts::course::{CourseId, Lesson, LessonId};
use coursegate_kernel_contracts::enrollment::{Enrollment, EnrollmentStatus};
use coursegate_kernel_contracts::gate::GateStatus;
use coursegate_kernel_contracts::order::{Order, OrderId, OrderStatus};
use coursegate_kernel_contracts::progress::{ProgressRecordWire, ProgressStatus};
use coursegate_kernel_contracts::UnixTimeMs;
use coursegate_os::backend::{BackendError, CourseAccessBackend};
use coursegate_os::poll::PollConfig;
use coursegate_os::session::CourseAccessRuntime;
use coursegate_storage::kv::InMemoryKv;
use coursegate_storage::pending_orders::{PendingOrderMemory, PendingOrderMemoryConfig};
use futures::future::BoxFuture;
use futures::FutureExt;
use rust_decimal::Decimal;
use tokio::sync::{Barrier, Notify};

#[derive(Default)]
struct LmsDouble {
    enrollments: Mutex<Vec<Enrollment>>,
    orders: Mutex<Vec<Order>>,
    enrollment_calls: AtomicUsize,
    held: Mutex<Option<Arc<Notify>>>,
}

impl LmsDouble {
    fn settle(&self, course: u64, status: EnrollmentStatus) {
        let mut enrollments = self.enrollments.lock().unwrap();
        enrollments.retain(|e| e.course_id != CourseId(course));
        enrollments.push(Enrollment::v1(CourseId(course), status, None).unwrap());
    }
}

impl CourseAccessBackend for LmsDouble {
    fn fetch_my_enrollments(&self) -> BoxFuture<'static, Result<Vec<Enrollment>, BackendError>> {
        self.enrollment_calls.fetch_add(1, Ordering::SeqCst);
        let enrollments = self.enrollments.lock().unwrap().clone();
        let held = self.held.lock().unwrap().clone();
        async move {
            if let Some(release) = held {
                release.notified().await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(enrollments)
        }
        .boxed()
    }

    fn fetch_my_orders(&self) -> BoxFuture<'static, Result<Vec<Order>, BackendError>> {
        let orders = self.orders.lock().unwrap().clone();
        async move { Ok(orders) }.boxed()
    }

    fn create_order(&self, course_id: CourseId) -> BoxFuture<'static, Result<Order, BackendError>> {
        let order = order(900, course_id.0, 5_000);
        self.orders.lock().unwrap().push(order.clone());
        self.settle(course_id.0, EnrollmentStatus::Pending);
        async move { Ok(order) }.boxed()
    }

    fn touch_progress(
        &self,
        _lesson_id: LessonId,
        _status: ProgressStatus,
    ) -> BoxFuture<'static, Result<(), BackendError>> {
        async { Err(BackendError::Transport("progress endpoint offline".to_string())) }.boxed()
    }
}

fn order(id: u64, course: u64, created_at: u64) -> Order {
    Order::v1(
        OrderId(id),
        format!("ORD-{id}"),
        CourseId(course),
        OrderStatus::Pending,
        Decimal::new(19_900, 2),
        "EUR".to_string(),
        UnixTimeMs(created_at),
    )
    .unwrap()
}

fn runtime(
    lms: &Arc<LmsDouble>,
) -> (CourseAccessRuntime, Arc<PendingOrderMemory<InMemoryKv>>) {
    let memory = Arc::new(PendingOrderMemory::new(
        PendingOrderMemoryConfig::mvp_v1(),
        InMemoryKv::new(),
    ));
    let runtime = CourseAccessRuntime::new(lms.clone(), memory.clone(), PollConfig::mvp_v1());
    (runtime, memory)
}

fn lesson(id: u64, order: i64) -> Lesson {
    Lesson::v1(LessonId(id), Some(CourseId(1)), format!("Lesson {id}"), Some(order), true).unwrap()
}

#[tokio::test(start_paused = true)]
async fn at_flow_01_newest_pending_order_is_remembered_then_cleared_on_payment() {
    let lms = Arc::new(LmsDouble::default());
    lms.settle(42, EnrollmentStatus::Pending);
    *lms.orders.lock().unwrap() = vec![order(1, 42, 1_000), order(2, 42, 2_000)];
    let (runtime, memory) = runtime(&lms);

    let session = runtime.open_course(CourseId(42), false);
    let view = session.sync().await;
    assert_eq!(view.status, GateStatus::Pending);
    assert!(!view.can_access);
    assert_eq!(memory.load(CourseId(42)).unwrap().order_id, OrderId(2));
    assert!(session.is_polling());

    lms.settle(42, EnrollmentStatus::Active);
    tokio::time::sleep(Duration::from_millis(3_200)).await;
    let view = session.view();
    assert_eq!(view.status, GateStatus::Active);
    assert!(view.can_access);
    assert!(view.pending_order.is_none());
    assert!(memory.load(CourseId(42)).is_none());
    assert!(!session.is_polling());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_flow_02_concurrent_callers_share_one_fetch() {
    let lms = Arc::new(LmsDouble::default());
    lms.settle(1, EnrollmentStatus::Active);
    let (runtime, _) = runtime(&lms);

    let release = Arc::new(Notify::new());
    *lms.held.lock().unwrap() = Some(Arc::clone(&release));
    let joined = Arc::new(Barrier::new(17));

    let callers = (0..16)
        .map(|_| {
            let runtime = runtime.clone();
            let joined = Arc::clone(&joined);
            tokio::spawn(async move {
                let refresh = runtime.refresh();
                joined.wait().await;
                refresh.await
            })
        })
        .collect::<Vec<_>>();
    joined.wait().await;
    assert!(runtime.cache().is_refreshing());
    lms.held.lock().unwrap().take();
    release.notify_one();

    let mut snapshots = Vec::new();
    for caller in callers {
        snapshots.push(caller.await.unwrap().unwrap());
    }
    assert_eq!(lms.enrollment_calls.load(Ordering::SeqCst), 1);
    let last = runtime.cache().snapshot();
    assert!(snapshots.iter().all(|s| s.records == last.records));

    let again = runtime.refresh().await.unwrap();
    assert!(Arc::ptr_eq(&again, &runtime.cache().snapshot()));
    assert!(Arc::ptr_eq(&again, &last));
}

#[tokio::test]
async fn at_flow_03_purchase_turns_not_enrolled_into_pending() {
    let lms = Arc::new(LmsDouble::default());
    let (runtime, memory) = runtime(&lms);
    let session = runtime.open_course(CourseId(42), false);

    let view = session.sync().await;
    assert_eq!(view.status, GateStatus::NotEnrolled);
    assert!(view.reason.is_some());

    let order = session.place_order().await.unwrap();
    assert_eq!(order.id, OrderId(900));
    let view = session.view();
    assert_eq!(view.status, GateStatus::Pending);
    assert_eq!(view.pending_order.map(|r| r.order_id), Some(OrderId(900)));
    assert_eq!(memory.load(CourseId(42)).unwrap().code, "ORD-900");

    // Progress touches never surface their failure.
    runtime
        .touch_progress(LessonId(1), ProgressStatus::InProgress)
        .await
        .unwrap();
}

#[test]
fn at_flow_04_lesson_chain_unlocks_as_progress_lands() {
    let index = ProgressIndexRuntime::new(ProgressIndexConfig::mvp_v1());
    let lessons = vec![lesson(30, 3), lesson(10, 1), lesson(20, 2)];

    let rows = index.build_rows(&lessons, None);
    let states = rows
        .iter()
        .map(|r| (r.lesson.id.0, r.status, r.unlocked))
        .collect::<Vec<_>>();
    assert_eq!(
        states,
        vec![
            (10, ProgressStatus::NotStarted, true),
            (20, ProgressStatus::NotStarted, false),
            (30, ProgressStatus::NotStarted, false),
        ]
    );
    assert_eq!(pick_continue_lesson(&rows), Some(LessonId(10)));

    let progress = vec![ProgressRecordWire::nested(10, Some("COMPLETED"), Some(1_700))];
    let rows = index.build_rows(&lessons, Some(&progress));
    assert!(rows[1].unlocked);
    assert_eq!(rows[1].status, ProgressStatus::NotStarted);
    assert!(!rows[2].unlocked);
    assert_eq!(pick_continue_lesson(&rows), Some(LessonId(20)));

    let nav = navigate(&rows, LessonId(20));
    assert_eq!(nav.prev_id, Some(LessonId(10)));
    assert_eq!(nav.next_id, None);
    assert!(nav.unlocked);

    let summary = summarize(&rows);
    assert_eq!(summary.completed_lessons, 1);
    assert_eq!(summary.percent_complete, 33);
    assert!(!summary.all_completed);
}
