#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, Weak};

use coursegate_engines::gate::resolve_gate;
use coursegate_kernel_contracts::course::{CourseId, LessonId};
use coursegate_kernel_contracts::enrollment::EnrollmentCacheState;
use coursegate_kernel_contracts::gate::{GateSnapshot, GateStatus};
use coursegate_kernel_contracts::order::Order;
use coursegate_kernel_contracts::progress::ProgressStatus;
use coursegate_kernel_contracts::ReasonCodeId;
use coursegate_storage::pending_orders::PendingOrderRecord;
use coursegate_storage::repo::PendingOrderRepo;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, CourseAccessBackend};
use crate::enrollment_cache::{EnrollmentCache, RefreshResult, Subscription};
use crate::lock;
use crate::pending_reconcile::reconcile_pending_order;
use crate::poll::{PollConfig, PollCoordinator};
use crate::tasks::spawn_detached;

/// What a course page needs to render its gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseGateView {
    pub course_id: CourseId,
    pub status: GateStatus,
    pub can_access: bool,
    pub reason: Option<&'static str>,
    pub reason_code: Option<ReasonCodeId>,
    pub loading: bool,
    pub error: Option<String>,
    pub pending_order: Option<PendingOrderRecord>,
}

impl CourseGateView {
    fn from_parts(
        course_id: CourseId,
        gate: GateSnapshot,
        state: &EnrollmentCacheState,
        pending_order: Option<PendingOrderRecord>,
    ) -> Self {
        Self {
            course_id,
            status: gate.status,
            can_access: gate.can_access,
            reason: gate.reason,
            reason_code: gate.reason_code,
            loading: gate.loading,
            error: state.error.clone(),
            pending_order,
        }
    }
}

/// One per signed-in user: the shared enrollment cache plus everything that talks to the
/// collaborator on its behalf.
#[derive(Clone)]
pub struct CourseAccessRuntime {
    backend: Arc<dyn CourseAccessBackend>,
    cache: EnrollmentCache,
    pending: Arc<dyn PendingOrderRepo>,
    poll_config: PollConfig,
}

impl std::fmt::Debug for CourseAccessRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourseAccessRuntime")
            .field("cache", &self.cache)
            .field("poll_config", &self.poll_config)
            .finish_non_exhaustive()
    }
}

impl CourseAccessRuntime {
    pub fn new(
        backend: Arc<dyn CourseAccessBackend>,
        pending: Arc<dyn PendingOrderRepo>,
        poll_config: PollConfig,
    ) -> Self {
        let cache = EnrollmentCache::new(Arc::clone(&backend));
        Self {
            backend,
            cache,
            pending,
            poll_config,
        }
    }

    pub fn cache(&self) -> &EnrollmentCache {
        &self.cache
    }

    pub fn poll_config(&self) -> PollConfig {
        self.poll_config
    }

    pub fn gate(&self, course_id: CourseId, admin_bypass: bool) -> GateSnapshot {
        resolve_gate(course_id, &self.cache.snapshot(), admin_bypass)
    }

    /// Gate plus remembered order, from the current snapshot without any I/O on the network.
    pub fn view(&self, course_id: CourseId, admin_bypass: bool) -> CourseGateView {
        let state = self.cache.snapshot();
        let gate = resolve_gate(course_id, &state, admin_bypass);
        let pending_order = if gate.status == GateStatus::Active {
            None
        } else {
            self.pending.pending_order(course_id)
        };
        CourseGateView::from_parts(course_id, gate, &state, pending_order)
    }

    pub async fn refresh(&self) -> RefreshResult {
        self.cache.refresh().await
    }

    /// Creates an order for `course_id`, remembers it, and refreshes so the resulting
    /// `PENDING` enrollment shows up. Only the creation itself can fail.
    pub async fn place_order(&self, course_id: CourseId) -> Result<Order, BackendError> {
        let order = self.backend.create_order(course_id).await?;
        info!(course_id = course_id.0, order_id = order.id.0, "order created");
        if order.course_id == course_id {
            self.pending.remember_pending_order(&order);
        } else {
            warn!(
                course_id = course_id.0,
                order_course_id = order.course_id.0,
                "created order belongs to another course"
            );
        }
        if let Err(err) = self.cache.refresh().await {
            warn!(course_id = course_id.0, error = %err, "refresh after order creation failed");
        }
        Ok(order)
    }

    /// Best-effort progress update; the caller never waits on or hears about the outcome.
    pub fn touch_progress(&self, lesson_id: LessonId, status: ProgressStatus) -> JoinHandle<()> {
        debug!(lesson_id = lesson_id.0, status = status.as_str(), "touching lesson progress");
        spawn_detached("touch_progress", self.backend.touch_progress(lesson_id, status))
    }

    /// Starts observing one course. Must be called from within a tokio runtime.
    pub fn open_course(&self, course_id: CourseId, admin_bypass: bool) -> CourseAccessSession {
        let shared = Arc::new(SessionShared {
            runtime: self.clone(),
            course_id,
            admin_bypass,
            poll: PollCoordinator::new(
                self.cache.clone(),
                course_id,
                admin_bypass,
                self.poll_config,
            ),
            last_status: Mutex::new(None),
            scan: Arc::new(Mutex::new(None)),
        });
        let weak: Weak<SessionShared> = Arc::downgrade(&shared);
        let subscription = self.cache.subscribe(move |state| {
            if let Some(shared) = weak.upgrade() {
                shared.on_state_change(state);
            }
        });
        CourseAccessSession {
            shared,
            _subscription: subscription,
        }
    }
}

type PendingScan = Shared<BoxFuture<'static, Option<PendingOrderRecord>>>;

struct SessionShared {
    runtime: CourseAccessRuntime,
    course_id: CourseId,
    admin_bypass: bool,
    poll: PollCoordinator,
    last_status: Mutex<Option<GateStatus>>,
    scan: Arc<Mutex<Option<PendingScan>>>,
}

impl SessionShared {
    /// Applies `state` to the poll timer and pending-order memory. Returns the gate and
    /// whether it has just become `PENDING`.
    fn observe(&self, state: &Arc<EnrollmentCacheState>) -> (GateSnapshot, bool) {
        let gate = resolve_gate(self.course_id, state, self.admin_bypass);
        self.poll.reconcile(&gate, state);
        let previous = lock(&self.last_status).replace(gate.status);
        let changed = previous != Some(gate.status);
        if changed && gate.status == GateStatus::Active {
            debug!(course_id = self.course_id.0, "enrollment active, forgetting pending order");
            self.runtime.pending.clear_pending_order(self.course_id);
        }
        let entered_pending = changed && gate.status == GateStatus::Pending;
        (gate, entered_pending)
    }

    fn on_state_change(&self, state: &Arc<EnrollmentCacheState>) {
        let (_, entered_pending) = self.observe(state);
        if !entered_pending {
            return;
        }
        tokio::spawn(self.reconcile_pending());
    }

    /// Reconciles the pending-order memory, joining the reconcile already in flight for this
    /// course if there is one. At most one order scan per session is outstanding.
    fn reconcile_pending(&self) -> PendingScan {
        let mut slot = lock(&self.scan);
        if let Some(inflight) = slot.as_ref() {
            return inflight.clone();
        }
        let backend = Arc::clone(&self.runtime.backend);
        let pending = Arc::clone(&self.runtime.pending);
        let cache = self.runtime.cache.clone();
        let course_id = self.course_id;
        let scan_slot = Arc::downgrade(&self.scan);
        let scan = async move {
            let record = reconcile_pending_order(&backend, pending.as_ref(), &cache, course_id).await;
            if let Some(slot) = scan_slot.upgrade() {
                lock(&slot).take();
            }
            record
        }
        .boxed()
        .shared();
        *slot = Some(scan.clone());
        scan
    }
}

/// Observation scope for one course. Dropping it stops polling and unsubscribes.
pub struct CourseAccessSession {
    shared: Arc<SessionShared>,
    _subscription: Subscription,
}

impl std::fmt::Debug for CourseAccessSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourseAccessSession")
            .field("course_id", &self.shared.course_id)
            .field("admin_bypass", &self.shared.admin_bypass)
            .finish_non_exhaustive()
    }
}

impl CourseAccessSession {
    pub fn course_id(&self) -> CourseId {
        self.shared.course_id
    }

    pub fn view(&self) -> CourseGateView {
        self.shared
            .runtime
            .view(self.shared.course_id, self.shared.admin_bypass)
    }

    /// Loads the cache on first use, then brings polling and pending-order memory in line
    /// with the gate. A failed first load leaves the gate `UNKNOWN` rather than erroring.
    pub async fn sync(&self) -> CourseGateView {
        let runtime = &self.shared.runtime;
        if let Err(err) = runtime.cache.ensure_loaded().await {
            warn!(course_id = self.shared.course_id.0, error = %err, "initial enrollment load failed");
        }
        let state = runtime.cache.snapshot();
        let (gate, _) = self.shared.observe(&state);
        let pending_order = self.shared.reconcile_pending().await;
        CourseGateView::from_parts(self.shared.course_id, gate, &state, pending_order)
    }

    pub async fn refresh(&self) -> Result<CourseGateView, crate::enrollment_cache::RefreshError> {
        self.shared.runtime.refresh().await?;
        Ok(self.view())
    }

    pub async fn place_order(&self) -> Result<Order, BackendError> {
        self.shared.runtime.place_order(self.shared.course_id).await
    }

    pub fn is_polling(&self) -> bool {
        self.shared.poll.is_polling()
    }
}
