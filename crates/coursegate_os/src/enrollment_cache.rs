#![forbid(unsafe_code)]

//! Process-wide enrollment store for the signed-in user.
//!
//! The state is an immutable [`EnrollmentCacheState`] behind an `Arc`; every transition
//! swaps in a new `Arc`, so a snapshot taken by a reader is never mutated underneath it and
//! two snapshots taken between transitions are pointer-equal.
//!
//! Refreshes are deduplicated: while a fetch is in flight every caller receives a clone of
//! the same shared future. The fetch runs on its own task, so dropping every awaiting
//! future does not cancel it; its result is still applied when it lands.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use coursegate_kernel_contracts::enrollment::{Enrollment, EnrollmentCacheState, FetchState};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, warn};

use crate::backend::{BackendError, CourseAccessBackend, BACKEND_ERROR_FALLBACK};
use crate::lock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("enrollment refresh task failed: {0}")]
    TaskFailed(String),
}

impl RefreshError {
    pub fn message(&self) -> String {
        match self {
            RefreshError::Backend(err) => err.message(),
            RefreshError::TaskFailed(_) => BACKEND_ERROR_FALLBACK.to_string(),
        }
    }
}

pub type RefreshResult = Result<Arc<EnrollmentCacheState>, RefreshError>;
pub type RefreshFuture = Shared<BoxFuture<'static, RefreshResult>>;

type Listener = Arc<dyn Fn(&Arc<EnrollmentCacheState>) + Send + Sync>;

struct CacheInner {
    backend: Arc<dyn CourseAccessBackend>,
    state: Mutex<Arc<EnrollmentCacheState>>,
    inflight: Mutex<Option<RefreshFuture>>,
    listeners: Mutex<HashMap<u64, Listener>>,
    delivery: Mutex<()>,
    next_listener_id: AtomicU64,
}

#[derive(Clone)]
pub struct EnrollmentCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for EnrollmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentCache")
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl EnrollmentCache {
    pub fn new(backend: Arc<dyn CourseAccessBackend>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                backend,
                state: Mutex::new(Arc::new(EnrollmentCacheState::idle())),
                inflight: Mutex::new(None),
                listeners: Mutex::new(HashMap::new()),
                delivery: Mutex::new(()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<EnrollmentCacheState> {
        Arc::clone(&lock(&self.inner.state))
    }

    /// Registers `listener` for every state transition until the returned handle is dropped.
    ///
    /// Listeners run synchronously on the transitioning task and must not call
    /// [`Self::refresh`] inline; spawn instead.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<EnrollmentCacheState>) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).insert(id, Arc::new(listener));
        Subscription {
            id,
            cache: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    /// Starts an authoritative re-fetch, or joins the one already in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn refresh(&self) -> RefreshFuture {
        let (shared, loading) = {
            let mut inflight = lock(&self.inner.inflight);
            if let Some(pending) = inflight.as_ref() {
                return pending.clone();
            }
            let loading = self.inner.begin_loading();
            let fetch = self.inner.backend.fetch_my_enrollments();
            let inner = Arc::clone(&self.inner);
            let task = tokio::spawn(async move {
                let outcome = match AssertUnwindSafe(fetch).catch_unwind().await {
                    Ok(result) => result.map_err(RefreshError::from),
                    Err(_) => Err(RefreshError::TaskFailed(
                        "enrollment fetch panicked".to_string(),
                    )),
                };
                inner.complete(outcome)
            });
            let inner = Arc::clone(&self.inner);
            let shared = async move {
                match task.await {
                    Ok(result) => result,
                    Err(join_err) => {
                        // Only reachable when the runtime shuts the task down.
                        lock(&inner.inflight).take();
                        Err(RefreshError::TaskFailed(join_err.to_string()))
                    }
                }
            }
            .boxed()
            .shared();
            *inflight = Some(shared.clone());
            (shared, loading)
        };
        if let Some(state) = loading {
            self.inner.notify(&state);
        }
        shared
    }

    /// Refreshes only on first use; otherwise hands back the current snapshot.
    pub async fn ensure_loaded(&self) -> RefreshResult {
        let current = self.snapshot();
        if current.fetch_state == FetchState::Idle {
            self.refresh().await
        } else {
            Ok(current)
        }
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.inner.inflight).is_some()
    }
}

impl CacheInner {
    /// First loads and recoveries from an error go through `Loading`. A refresh of an already
    /// ready cache keeps serving the ready snapshot until the new one lands.
    fn begin_loading(&self) -> Option<Arc<EnrollmentCacheState>> {
        let mut state = lock(&self.state);
        match state.fetch_state {
            FetchState::Idle | FetchState::Error => {
                let next = Arc::new(EnrollmentCacheState::loading_from(&state));
                *state = Arc::clone(&next);
                Some(next)
            }
            FetchState::Loading | FetchState::Ready => None,
        }
    }

    fn complete(&self, outcome: Result<Vec<Enrollment>, RefreshError>) -> RefreshResult {
        let (result, changed) = {
            let mut inflight = lock(&self.inflight);
            let mut state = lock(&self.state);
            let (next, failure) = match outcome {
                Ok(enrollments) => (EnrollmentCacheState::ready(enrollments), None),
                Err(err) => {
                    warn!(error = %err, "enrollment refresh failed");
                    (EnrollmentCacheState::failed(err.message()), Some(err))
                }
            };
            let changed = if **state == next {
                None
            } else {
                let next = Arc::new(next);
                *state = Arc::clone(&next);
                Some(next)
            };
            inflight.take();
            let result = match failure {
                None => Ok(Arc::clone(&state)),
                Some(err) => Err(err),
            };
            (result, changed)
        };
        match changed {
            Some(state) => {
                debug!(
                    fetch_state = ?state.fetch_state,
                    courses = state.records.len(),
                    "enrollment cache updated"
                );
                self.notify(&state);
            }
            None => debug!("enrollment refresh produced no change"),
        }
        result
    }

    /// Deliveries are serialized and a state that has already been replaced is skipped, so
    /// listeners never see an older snapshot after a newer one.
    fn notify(&self, state: &Arc<EnrollmentCacheState>) {
        let _delivery = lock(&self.delivery);
        if !Arc::ptr_eq(state, &lock(&self.state)) {
            debug!(fetch_state = ?state.fetch_state, "skipping superseded cache notification");
            return;
        }
        let listeners = lock(&self.listeners).values().cloned().collect::<Vec<_>>();
        for listener in listeners {
            listener(state);
        }
    }
}

/// Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    cache: Weak<CacheInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.cache.upgrade() {
            lock(&inner.listeners).remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
