#![forbid(unsafe_code)]

use std::env;
use std::sync::Mutex;
use std::time::Duration;

use coursegate_engines::gate::resolve_gate;
use coursegate_kernel_contracts::course::CourseId;
use coursegate_kernel_contracts::enrollment::{EnrollmentCacheState, FetchState};
use coursegate_kernel_contracts::gate::GateSnapshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::enrollment_cache::EnrollmentCache;
use crate::lock;

pub const POLL_INTERVAL_MS_DEFAULT: u64 = 3_000;
pub const POLL_INTERVAL_MS_FLOOR: u64 = 1_500;
const POLL_INTERVAL_MS_CEILING: u64 = 600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval_ms: u64,
}

impl PollConfig {
    pub fn mvp_v1() -> Self {
        Self {
            interval_ms: POLL_INTERVAL_MS_DEFAULT,
        }
    }

    pub fn with_interval_ms(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.clamp(POLL_INTERVAL_MS_FLOOR, POLL_INTERVAL_MS_CEILING),
        }
    }

    pub fn from_env() -> Self {
        env::var("COURSEGATE_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Self::with_interval_ms)
            .unwrap_or_else(Self::mvp_v1)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(POLL_INTERVAL_MS_FLOOR))
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Gate is `PENDING` on a settled cache.
    Run,
    /// Cache is mid-load or the last refresh failed: leave any running timer alone.
    Hold,
    Stop,
}

pub fn poll_decision(gate: &GateSnapshot, state: &EnrollmentCacheState) -> PollDecision {
    if state.fetch_state == FetchState::Error || gate.loading {
        PollDecision::Hold
    } else if gate.status.is_transitional() {
        PollDecision::Run
    } else {
        PollDecision::Stop
    }
}

/// Owns the poll task; dropping the handle cancels it.
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(self) {}
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Re-fetches enrollments every `config.interval()` while `course_id` stays pending.
///
/// The first tick fires one full period after the call. Tick failures are logged and the
/// next tick retries; an in-flight refresh is joined rather than duplicated.
pub fn spawn_pending_poll(
    cache: EnrollmentCache,
    course_id: CourseId,
    admin_bypass: bool,
    config: PollConfig,
) -> PollHandle {
    let period = config.interval();
    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let state = cache.snapshot();
            let gate = resolve_gate(course_id, &state, admin_bypass);
            if poll_decision(&gate, &state) == PollDecision::Stop {
                debug!(course_id = course_id.0, status = gate.status.as_str(), "pending poll finished");
                break;
            }
            if let Err(err) = cache.refresh().await {
                warn!(course_id = course_id.0, error = %err, "pending poll refresh failed");
            }
        }
    });
    PollHandle { task }
}

/// Starts and stops the pending poll of one course as its gate changes.
#[derive(Debug)]
pub struct PollCoordinator {
    cache: EnrollmentCache,
    course_id: CourseId,
    admin_bypass: bool,
    config: PollConfig,
    handle: Mutex<Option<PollHandle>>,
}

impl PollCoordinator {
    pub fn new(
        cache: EnrollmentCache,
        course_id: CourseId,
        admin_bypass: bool,
        config: PollConfig,
    ) -> Self {
        Self {
            cache,
            course_id,
            admin_bypass,
            config,
            handle: Mutex::new(None),
        }
    }

    /// Must be called from within a tokio runtime when the gate may be pending.
    pub fn reconcile(&self, gate: &GateSnapshot, state: &EnrollmentCacheState) {
        let mut handle = lock(&self.handle);
        match poll_decision(gate, state) {
            PollDecision::Run => {
                if handle.as_ref().is_some_and(|h| !h.is_finished()) {
                    return;
                }
                debug!(
                    course_id = self.course_id.0,
                    interval_ms = self.config.interval().as_millis() as u64,
                    "starting pending poll"
                );
                *handle = Some(spawn_pending_poll(
                    self.cache.clone(),
                    self.course_id,
                    self.admin_bypass,
                    self.config,
                ));
            }
            PollDecision::Hold => {}
            PollDecision::Stop => {
                if handle.take().is_some() {
                    debug!(course_id = self.course_id.0, "stopping pending poll");
                }
            }
        }
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.handle)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&self) {
        lock(&self.handle).take();
    }
}
