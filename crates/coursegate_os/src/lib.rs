#![forbid(unsafe_code)]

pub mod backend;
pub mod enrollment_cache;
pub mod pending_reconcile;
pub mod poll;
pub mod session;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Shared state here is only ever replaced wholesale, so a poisoned lock still guards a
/// consistent value.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
