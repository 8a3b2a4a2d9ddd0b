//! Diagnostic mutex wrapper for the primary state lock
//!
//! In debug builds the guard records who acquired it and warns with a
//! captured backtrace when a hold exceeded the 20-second budget. Release
//! builds get a plain `parking_lot::Mutex` with zero extra cost. This is a
//! development diagnostic, not a correctness mechanism.

use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
#[cfg(debug_assertions)]
use std::time::Instant;

/// Hold duration past which a debug build complains
#[cfg(debug_assertions)]
const HOLD_BUDGET_SECS: u64 = 20;

/// Mutex that tracks hold durations in debug builds
#[derive(Debug)]
pub struct DebugMutex<T> {
    inner: Mutex<T>,
}

impl<T> DebugMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> DebugMutexGuard<'_, T> {
        DebugMutexGuard {
            guard: self.inner.lock(),
            #[cfg(debug_assertions)]
            acquired: Instant::now(),
        }
    }
}

/// Guard returned by [`DebugMutex::lock`]
pub struct DebugMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    #[cfg(debug_assertions)]
    acquired: Instant,
}

impl<T> Deref for DebugMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for DebugMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(debug_assertions)]
impl<T> Drop for DebugMutexGuard<'_, T> {
    fn drop(&mut self) {
        let held = self.acquired.elapsed();
        if held.as_secs() >= HOLD_BUDGET_SECS {
            tracing::warn!(
                thread = ?std::thread::current().id(),
                held_ms = held.as_millis() as u64,
                backtrace = %std::backtrace::Backtrace::capture(),
                "primary lock held past the 20s budget"
            );
        }
    }
}
