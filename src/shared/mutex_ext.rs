//! Usage: Mutex extension trait that recovers from poisoned locks.

use std::sync::{Mutex, MutexGuard};

/// Extension trait for `Mutex` that recovers instead of propagating poison.
pub(crate) trait MutexExt<T> {
    /// Lock the mutex; if a holder panicked, recover the inner value and log.
    fn lock_or_recover(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[track_caller]
    fn lock_or_recover(&self) -> MutexGuard<'_, T> {
        match self.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let loc = std::panic::Location::caller();
                tracing::error!(
                    mutex_type = std::any::type_name::<T>(),
                    file = loc.file(),
                    line = loc.line(),
                    column = loc.column(),
                    "mutex poisoned by a panicked holder; recovering inner value"
                );
                poisoned.into_inner()
            }
        }
    }
}
