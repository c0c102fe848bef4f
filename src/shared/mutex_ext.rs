//! Usage: Mutex extension trait with automatic poisoned-state recovery.

use std::sync::{Mutex, MutexGuard};

pub(crate) trait MutexExt<T> {
    /// Acquires the lock; if the mutex is poisoned the inner data is
    /// recovered and the event logged instead of propagating the panic.
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
                    "mutex poisoned by a panicked thread; recovering inner data"
                );
                poisoned.into_inner()
            }
        }
    }
}
