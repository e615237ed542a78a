use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the inner value if a previous holder panicked.
///
/// Pipeline state is advisory metadata; a poisoned lock must never take the
/// whole assistant down with it.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(context, "mutex poisoned; recovering");
            poisoned.into_inner()
        }
    }
}
