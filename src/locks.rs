//! Poison-tolerant lock access.
//!
//! A panicking consumer callback must not wedge the registries it happened
//! to touch, so every lock in the crate recovers the guard from a poisoned
//! lock instead of propagating the panic.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;
    use std::sync::Arc;

    #[test]
    fn test_lock_recovers_from_poison() {
        let mutex = Arc::new(Mutex::new(1));
        let poisoner = Arc::clone(&mutex);
        let _ = panic::catch_unwind(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        });
        assert!(mutex.is_poisoned());
        *lock(&mutex) += 1;
        assert_eq!(*lock(&mutex), 2);
    }

    #[test]
    fn test_rwlock_recovers_from_poison() {
        let rw = Arc::new(RwLock::new(vec![1]));
        let poisoner = Arc::clone(&rw);
        let _ = panic::catch_unwind(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison");
        });
        write(&rw).push(2);
        assert_eq!(*read(&rw), vec![1, 2]);
    }
}
