//! A [`std::sync::Mutex`] that does not poison itself.
//!
//! Every owned thread in this crate propagates its panic to the owner when it is joined, so lock
//! poisoning would only add knock-on `unwrap` panics that can hide the root cause. The cache and
//! the cancellation token lock through this type instead, which recovers the guard from a poisoned
//! lock.
//!
//! The [`LruCache`][crate::LruCache] keeps its index and its recency list consistent with each
//! other at every point where a panic could escape (the closure passed to `get_with` only runs
//! once both are updated), so recovering from poisoning cannot expose a half-updated cache.

use std::{
    error::Error,
    fmt,
    ops::{Deref, DerefMut},
    sync,
};

pub struct Mutex<T: ?Sized> {
    inner: sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(t: T) -> Mutex<T> {
        Self {
            inner: sync::Mutex::new(t),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };

        MutexGuard { inner: guard }
    }

    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, TryLockError> {
        let guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(sync::TryLockError::Poisoned(poison)) => poison.into_inner(),
            Err(sync::TryLockError::WouldBlock) => return Err(TryLockError),
        };

        Ok(MutexGuard { inner: guard })
    }
}

pub struct MutexGuard<'a, T: ?Sized + 'a> {
    inner: sync::MutexGuard<'a, T>,
}

impl<'a, T: ?Sized + 'a> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a, T: ?Sized + 'a> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct TryLockError;

impl Error for TryLockError {}

impl fmt::Display for TryLockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("`try_lock` failed because the operation would block")
    }
}

#[cfg(test)]
mod tests {
    use std::{panic::resume_unwind, sync::Arc, thread};

    use super::*;

    #[test]
    fn lock_survives_panicking_holder() {
        let mutex = Arc::new(Mutex::new(0));
        let mutex2 = mutex.clone();
        let res = thread::spawn(move || {
            let mut guard = mutex2.lock();
            *guard += 1;
            resume_unwind(Box::new("holder panic"));
        })
        .join();
        assert!(res.is_err());

        assert_eq!(*mutex.lock(), 1);
    }

    #[test]
    fn try_lock_reports_contention() {
        let mutex = Mutex::new(());
        let guard = mutex.lock();
        assert_eq!(mutex.try_lock().err(), Some(TryLockError));
        drop(guard);
        assert!(mutex.try_lock().is_ok());
    }
}
