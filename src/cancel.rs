//! Cooperative cancellation.
//!
//! A [`CancelToken`] is a level-triggered broadcast flag: once [`CancelToken::cancel`] has been
//! called, every clone of the token observes the cancellation, forever. Raising it again is a
//! no-op.
//!
//! Threads can either poll [`CancelToken::is_cancelled`], or block on [`CancelToken::signal`] in a
//! [`crossbeam_channel::select!`] next to their other channel operations. The signal channel never
//! carries a message; it becomes disconnected when the token is raised, which makes every pending
//! and future receive on it complete immediately.
//!
//! ```
//! use std::time::Duration;
//! use runnel::CancelToken;
//!
//! let token = CancelToken::new();
//! let deadline = token.cancel_after(Duration::from_millis(10)).unwrap();
//!
//! token.wait();
//! assert!(token.is_cancelled());
//! drop(deadline);
//! ```

use std::{
    convert::Infallible,
    io,
    panic::resume_unwind,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{select, Receiver, Sender};

use crate::{drop::trace_lifetime, sync::Mutex};

/// A shared, idempotent cancellation flag.
///
/// Cloning a [`CancelToken`] yields another handle to the same flag.
#[derive(Clone)]
pub struct CancelToken {
    shared: Arc<Shared>,
    signal: Receiver<Infallible>,
}

struct Shared {
    cancelled: AtomicBool,
    /// Dropped when the token is raised, disconnecting every `signal` receiver.
    trigger: Mutex<Option<Sender<Infallible>>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates a token that has not been cancelled yet.
    pub fn new() -> Self {
        let (trigger, signal) = crossbeam_channel::bounded(0);
        Self {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
            }),
            signal,
        }
    }

    /// Raises the token.
    ///
    /// Returns `true` if this call raised it, and `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        drop(self.shared.trigger.lock().take());
        true
    }

    /// Returns whether the token has been raised.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Returns a channel that becomes disconnected once the token is raised.
    ///
    /// Nothing is ever sent over it, so a `recv` on it only ever completes with an error, and does
    /// so exactly when (and as long as) the token is cancelled.
    #[inline]
    pub fn signal(&self) -> &Receiver<Infallible> {
        &self.signal
    }

    /// Blocks the calling thread until the token is raised.
    pub fn wait(&self) {
        // Only returns on disconnection.
        let _ = self.signal.recv();
    }

    /// Blocks the calling thread until the token is raised or `timeout` has elapsed.
    ///
    /// Returns whether the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let _ = self.signal.recv_timeout(timeout);
        self.is_cancelled()
    }

    /// Spawns a timer thread that raises this token once `timeout` has elapsed.
    ///
    /// Dropping the returned [`Deadline`] disarms the timer (if it hasn't fired yet) and joins the
    /// thread. The thread also exits early if the token is raised by someone else.
    pub fn cancel_after(&self, timeout: Duration) -> io::Result<Deadline> {
        let token = self.clone();
        let (stop, stopped) = crossbeam_channel::bounded::<Infallible>(0);
        let handle = thread::Builder::new()
            .name("cancel-deadline".into())
            .spawn(move || {
                let _guard = trace_lifetime(format!("deadline of {timeout:?}"));
                select! {
                    recv(stopped) -> _ => {},
                    recv(token.signal()) -> _ => {},
                    recv(crossbeam_channel::after(timeout)) -> _ => {
                        if token.cancel() {
                            log::debug!("deadline of {timeout:?} expired, cancelling");
                        }
                    },
                }
            })?;

        Ok(Deadline {
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// An owned timer thread that raises a [`CancelToken`] when it expires.
///
/// Created by [`CancelToken::cancel_after`]. Dropping it disarms the timer and joins the thread.
pub struct Deadline {
    stop: Option<Sender<Infallible>>,
    handle: Option<JoinHandle<()>>,
}

impl Deadline {
    /// Returns whether the timer thread has exited, either because it fired or because the token
    /// was raised by someone else.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        // Disconnect the stop channel to make the thread exit.
        drop(self.stop.take());

        if let Some(handle) = self.handle.take() {
            if let Err(payload) = handle.join() {
                if !thread::panicking() {
                    resume_unwind(payload);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crate::test::{init_test_logger, wait_until};

    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        assert!(!clone.is_cancelled());

        assert!(clone.cancel());
        assert!(!token.cancel());
        assert!(!clone.cancel());
        assert!(token.is_cancelled());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn signal_is_level_triggered() {
        let token = CancelToken::new();
        assert_eq!(
            token.signal().try_recv(),
            Err(crossbeam_channel::TryRecvError::Empty)
        );

        token.cancel();
        for _ in 0..3 {
            assert_eq!(
                token.signal().try_recv(),
                Err(crossbeam_channel::TryRecvError::Disconnected)
            );
        }
        // `wait` returns immediately once raised.
        token.wait();
    }

    #[test]
    fn wakes_blocked_select() {
        let token = CancelToken::new();
        let remote = token.clone();
        let (_keep, never) = crossbeam_channel::unbounded::<()>();

        let waiter = thread::spawn(move || {
            select! {
                recv(never) -> _ => false,
                recv(remote.signal()) -> _ => true,
            }
        });
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn wait_timeout() {
        let token = CancelToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(5)));
        token.cancel();
        assert!(token.wait_timeout(Duration::from_secs(10)));
    }

    #[test]
    fn deadline_fires() {
        init_test_logger();
        let token = CancelToken::new();
        let start = Instant::now();
        let deadline = token.cancel_after(Duration::from_millis(20)).unwrap();

        token.wait();
        assert!(start.elapsed() >= Duration::from_millis(20));
        drop(deadline);
        assert!(token.is_cancelled());
    }

    #[test]
    fn dropped_deadline_does_not_fire() {
        let token = CancelToken::new();
        let deadline = token.cancel_after(Duration::from_secs(3600)).unwrap();
        let start = Instant::now();
        drop(deadline);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!token.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn deadline_exits_when_cancelled_elsewhere() {
        let token = CancelToken::new();
        let deadline = token.cancel_after(Duration::from_secs(3600)).unwrap();
        token.cancel();
        assert!(wait_until(Duration::from_secs(10), || deadline.is_finished()));
    }

    #[test]
    fn token_is_send_sync() {
        assert_send_sync::<CancelToken>();
    }
}
