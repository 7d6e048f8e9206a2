//! Utilities related to destructors and drop.

/// Drop guard returned by [`defer`].
#[must_use = "`Defer` should be assigned to a variable, or it will be dropped immediately"]
pub struct Defer<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(cb) = self.0.take() {
            cb();
        }
    }
}

/// Returns a value that runs `cb` when dropped.
///
/// The callback also runs while unwinding, which makes this suitable for "thread exiting" log
/// lines and for releasing counters held by a thread body.
pub fn defer<F: FnOnce()>(cb: F) -> Defer<F> {
    Defer(Some(cb))
}

/// Logs that the thread `what` is starting now, and that it is exiting when the guard is dropped.
pub(crate) fn trace_lifetime(what: String) -> Defer<impl FnOnce()> {
    log::trace!("{what} starting");
    defer(move || log::trace!("{what} exiting"))
}
