//! Cancellable stream processing pipelines.
//!
//! A [`Stream`] is the receiving end of a channel, together with the threads that feed it. Streams
//! are chained by [`Stream::spawn_map`], or by [`execute`], which composes a list of [`Stage`]s and
//! threads a [`CancelToken`] through every link.
//!
//! Every thread of a pipeline is owned by the [`Stream`] it ultimately feeds: dropping the final
//! [`Stream`] disconnects it and joins all of them. If one of those threads panicked, the panic is
//! forwarded to the thread dropping the [`Stream`].
//!
//! # Cancellation
//!
//! [`execute`] places a *guard* thread behind the input and behind each stage. Guards forward items
//! one by one and watch the token while they wait. Once the token is raised, every guard stops
//! forwarding and closes its output, so the final [`Stream`] ends. Each guard then discards what
//! its upstream is trying to hand over and disconnects from it, so that a producer stuck in a
//! `send` into the abandoned link is released and can exit as well.
//!
//! ```
//! use runnel::{pipeline::{execute, stage, Stream}, CancelToken};
//!
//! let token = CancelToken::new();
//! let input = Stream::source(1..=5).unwrap();
//! let output = execute(input, &token, vec![stage(|x| x * 2), stage(|x| x + 100)]).unwrap();
//!
//! assert_eq!(output.collect::<Vec<_>>(), [102, 104, 106, 108, 110]);
//! ```

use std::{
    io, mem,
    panic::resume_unwind,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{select, Receiver, Sender};

use crate::{drop::trace_lifetime, CancelToken};

/// A stream transformation that can be composed into a pipeline by [`execute`].
///
/// A stage receives the stream produced by the previous stage (or the pipeline input) and returns
/// the stream it produces. Use [`stage`] to build one from a per-item closure.
pub type Stage<T> = Box<dyn FnOnce(Stream<T>) -> io::Result<Stream<T>>>;

/// A stream of items, and the owned threads producing them.
///
/// Items are received in the order they were sent, either with [`Stream::recv`] or by iterating.
/// The stream ends once every producer has finished (or the pipeline was cancelled).
///
/// Dropping a [`Stream`] disconnects it, and then joins every thread feeding it.
pub struct Stream<T> {
    rx: Receiver<T>,
    threads: Vec<JoinHandle<()>>,
    /// Raised on drop to shut down the guards feeding this stream.
    closers: Vec<CancelToken>,
}

impl<T> Stream<T> {
    /// Wraps the receiving end of a channel.
    ///
    /// The stream ends when every sender of the channel has been dropped.
    pub fn from_receiver(rx: Receiver<T>) -> Self {
        Self {
            rx,
            threads: Vec::new(),
            closers: Vec::new(),
        }
    }

    /// Blocks until the next item is available and returns it.
    ///
    /// Returns [`None`] once the stream has ended.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Returns whether every thread feeding this stream has exited.
    pub fn is_finished(&self) -> bool {
        self.threads.iter().all(JoinHandle::is_finished)
    }

    /// Takes the stream apart without shutting anything down.
    fn detach(mut self) -> (Receiver<T>, Feeders) {
        let rx = mem::replace(&mut self.rx, crossbeam_channel::never());
        let feeders = Feeders {
            threads: mem::take(&mut self.threads),
            closers: mem::take(&mut self.closers),
        };
        (rx, feeders)
    }
}

impl<T: Send + 'static> Stream<T> {
    /// Spawns a thread that sends every item of `items` into a new stream.
    ///
    /// The thread exits when `items` is exhausted or when the stream is dropped.
    pub fn source<I>(items: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let items = items.into_iter();
        let (tx, rx) = crossbeam_channel::bounded(0);
        let handle = thread::Builder::new()
            .name("pipeline-source".into())
            .spawn(move || {
                let _guard = trace_lifetime("pipeline source".into());
                for item in items {
                    if tx.send(item).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            rx,
            threads: vec![handle],
            closers: Vec::new(),
        })
    }

    /// Spawns a thread that applies `f` to every item of this stream, in order.
    ///
    /// The thread exits when this stream ends, or when the returned stream is dropped.
    ///
    /// Unlike [`Iterator::map`], this does not wait for the returned stream to be polled: `f` runs
    /// ahead on the new thread, one item at a time.
    pub fn spawn_map<U, F>(self, mut f: F) -> io::Result<Stream<U>>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let (input, feeders) = self.detach();
        let (tx, rx) = crossbeam_channel::bounded(0);
        // Owns the upstream threads from here on, so they are joined if spawning fails.
        let mut stream = feeders.feed(rx);

        let handle = thread::Builder::new()
            .name("pipeline-stage".into())
            .spawn(move || {
                let _guard = trace_lifetime("pipeline stage".into());
                for item in input {
                    if tx.send(f(item)).is_err() {
                        break;
                    }
                }
            })?;
        stream.threads.push(handle);
        Ok(stream)
    }
}

/// The threads and close tokens of a detached [`Stream`].
struct Feeders {
    threads: Vec<JoinHandle<()>>,
    closers: Vec<CancelToken>,
}

impl Feeders {
    fn feed<T>(self, rx: Receiver<T>) -> Stream<T> {
        Stream {
            rx,
            threads: self.threads,
            closers: self.closers,
        }
    }
}

impl<T> Iterator for Stream<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.recv()
    }
}

impl<T> Drop for Stream<T> {
    fn drop(&mut self) {
        for closer in self.closers.drain(..) {
            closer.cancel();
        }
        // Disconnect, so that a producer blocked in `send` exits.
        drop(mem::replace(&mut self.rx, crossbeam_channel::never()));

        // Wait for all threads to exit and propagate a panic if one of them panicked.
        let mut payload = None;
        for handle in self.threads.drain(..) {
            if let Err(pl) = handle.join() {
                payload = Some(pl);
            }
        }
        if let Some(payload) = payload {
            if !thread::panicking() {
                resume_unwind(payload);
            }
        }
    }
}

/// Builds a [`Stage`] that applies `f` to every item on its own thread.
pub fn stage<T, F>(f: F) -> Stage<T>
where
    T: Send + 'static,
    F: FnMut(T) -> T + Send + 'static,
{
    Box::new(move |input: Stream<T>| input.spawn_map(f))
}

/// Chains `stages` behind `input`, and returns the stream produced by the last stage.
///
/// Every link of the pipeline (the input, and each stage output) is forwarded by a guard thread
/// watching `cancel`, and each stage receives the guarded stream. With no stages, the guarded input
/// is returned.
///
/// Without cancellation, every input item arrives at the output exactly once and in order (unless a
/// stage drops or adds items), and the output ends when the input does. Raising `cancel` ends the
/// output stream promptly and makes every thread of the pipeline exit. Dropping the returned stream
/// shuts the pipeline down the same way, without raising `cancel`.
///
/// A stage may stop reading its input early, or drop it: the guard feeding that input is shut down
/// when its stream is dropped, while the rest of the pipeline keeps running.
pub fn execute<T, S>(input: Stream<T>, cancel: &CancelToken, stages: S) -> io::Result<Stream<T>>
where
    T: Send + 'static,
    S: IntoIterator<Item = Stage<T>>,
{
    let mut current = guard(input, cancel, 0)?;
    for (index, stage) in stages.into_iter().enumerate() {
        current = guard(stage(current)?, cancel, index + 1)?;
    }
    Ok(current)
}

/// Puts a forwarding thread behind `upstream` that stops when `cancel` is raised, or when the
/// returned stream is dropped.
fn guard<T: Send + 'static>(
    upstream: Stream<T>,
    cancel: &CancelToken,
    link: usize,
) -> io::Result<Stream<T>> {
    let (input, feeders) = upstream.detach();
    let (tx, rx) = crossbeam_channel::bounded(0);
    // On error, dropping this raises the upstream closers and joins the upstream threads.
    let mut stream = feeders.feed(rx);

    let cancel = cancel.clone();
    let closed = CancelToken::new();
    let watched = closed.clone();
    let spawned = thread::Builder::new()
        .name(format!("pipeline-guard-{link}"))
        .spawn(move || {
            let _guard = trace_lifetime(format!("pipeline guard {link}"));
            forward(&input, &tx, &cancel, &watched);
            // Close our end first, so downstream sees the stream end right away.
            drop(tx);
            drain(input);
        });

    stream.threads.push(spawned?);
    stream.closers.push(closed);
    Ok(stream)
}

fn forward<T>(input: &Receiver<T>, out: &Sender<T>, cancel: &CancelToken, closed: &CancelToken) {
    loop {
        if cancel.is_cancelled() || closed.is_cancelled() {
            return;
        }
        let item = select! {
            recv(input) -> msg => match msg {
                Ok(item) => item,
                Err(_) => return,
            },
            recv(cancel.signal()) -> _ => return,
            recv(closed.signal()) -> _ => return,
        };

        if cancel.is_cancelled() {
            return;
        }
        select! {
            send(out, item) -> res => {
                if res.is_err() {
                    return;
                }
            },
            recv(cancel.signal()) -> _ => return,
            recv(closed.signal()) -> _ => return,
        }
    }
}

/// Discards what `input` is holding and disconnects from it.
///
/// Disconnecting releases an upstream producer blocked in `send`, which then observes the closed
/// link and exits instead of waiting forever for a consumer that is gone.
fn drain<T>(input: Receiver<T>) {
    let discarded = input.try_iter().count();
    if discarded != 0 {
        log::trace!("drained {discarded} items from an abandoned link");
    }
}
