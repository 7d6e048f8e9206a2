//! Running independent tasks on a bounded number of threads, with an error budget.
//!
//! [`run`] (or the configurable [`Runner`]) executes a sequence of fallible tasks on a fixed number
//! of worker threads. Every failed task is counted. As soon as the number of failures exceeds the
//! error budget, the remaining tasks are abandoned: tasks that are already running complete, but no
//! new task is started.
//!
//! Workers are scoped threads, so tasks may borrow from the caller's stack. [`run`] only returns
//! once every worker has exited.
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use runnel::runner::{run, RunError};
//!
//! let done = AtomicUsize::new(0);
//! let tasks = (0..20).map(|i| {
//!     let done = &done;
//!     move || {
//!         done.fetch_add(1, Ordering::Relaxed);
//!         if i % 10 == 0 { Err("unlucky") } else { Ok(()) }
//!     }
//! });
//!
//! // 2 failures fit into a budget of 2.
//! run(tasks, 4, 2).unwrap();
//! assert_eq!(done.load(Ordering::Relaxed), 20);
//!
//! let failing = (0..20).map(|_| || Err::<(), _>("always"));
//! assert!(matches!(run(failing, 4, 2), Err(RunError::ErrorsLimitExceeded { .. })));
//! ```

use std::{
    error::Error,
    fmt, io,
    panic::resume_unwind,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use crossbeam_channel::{select, Receiver, Sender};

use crate::{
    drop::{defer, trace_lifetime},
    CancelToken,
};

/// Runs `tasks` on `workers` threads, giving up once more than `error_budget` tasks have failed.
///
/// This is a shorthand for configuring a [`Runner`]; see [`Runner::run`] for the details.
pub fn run<I, F, E>(tasks: I, workers: usize, error_budget: usize) -> Result<(), RunError>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Result<(), E> + Send,
{
    Runner::new()
        .workers(workers)
        .error_budget(error_budget)
        .run(tasks)
}

/// Configuration for running a batch of tasks on a bounded set of worker threads.
///
/// By default, a [`Runner`] uses a single unnamed worker thread and an error budget of 0 (the first
/// failing task aborts the batch).
#[derive(Debug, Clone)]
pub struct Runner {
    name: Option<String>,
    workers: usize,
    error_budget: usize,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a [`Runner`] with default configuration.
    pub fn new() -> Self {
        Self {
            name: None,
            workers: 1,
            error_budget: 0,
        }
    }

    /// Sets the base name of the worker threads.
    ///
    /// Each thread spawned will be named according to this base name and its index.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the number of worker threads, and thereby the maximum number of tasks that run at once.
    ///
    /// A [`Runner`] with 0 workers does not run any task, and always succeeds.
    #[inline]
    pub fn workers(self, workers: usize) -> Self {
        Self { workers, ..self }
    }

    /// Sets the number of task failures that are tolerated.
    ///
    /// The batch is aborted as soon as the failure count is *greater* than `error_budget`. A budget
    /// of 0 aborts on the first failure.
    #[inline]
    pub fn error_budget(self, error_budget: usize) -> Self {
        Self {
            error_budget,
            ..self
        }
    }

    /// Runs `tasks`, blocking until every worker thread has exited.
    ///
    /// Tasks are handed out in iteration order to whichever worker is idle; there is no guarantee
    /// about the order in which they complete. A task that returns `Err` counts as a failure; the
    /// error value itself is discarded.
    ///
    /// Once the failure count exceeds the error budget, no further task is started. Tasks that were
    /// already running are allowed to complete, and the remaining tasks are dropped without being
    /// run. In that case [`RunError::ErrorsLimitExceeded`] is returned. If some tasks fail but the
    /// budget is not exceeded, this returns `Ok(())`.
    ///
    /// If a task panics, no further tasks are started, and the panic is propagated to the caller
    /// after all workers have exited.
    pub fn run<I, F, E>(&self, tasks: I) -> Result<(), RunError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Result<(), E> + Send,
    {
        if self.workers == 0 {
            log::debug!("no workers configured, not running any task");
            return Ok(());
        }

        let budget = self.error_budget;
        let token = CancelToken::new();
        let failures = AtomicUsize::new(0);

        let spawned = thread::scope(|scope| {
            let (sender, queue) = crossbeam_channel::bounded::<F>(0);

            let mut handles = Vec::with_capacity(self.workers);
            let mut spawned = Ok(());
            for index in 0..self.workers {
                let worker = Worker {
                    index,
                    queue: queue.clone(),
                    token: &token,
                    failures: &failures,
                    budget,
                };
                match self.thread_builder(index).spawn_scoped(scope, move || worker.run()) {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        token.cancel();
                        spawned = Err(err);
                        break;
                    }
                }
            }
            drop(queue);

            if spawned.is_ok() {
                dispatch(tasks, &sender, &token);
            }
            // Close the queue so that idle workers exit.
            drop(sender);

            // Wait for all threads to exit and propagate a panic if one of them panicked.
            let mut payload = None;
            for handle in handles {
                if let Err(pl) = handle.join() {
                    payload = Some(pl);
                }
            }
            if let Some(payload) = payload {
                resume_unwind(payload);
            }

            spawned
        });

        if let Err(err) = spawned {
            return Err(RunError::Spawn(err));
        }

        let failures = failures.into_inner();
        if failures > budget {
            Err(RunError::ErrorsLimitExceeded { failures, budget })
        } else {
            Ok(())
        }
    }

    fn thread_builder(&self, index: usize) -> thread::Builder {
        let mut builder = thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(format!("{name}-{index}"));
        }
        builder
    }
}

/// Hands out `tasks` to the workers until they run out or the token is raised.
fn dispatch<I, F>(tasks: I, sender: &Sender<F>, token: &CancelToken)
where
    I: IntoIterator<Item = F>,
{
    for task in tasks {
        if token.is_cancelled() {
            break;
        }
        let handed_out = select! {
            send(sender, task) -> res => res.is_ok(),
            recv(token.signal()) -> _ => false,
        };
        if !handed_out {
            break;
        }
    }
}

struct Worker<'a, F> {
    index: usize,
    queue: Receiver<F>,
    token: &'a CancelToken,
    failures: &'a AtomicUsize,
    budget: usize,
}

impl<'a, F, E> Worker<'a, F>
where
    F: FnOnce() -> Result<(), E>,
{
    fn run(self) {
        let _guard = trace_lifetime(format!("runner worker {}", self.index));
        let token = self.token;
        let _cancel_on_panic = defer(move || {
            if thread::panicking() {
                token.cancel();
            }
        });

        loop {
            let task = select! {
                recv(self.queue) -> msg => msg.ok(),
                recv(token.signal()) -> _ => None,
            };
            let Some(task) = task else { break };
            if token.is_cancelled() {
                // Handed out just as the budget ran out; abandon it.
                break;
            }

            if task().is_err() {
                self.record_failure();
            }
        }
    }

    fn record_failure(&self) {
        let count = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        log::trace!("task failed on worker {} ({count} failures)", self.index);
        if count > self.budget && self.token.cancel() {
            log::debug!(
                "error budget of {} exceeded, abandoning remaining tasks",
                self.budget
            );
        }
    }
}

/// An error returned by [`run`] and [`Runner::run`].
#[derive(Debug)]
pub enum RunError {
    /// More tasks failed than the error budget allows.
    ErrorsLimitExceeded {
        /// Number of failed tasks. Tasks that were in flight when the budget ran out are included.
        failures: usize,
        /// The configured error budget.
        budget: usize,
    },
    /// A worker thread could not be spawned. No task was started.
    Spawn(io::Error),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::ErrorsLimitExceeded { failures, budget } => write!(
                f,
                "errors limit exceeded: {failures} tasks failed, {budget} allowed"
            ),
            RunError::Spawn(_) => f.write_str("failed to spawn worker thread"),
        }
    }
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RunError::ErrorsLimitExceeded { .. } => None,
            RunError::Spawn(err) => Some(err),
        }
    }
}
