//! Small building blocks for thread-based concurrency: a bounded task runner, cancellable
//! pipelines, and a thread-safe LRU cache.
//!
//! (if you're looking for data-parallel iteration, check out [`rayon`] instead; if you need to
//! juggle large numbers of I/O-bound tasks, you're probably better served by an `async` runtime)
//!
//! # Overview
//!
//! Everything in this crate runs on plain OS threads and communicates over [`crossbeam_channel`]s.
//! Threads are always *owned*: whatever spawns them also joins them, and a panic on one of them is
//! forwarded to the thread doing the joining. No stale thread outlives the operation that started
//! it.
//!
//! ## Running tasks
//!
//! [`run`] (or the configurable [`Runner`]) executes a batch of fallible tasks on a fixed number of
//! worker threads, and abandons the rest of the batch once too many of them have failed.
//!
//! ## Pipelines
//!
//! A [`Stream`] is a channel together with the threads feeding it. [`execute`] chains a list of
//! [`Stage`]s behind an input stream, and stops the whole pipeline when a [`CancelToken`] is
//! raised.
//!
//! ## Caching
//!
//! [`LruCache`] is a fixed-capacity map that evicts its least recently used entry. It is backed by
//! [`OrderingList`], a doubly linked list with stable node handles.
//!
//! # Usage
//!
//! Tasks that fetch values concurrently and memoize them in a shared cache:
//!
//! ```
//! use runnel::{run, LruCache};
//!
//! let cache = LruCache::new(16);
//! let tasks = (0..32u64).map(|n| {
//!     let cache = &cache;
//!     move || {
//!         cache.set(n % 8, n * n);
//!         Ok::<_, ()>(())
//!     }
//! });
//! run(tasks, 4, 0).unwrap();
//!
//! assert_eq!(cache.len(), 8);
//! ```
//!
//! A pipeline that is cut short by a deadline:
//!
//! ```
//! use std::{thread, time::Duration};
//! use runnel::{execute, stage, CancelToken, Stream};
//!
//! let token = CancelToken::new();
//! let _deadline = token.cancel_after(Duration::from_millis(50)).unwrap();
//!
//! let slow = stage(|x: u64| {
//!     thread::sleep(Duration::from_millis(10));
//!     x
//! });
//! let output = execute(Stream::source(0..).unwrap(), &token, vec![slow]).unwrap();
//!
//! // The input is endless, but the stream ends once the deadline expires.
//! assert!(output.count() < 50);
//! ```
//!
//! [`rayon`]: https://crates.io/crates/rayon

mod cache;
pub mod cancel;
mod drop;
pub mod list;
pub mod pipeline;
pub mod runner;
mod sync;

pub use cache::{LruCache, ZeroCapacity};
pub use cancel::{CancelToken, Deadline};
pub use list::{NodeRef, OrderingList, StaleNode};
pub use pipeline::{execute, stage, Stage, Stream};
pub use runner::{run, RunError, Runner};
