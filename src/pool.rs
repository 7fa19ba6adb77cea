// Copyright 2025 The jobq authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A fixed set of worker threads draining a shared LIFO list of jobs.

use crate::macros::{log_debug, log_error};
use crate::sync::{Event, Monitor};
use crossbeam_utils::CachePadded;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Number of worker threads to spawn in a job queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl TryFrom<usize> for ThreadCount {
    type Error = <NonZeroUsize as TryFrom<usize>>::Error;

    /// Fails if the given count is zero.
    fn try_from(thread_count: usize) -> Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(thread_count)?;
        Ok(ThreadCount::Count(count))
    }
}

/// A builder for [`JobQueue`].
pub struct JobQueueBuilder {
    /// Number of worker threads to spawn in the queue.
    pub num_threads: ThreadCount,
}

impl JobQueueBuilder {
    /// Spawns a job queue.
    ///
    /// The worker threads start running immediately and block until jobs are
    /// submitted.
    ///
    /// ```
    /// # use jobq::{JobQueueBuilder, ThreadCount};
    /// # use std::sync::atomic::{AtomicUsize, Ordering};
    /// # use std::sync::Arc;
    /// let mut queue = JobQueueBuilder {
    ///     num_threads: ThreadCount::try_from(4).unwrap(),
    /// }
    /// .build();
    ///
    /// let counter = Arc::new(AtomicUsize::new(0));
    /// for _ in 0..10 {
    ///     let counter = counter.clone();
    ///     queue.submit(move || {
    ///         counter.fetch_add(1, Ordering::Relaxed);
    ///     });
    /// }
    ///
    /// queue.drain();
    /// assert_eq!(counter.load(Ordering::Relaxed), 10);
    /// ```
    pub fn build(&self) -> JobQueue {
        JobQueue::new(self)
    }
}

/// A boxed unit of work. The queue is fire-and-forget: jobs return nothing,
/// and communicate only through whatever state their closure captures.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// State guarded by the queue's single lock.
struct QueueState {
    /// Pending jobs, used as a stack: the most recently submitted job is
    /// dispatched first.
    todo: Vec<Job>,
    /// Whether submissions and waiting-for-work are still permitted. Flipped
    /// to `false` exactly once, when draining begins.
    accepting: bool,
    /// Number of workers that have observed shutdown and parked.
    stopped: usize,
}

/// Context shared between the owning thread and the worker threads.
struct Shared {
    /// The pending list, the accepting flag and the stopped counter, all
    /// under one lock.
    state: Monitor<QueueState>,
    /// Signaled once per submission (waking one worker), broadcast when
    /// draining begins (waking all of them).
    work_available: Event,
    /// Signaled by the last worker to park, releasing the draining thread.
    all_done: Event,
    /// Number of workers whose job panicked, maintained outside the lock.
    num_panicking_threads: CachePadded<AtomicUsize>,
}

/// Handle to a worker thread in a job queue.
struct WorkerThreadHandle {
    /// Thread handle object.
    handle: JoinHandle<()>,
}

/// A fixed-size pool of worker threads draining a shared LIFO job list.
///
/// Jobs are submitted with [`submit()`](Self::submit) and executed by
/// whichever worker becomes idle first, most recent submission first. The
/// [`drain()`](Self::drain) barrier stops acceptance and blocks until every
/// already-submitted job has run and every worker has parked. Dropping the
/// queue drains it first if the caller didn't, then joins all the workers.
pub struct JobQueue {
    /// Context shared with the worker threads.
    shared: Arc<Shared>,
    /// Handles to all the worker threads in the queue.
    threads: Vec<WorkerThreadHandle>,
    /// Whether [`drain()`](Self::drain) has been called.
    drained: bool,
}

impl JobQueue {
    /// Creates a new job queue using the given parameters.
    fn new(builder: &JobQueueBuilder) -> Self {
        let num_threads: NonZeroUsize = match builder.num_threads {
            ThreadCount::AvailableParallelism => std::thread::available_parallelism()
                .expect("Getting the available parallelism failed"),
            ThreadCount::Count(count) => count,
        };
        let num_threads: usize = num_threads.into();

        let shared = Arc::new(Shared {
            state: Monitor::new(QueueState {
                todo: Vec::new(),
                accepting: true,
                stopped: 0,
            }),
            work_available: Event::new(),
            all_done: Event::new(),
            num_panicking_threads: CachePadded::new(AtomicUsize::new(0)),
        });

        let threads = (0..num_threads)
            .map(|id| {
                let context = WorkerContext {
                    #[cfg(feature = "log")]
                    id,
                    num_threads,
                    shared: shared.clone(),
                };
                WorkerThreadHandle {
                    handle: std::thread::Builder::new()
                        .name(format!("jobq-worker-{id}"))
                        .spawn(move || context.run())
                        .expect("Failed to spawn a worker thread"),
                }
            })
            .collect();
        log_debug!("[main thread] Spawned {num_threads} worker threads");

        Self {
            shared,
            threads,
            drained: false,
        }
    }

    /// Returns the number of worker threads that have been spawned in this
    /// queue.
    pub fn num_threads(&self) -> NonZeroUsize {
        self.threads.len().try_into().unwrap()
    }

    /// Submits a job to the queue.
    ///
    /// The job is pushed at the head of the pending list and one idle worker
    /// is woken. Submission never waits for a worker to become available; it
    /// only takes the queue's lock for the duration of the push.
    ///
    /// # Panics
    ///
    /// Panics if called after [`drain()`](Self::drain) has begun.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.state.lock();
        assert!(
            state.accepting,
            "submit() called on a queue that is draining"
        );
        state.todo.push(Box::new(job));
        self.shared.work_available.notify_one();
    }

    /// Stops accepting jobs and blocks until every submitted job has run and
    /// every worker has parked.
    ///
    /// Once this returns, all side effects written by the jobs are visible to
    /// the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if called more than once, or if any worker panicked while
    /// running a job.
    pub fn drain(&mut self) {
        assert!(!self.drained, "drain() may only be called once");
        self.drained = true;
        self.drain_inner();

        let num_panicking_threads = self.shared.num_panicking_threads.load(Ordering::SeqCst);
        if num_panicking_threads != 0 {
            log_error!("[main thread] {num_panicking_threads} worker thread(s) panicked!");
            panic!("{num_panicking_threads} worker thread(s) panicked!");
        }
    }

    /// The shutdown barrier: flips the accepting flag, then broadcasts the
    /// workers awake and waits until the last of them has parked.
    fn drain_inner(&self) {
        let num_threads = self.threads.len();
        let mut state = self.shared.state.lock();
        state.accepting = false;
        log_debug!("[main thread] Draining; waiting for {num_threads} workers to park");
        while state.stopped < num_threads {
            // Wake every blocked worker so it re-tests the predicate and
            // proceeds to drain or park.
            self.shared.work_available.notify_all();
            state = self.shared.all_done.wait(state);
        }
        if !state.todo.is_empty() {
            // Reachable only if workers died to panicking jobs. The leftover
            // jobs are dropped unexecuted; drain() reports the lost workers.
            log_error!(
                "[main thread] Dropping {} unexecuted jobs",
                state.todo.len()
            );
            state.todo.clear();
        }
        log_debug!("[main thread] All workers parked");
    }
}

impl Drop for JobQueue {
    /// Drains the queue if [`drain()`](Self::drain) wasn't called, then joins
    /// all the worker threads.
    #[allow(clippy::unused_enumerate_index)]
    fn drop(&mut self) {
        let report_panics = if self.drained {
            // drain() already reported worker panics.
            false
        } else {
            self.drain_inner();
            true
        };

        log_debug!("[main thread] Joining worker threads...");
        for (_i, t) in self.threads.drain(..).enumerate() {
            let result = t.handle.join();
            match result {
                Ok(_) => log_debug!("[main thread] Worker {_i} joined with result: {result:?}"),
                Err(_) => log_error!("[main thread] Worker {_i} joined with result: {result:?}"),
            }
        }
        log_debug!("[main thread] Joined worker threads.");

        if report_panics && !std::thread::panicking() {
            let num_panicking_threads = self.shared.num_panicking_threads.load(Ordering::SeqCst);
            if num_panicking_threads != 0 {
                panic!("{num_panicking_threads} worker thread(s) panicked!");
            }
        }
    }
}

/// Context object owned by a worker thread.
struct WorkerContext {
    /// Thread index.
    #[cfg(feature = "log")]
    id: usize,
    /// Total worker count, to recognize the last worker to park.
    num_threads: usize,
    /// Context shared with the owning thread.
    shared: Arc<Shared>,
}

impl WorkerContext {
    /// Main loop run by this worker thread.
    ///
    /// Repeatedly waits until the pending list is non-empty or the queue
    /// stops accepting, re-testing that predicate after every wakeup. A
    /// popped job runs with the lock released, so a long job never blocks
    /// submissions or the other workers' pops. On an empty list with
    /// acceptance over, the worker parks: it bumps the stopped counter and,
    /// if it is the last one, wakes the draining thread.
    fn run(&self) {
        loop {
            let mut state = self.shared.state.lock();
            state = self
                .shared
                .work_available
                .wait_while(state, |s| s.todo.is_empty() && s.accepting);

            let Some(job) = state.todo.pop() else {
                debug_assert!(!state.accepting);
                state.stopped += 1;
                log_debug!(
                    "[worker {}] Parked ({}/{})",
                    self.id,
                    state.stopped,
                    self.num_threads
                );
                if state.stopped == self.num_threads {
                    self.shared.all_done.notify_one();
                }
                return;
            };
            drop(state);

            log_debug!("[worker {}] Running a job", self.id);
            let notifier = PanicNotifier {
                #[cfg(feature = "log")]
                id: self.id,
                num_threads: self.num_threads,
                shared: &self.shared,
            };
            job();
            // Explicit drop for clarity.
            drop(notifier);
        }
    }
}

/// Guard armed while a worker runs a job.
///
/// A panicking job unwinds the worker thread before it can reach its park
/// sequence, which would leave the drain barrier waiting forever. This
/// destructor detects the unwind, performs the park bookkeeping on the dead
/// worker's behalf and records the panic for the owning thread to report.
struct PanicNotifier<'a> {
    /// Thread index.
    #[cfg(feature = "log")]
    id: usize,
    /// Total worker count, to recognize the last worker to park.
    num_threads: usize,
    /// Context shared with the owning thread.
    shared: &'a Shared,
}

impl Drop for PanicNotifier<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        log_error!("[worker {}] Job panicked; parking this worker", self.id);
        self.shared
            .num_panicking_threads
            .fetch_add(1, Ordering::SeqCst);

        let mut state = self.shared.state.lock();
        state.stopped += 1;
        if state.stopped == self.num_threads {
            self.shared.all_done.notify_one();
        }
    }
}
