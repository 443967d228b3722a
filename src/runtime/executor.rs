//! Cross-actor handoff.
//!
//! [`Executor::post`] is the only way work moves between actors. Two
//! implementations exist:
//!
//! - [`ActorRuntime`]: dedicated threads for `Main`, `Ticker` and `Physics`, a
//!   private multi-thread tokio runtime for `Async`, and the caller's runtime
//!   handle for `Io`.
//! - [`ManualExecutor`]: a FIFO queue drained explicitly, for deterministic
//!   tests.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::JoinHandle;

use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{Result, SessionError};
use crate::runtime::affinity::{self, Actor};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync {
    /// Queue `job` to run on `actor`. Never runs it inline.
    fn post(&self, actor: Actor, job: Job) -> Result<()>;
}

impl dyn Executor {
    pub fn spawn_on<F>(&self, actor: Actor, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(actor, Box::new(f))
    }
}

fn run_job(actor: Actor, job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(actor = %actor, "Job panicked");
    }
}

/// Deterministic executor. Jobs run only when [`ManualExecutor::run_pending`]
/// is called, each under an [`affinity::enter`] override for its actor.
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<(Actor, Job)>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn pending_for(&self, actor: Actor) -> usize {
        self.queue
            .lock()
            .map(|q| q.iter().filter(|(a, _)| *a == actor).count())
            .unwrap_or(0)
    }

    fn pop(&self) -> Option<(Actor, Job)> {
        self.queue.lock().ok()?.pop_front()
    }

    /// Run queued jobs, including ones they post, until the queue is empty.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Some((actor, job)) = self.pop() {
            let _guard = affinity::enter(actor);
            run_job(actor, job);
            ran += 1;
        }
        ran
    }
}

impl Executor for ManualExecutor {
    fn post(&self, actor: Actor, job: Job) -> Result<()> {
        if actor == Actor::Unknown {
            return Err(SessionError::ActorUnavailable(actor));
        }
        self.queue
            .lock()
            .map_err(|_| SessionError::ActorUnavailable(actor))?
            .push_back((actor, job));
        Ok(())
    }
}

const THREAD_ACTORS: [Actor; 3] = [Actor::Main, Actor::Ticker, Actor::Physics];

/// Production executor backed by real threads and runtimes.
pub struct ActorRuntime {
    lanes: HashMap<Actor, mpsc::UnboundedSender<Job>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    async_pool: Option<Runtime>,
    io: Handle,
}

impl ActorRuntime {
    /// Start the actor threads and the async pool. `io` is the runtime that
    /// drives transports.
    pub fn start(io: Handle, async_workers: usize) -> Result<Self> {
        let async_pool = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(async_workers.max(1))
            .thread_name("async-actor")
            .on_thread_start(|| affinity::bind_thread(Actor::Async))
            .enable_all()
            .build()?;

        let mut lanes = HashMap::new();
        let mut threads = Vec::new();
        for actor in THREAD_ACTORS {
            let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
            let handle = std::thread::Builder::new()
                .name(format!("{actor}-actor"))
                .spawn(move || {
                    affinity::bind_thread(actor);
                    while let Some(job) = rx.blocking_recv() {
                        run_job(actor, job);
                    }
                    debug!(actor = %actor, "Actor thread exiting");
                })?;
            lanes.insert(actor, tx);
            threads.push(handle);
        }

        info!(async_workers = async_workers.max(1), "Actor runtime started");
        Ok(Self {
            lanes,
            threads: Mutex::new(threads),
            async_pool: Some(async_pool),
            io,
        })
    }

    /// Start with the I/O actor on the ambient tokio runtime.
    pub fn start_current(async_workers: usize) -> Result<Self> {
        let io = Handle::try_current()
            .map_err(|e| SessionError::ConfigError(format!("No tokio runtime: {e}")))?;
        Self::start(io, async_workers)
    }

    pub fn io_handle(&self) -> Handle {
        self.io.clone()
    }

    /// Close every lane and wait for the actor threads to finish their queues.
    pub fn shutdown(mut self) {
        self.lanes.clear();
        let current = std::thread::current().id();
        let threads = self
            .threads
            .lock()
            .map(|mut t| std::mem::take(&mut *t))
            .unwrap_or_default();
        for handle in threads {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        if let Some(pool) = self.async_pool.take() {
            pool.shutdown_background();
        }
        info!("Actor runtime stopped");
    }
}

impl Executor for ActorRuntime {
    fn post(&self, actor: Actor, job: Job) -> Result<()> {
        match actor {
            Actor::Main | Actor::Ticker | Actor::Physics => self
                .lanes
                .get(&actor)
                .ok_or(SessionError::ActorUnavailable(actor))?
                .send(job)
                .map_err(|_| SessionError::ActorUnavailable(actor)),
            Actor::Async => {
                let pool = self
                    .async_pool
                    .as_ref()
                    .ok_or(SessionError::ActorUnavailable(actor))?;
                pool.spawn(async move { run_job(Actor::Async, job) });
                Ok(())
            }
            Actor::Io => {
                self.io.spawn(affinity::scope(Actor::Io, async move {
                    run_job(Actor::Io, job)
                }));
                Ok(())
            }
            Actor::Unknown => Err(SessionError::ActorUnavailable(actor)),
        }
    }
}

impl Drop for ActorRuntime {
    fn drop(&mut self) {
        // Dropping a runtime from async context panics
        if let Some(pool) = self.async_pool.take() {
            pool.shutdown_background();
        }
    }
}
