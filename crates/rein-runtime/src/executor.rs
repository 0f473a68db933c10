#![forbid(unsafe_code)]

//! Command execution on the work context.
//!
//! The executor turns commands into result messages without touching state
//! or the queue. Pre-resolved commands are answered synchronously; domain
//! commands are resolved through a [`Job`] running on a worker thread. Job
//! failures and panics are captured and converted into `Msg::Error`
//! carrying the originating command.
//!
//! By default every job gets its own thread. With [`ExecutorConfig::with_pool`]
//! jobs are instead fed to a fixed set of worker threads.

use crate::cmd::{Cmd, Effect, Job};
use crate::message::{CallError, Msg};
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send>;

/// Configuration for the work context.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of pool workers; `None` spawns a thread per command.
    pub pool_size: Option<usize>,
    /// Thread name prefix for worker threads.
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: None,
            thread_name: "rein-work".into(),
        }
    }
}

impl ExecutorConfig {
    /// Run commands on a fixed pool of `workers` threads (at least one).
    #[must_use]
    pub fn with_pool(mut self, workers: usize) -> Self {
        self.pool_size = Some(workers.max(1));
        self
    }

    /// Spawn a fresh thread per command.
    #[must_use]
    pub fn thread_per_command(mut self) -> Self {
        self.pool_size = None;
        self
    }

    /// Override the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

struct WorkerPool {
    sender: Option<mpsc::Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn start(workers: usize, name: &str) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("{name}-{idx}"))
                .spawn(move || worker_loop(&rx))?;
            handles.push(handle);
        }
        Ok(Self {
            sender: Some(tx),
            handles,
        })
    }

    fn submit(&self, task: Task) -> Result<(), Task> {
        match &self.sender {
            Some(sender) => sender.send(task).map_err(|err| err.0),
            None => Err(task),
        }
    }

    fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(rx: &Mutex<mpsc::Receiver<Task>>) {
    loop {
        let next = rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
        match next {
            Ok(task) => task(),
            Err(_) => return,
        }
    }
}

/// A command flattened into its leaves.
///
/// `ready` holds pre-resolved messages in declaration order; `calls` holds
/// the domain commands that still need a job. Both [`CommandExecutor::execute`]
/// and the program loop fan commands out through this.
pub(crate) struct FanOut<M, C> {
    pub(crate) ready: Vec<Msg<M, C>>,
    pub(crate) calls: Vec<C>,
}

impl<M, C> FanOut<M, C> {
    pub(crate) fn of(cmd: Cmd<M, C>) -> Self {
        let mut fan_out = Self {
            ready: Vec::new(),
            calls: Vec::new(),
        };
        for effect in cmd.into_effects() {
            match effect {
                Effect::Ready(msg) => fan_out.ready.push(msg),
                Effect::Call(c) => fan_out.calls.push(c),
            }
        }
        fan_out
    }
}

/// Resolves commands into result messages.
pub struct CommandExecutor {
    config: ExecutorConfig,
    pool: Option<WorkerPool>,
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("config", &self.config)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl CommandExecutor {
    /// Create an executor, starting pool workers if configured.
    pub fn new(config: ExecutorConfig) -> io::Result<Self> {
        let pool = match config.pool_size {
            Some(workers) => Some(WorkerPool::start(workers, &config.thread_name)?),
            None => None,
        };
        Ok(Self { config, pool })
    }

    /// The active configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `job` on the work context and hand its result to `deliver`.
    pub fn spawn<M, C, F>(&self, cmd: C, job: Job<M, C>, deliver: F)
    where
        M: Send + 'static,
        C: Send + 'static,
        F: FnOnce(Msg<M, C>) + Send + 'static,
    {
        let task: Task = Box::new(move || deliver(resolve(cmd, job)));
        let task = match &self.pool {
            Some(pool) => match pool.submit(task) {
                Ok(()) => return,
                Err(task) => task,
            },
            None => task,
        };

        let slot = Arc::new(Mutex::new(Some(task)));
        let spawned = {
            let slot = Arc::clone(&slot);
            thread::Builder::new()
                .name(self.config.thread_name.clone())
                .spawn(move || {
                    let task = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                    if let Some(task) = task {
                        task();
                    }
                })
        };
        if let Err(err) = spawned {
            // The closure never ran, so the task is still in the slot.
            tracing::warn!(error = %err, "failed to spawn command thread; resolving inline");
            let task = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(task) = task {
                task();
            }
        }
    }

    /// Execute `cmd`, resolving domain commands with `resolver`.
    ///
    /// Returns the results as a lazy, finite sequence in completion order.
    /// Pre-resolved messages are available immediately; batches run
    /// concurrently with no ordering among their results.
    pub fn execute<M, C, R>(&self, cmd: Cmd<M, C>, mut resolver: R) -> Completions<M, C>
    where
        M: Send + 'static,
        C: Clone + Send + 'static,
        R: FnMut(C) -> Job<M, C>,
    {
        let (tx, rx) = mpsc::channel();
        let FanOut { ready, calls } = FanOut::of(cmd);
        for msg in ready {
            let _ = tx.send(msg);
        }
        for c in calls {
            let job = resolver(c.clone());
            let tx = tx.clone();
            self.spawn(c, job, move |msg| {
                let _ = tx.send(msg);
            });
        }
        Completions { rx }
    }

    /// Stop pool workers after they finish queued jobs.
    pub fn shutdown(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

impl Drop for CommandExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run a job to completion, converting failures into error messages.
pub fn resolve<M, C>(cmd: C, job: Job<M, C>) -> Msg<M, C> {
    match catch_unwind(AssertUnwindSafe(|| job.run())) {
        Ok(Ok(msg)) => msg,
        Ok(Err(error)) => {
            tracing::debug!(%error, "command failed");
            Msg::error(error, cmd)
        }
        Err(payload) => {
            let error = CallError::panicked(payload.as_ref());
            tracing::warn!(%error, "command panicked");
            Msg::error(error, cmd)
        }
    }
}

/// Results of an executed command, in completion order.
///
/// Ends once every spawned job has delivered. Not restartable.
#[derive(Debug)]
pub struct Completions<M, C> {
    rx: mpsc::Receiver<Msg<M, C>>,
}

impl<M, C> Iterator for Completions<M, C> {
    type Item = Msg<M, C>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}
