#![forbid(unsafe_code)]

//! Subscription system for long-lived message sources.
//!
//! A subscription is declared through a [`SubscriptionSource`] (the
//! descriptor) which materializes a [`Subscription`] stream for a given
//! parameter value. The runtime runs each stream on its own thread and routes
//! everything it emits back through the message queue.
//!
//! # How it works
//!
//! 1. After every reduction the runtime calls `Component::sub(state, subs)`.
//! 2. The component calls [`Subscriptions::add`] for each descriptor it wants
//!    active, with parameters derived from the state.
//! 3. The descriptor reports whether a new stream was created. If so, the
//!    previous stream registered under the same [`SubId`] is stopped and the
//!    new one started; otherwise nothing happens.
//! 4. Every running stream is tagged with a generation. Messages from a
//!    superseded generation are discarded by the loop, so an old stream can
//!    never feed the queue once its replacement is registered.

use crate::message::Msg;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Stable identity of a subscription descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubId(Cow<'static, str>);

impl SubId {
    /// Identity from a static name.
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Identity from a runtime-built name.
    pub fn owned(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A running stream of messages.
///
/// `run` is called on a dedicated thread. Implementations should loop and
/// emit until [`Emitter::emit`] returns `false` or the stop signal fires.
pub trait Subscription<M, C>: Send {
    /// Produce messages until stopped.
    fn run(&self, emitter: Emitter<M, C>, stop: StopSignal);
}

/// Result of asking a descriptor for a stream.
pub enum Materialized<M, C> {
    /// Parameters changed (or first call): a fresh stream.
    New(Box<dyn Subscription<M, C>>),
    /// The previously materialized stream is still valid.
    Unchanged,
}

impl<M, C> Materialized<M, C> {
    /// Whether materialization produced a new stream.
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }
}

impl<M, C> fmt::Debug for Materialized<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New(_) => write!(f, "New(<stream>)"),
            Self::Unchanged => write!(f, "Unchanged"),
        }
    }
}

/// Descriptor that knows how to build a stream for a parameter value.
pub trait SubscriptionSource<M, C> {
    /// Parameters derived from state.
    type Params;

    /// Stable identity used to key the running stream.
    fn id(&self) -> SubId;

    /// Materialize (or reuse) a stream for `params`.
    fn materialize(&mut self, params: Self::Params) -> Materialized<M, C>;

    /// Forget any cached parameters; called when the subscription is removed.
    fn reset(&mut self) {}
}

/// Descriptor that re-materializes only when its parameters change.
pub struct Memoized<P, F> {
    id: SubId,
    last: Option<P>,
    factory: F,
}

impl<P, F> Memoized<P, F> {
    /// Descriptor with identity `id`, building streams with `factory`.
    pub fn new(id: SubId, factory: F) -> Self {
        Self {
            id,
            last: None,
            factory,
        }
    }

    /// Parameters of the currently materialized stream.
    pub fn params(&self) -> Option<&P> {
        self.last.as_ref()
    }
}

impl<M, C, P, F> SubscriptionSource<M, C> for Memoized<P, F>
where
    P: PartialEq,
    F: FnMut(&P) -> Box<dyn Subscription<M, C>>,
{
    type Params = P;

    fn id(&self) -> SubId {
        self.id.clone()
    }

    fn materialize(&mut self, params: P) -> Materialized<M, C> {
        if self.last.as_ref() == Some(&params) {
            return Materialized::Unchanged;
        }
        let stream = (self.factory)(&params);
        self.last = Some(params);
        Materialized::New(stream)
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

/// Signal for stopping a subscription.
///
/// The runtime sets it when the stream is replaced, removed or torn down.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    /// Create a new stop signal pair (signal, trigger).
    pub fn new() -> (Self, StopTrigger) {
        let inner = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Self {
            inner: Arc::clone(&inner),
        };
        (signal, StopTrigger { inner })
    }

    /// Check if the stop signal has been triggered.
    pub fn is_stopped(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for either the stop signal or a timeout.
    ///
    /// Returns `true` if stopped, `false` if timed out.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = Instant::now() + duration;
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = cvar
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            stopped = guard;
        }
        true
    }
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Trigger to stop a subscription from the runtime side.
pub struct StopTrigger {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopTrigger {
    /// Signal the subscription to stop.
    pub fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        cvar.notify_all();
    }
}

/// A message emitted by a subscription, tagged with its origin.
#[derive(Debug)]
pub(crate) struct Tagged<M, C> {
    pub(crate) id: SubId,
    pub(crate) generation: u64,
    pub(crate) msg: Msg<M, C>,
}

type Sink<M, C> = Arc<dyn Fn(Tagged<M, C>) -> bool + Send + Sync>;

/// Handle a running stream uses to emit messages.
pub struct Emitter<M, C> {
    id: SubId,
    generation: u64,
    stop: StopSignal,
    sink: Sink<M, C>,
}

impl<M, C> Clone for Emitter<M, C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            generation: self.generation,
            stop: self.stop.clone(),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<M, C> Emitter<M, C> {
    /// Emit a message.
    ///
    /// Returns `false` once the stream has been stopped or the runtime is
    /// gone; the stream should then exit.
    pub fn emit(&self, msg: Msg<M, C>) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        (self.sink)(Tagged {
            id: self.id.clone(),
            generation: self.generation,
            msg,
        })
    }

    /// Emit a domain message.
    pub fn emit_app(&self, msg: M) -> bool {
        self.emit(Msg::App(msg))
    }

    /// Identity of the subscription this emitter belongs to.
    pub fn id(&self) -> &SubId {
        &self.id
    }
}

impl<M: Send + 'static, C: Send + 'static> Emitter<M, C> {
    /// Emitter detached from any runtime, delivering into a plain channel.
    ///
    /// Useful for exercising a [`Subscription`] in isolation.
    pub fn channel(id: SubId, stop: StopSignal) -> (Self, mpsc::Receiver<Msg<M, C>>) {
        let (tx, rx) = mpsc::channel();
        let sink: Sink<M, C> = Arc::new(move |tagged: Tagged<M, C>| tx.send(tagged.msg).is_ok());
        (
            Self {
                id,
                generation: 0,
                stop,
                sink,
            },
            rx,
        )
    }
}

impl<M, C> fmt::Debug for Emitter<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// A running subscription handle.
struct RunningSubscription {
    generation: u64,
    trigger: StopTrigger,
    thread: Option<thread::JoinHandle<()>>,
}

impl RunningSubscription {
    /// Stop the subscription and detach its thread.
    ///
    /// Replacement and removal happen inside a reduction, so they never wait
    /// on a stream. The detached thread exits at its next stop check; anything
    /// it emits meanwhile carries a superseded generation and is discarded.
    fn cancel(mut self) {
        self.trigger.stop();
        drop(self.thread.take());
    }

    /// Whether the stream thread is still running.
    fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the subscription and join its thread.
    fn stop(mut self) {
        self.trigger.stop();
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for RunningSubscription {
    fn drop(&mut self) {
        self.trigger.stop();
    }
}

/// Tracks active subscriptions keyed by [`SubId`].
///
/// At most one live stream exists per identity.
pub struct Subscriptions<M, C> {
    active: HashMap<SubId, RunningSubscription>,
    next_generation: u64,
    sink: Sink<M, C>,
}

impl<M, C> fmt::Debug for Subscriptions<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&SubId> = self.active.keys().collect();
        ids.sort();
        f.debug_struct("Subscriptions")
            .field("active", &ids)
            .field("next_generation", &self.next_generation)
            .finish()
    }
}

impl<M, C> Subscriptions<M, C>
where
    M: Send + 'static,
    C: Send + 'static,
{
    pub(crate) fn new(sink: impl Fn(Tagged<M, C>) -> bool + Send + Sync + 'static) -> Self {
        Self {
            active: HashMap::new(),
            next_generation: 1,
            sink: Arc::new(sink),
        }
    }

    /// Ask `source` for a stream with `params` and start it if it is new.
    ///
    /// Returns `true` when a new stream was started. The previous stream under
    /// the same identity is stopped first.
    pub fn add<S>(&mut self, source: &mut S, params: S::Params) -> bool
    where
        S: SubscriptionSource<M, C> + ?Sized,
    {
        let id = source.id();
        let stream = match source.materialize(params) {
            Materialized::New(stream) => stream,
            Materialized::Unchanged => {
                tracing::trace!(sub_id = %id, "subscription unchanged");
                return false;
            }
        };

        if let Some(previous) = self.active.remove(&id) {
            crate::debug_trace!(
                "replacing subscription: id={}, generation={}",
                id,
                previous.generation
            );
            tracing::debug!(sub_id = %id, generation = previous.generation, "Replacing subscription");
            previous.cancel();
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let (signal, trigger) = StopSignal::new();
        let emitter = Emitter {
            id: id.clone(),
            generation,
            stop: signal.clone(),
            sink: Arc::clone(&self.sink),
        };

        let spawned = thread::Builder::new()
            .name(format!("rein-sub-{id}"))
            .spawn(move || stream.run(emitter, signal));
        match spawned {
            Ok(handle) => {
                tracing::debug!(sub_id = %id, generation, "Starting subscription");
                self.active.insert(
                    id,
                    RunningSubscription {
                        generation,
                        trigger,
                        thread: Some(handle),
                    },
                );
                true
            }
            Err(err) => {
                tracing::warn!(sub_id = %id, error = %err, "failed to spawn subscription thread");
                source.reset();
                false
            }
        }
    }

    /// Stop the stream registered for `source`, if any.
    ///
    /// Returns `true` when a running stream was stopped.
    pub fn remove<S>(&mut self, source: &mut S) -> bool
    where
        S: SubscriptionSource<M, C> + ?Sized,
    {
        source.reset();
        self.remove_id(&source.id())
    }

    /// Stop the stream registered under `id`, if any.
    pub fn remove_id(&mut self, id: &SubId) -> bool {
        match self.active.remove(id) {
            Some(running) => {
                tracing::debug!(sub_id = %id, "Stopping subscription");
                running.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a message tagged `(id, generation)` comes from the live stream.
    pub(crate) fn is_current(&self, id: &SubId, generation: u64) -> bool {
        self.active
            .get(id)
            .is_some_and(|running| running.generation == generation)
    }

    /// Whether a stream is registered under `id`.
    pub fn contains(&self, id: &SubId) -> bool {
        self.active.contains_key(id)
    }

    /// Return the number of streams still running.
    ///
    /// A finite stream that has ended stays registered, so messages it emitted
    /// before ending are still delivered, but it no longer counts as active.
    pub fn active_count(&self) -> usize {
        self.active
            .values()
            .filter(|running| running.is_running())
            .count()
    }

    /// Stop all running subscriptions and wait for their threads.
    pub(crate) fn stop_all(&mut self) {
        let count = self.active.len();
        for (_, running) in self.active.drain() {
            running.stop();
        }
        if count > 0 {
            tracing::debug!(stopped = count, "Stopped all subscriptions");
        }
    }
}

impl<M, C> Drop for Subscriptions<M, C> {
    fn drop(&mut self) {
        for (_, running) in self.active.drain() {
            running.trigger.stop();
        }
    }
}

// --- Built-in streams ---

/// A stream that emits at a fixed interval.
pub struct Every<M, C> {
    interval: Duration,
    make_msg: Arc<dyn Fn() -> Msg<M, C> + Send + Sync>,
}

impl<M, C> Every<M, C> {
    /// Tick stream with the given interval and message factory.
    pub fn new(interval: Duration, make_msg: impl Fn() -> Msg<M, C> + Send + Sync + 'static) -> Self {
        Self {
            interval,
            make_msg: Arc::new(make_msg),
        }
    }
}

impl<M, C> Subscription<M, C> for Every<M, C> {
    fn run(&self, emitter: Emitter<M, C>, stop: StopSignal) {
        let mut ticks: u64 = 0;
        loop {
            if stop.wait_timeout(self.interval) {
                break;
            }
            ticks += 1;
            if !emitter.emit((self.make_msg)()) {
                break;
            }
        }
        crate::debug_trace!("Every stopped: id={}, ticks={}", emitter.id(), ticks);
    }
}

/// A stream that emits a fixed list of messages and then ends.
pub struct MockSubscription<M, C> {
    messages: Vec<Msg<M, C>>,
}

impl<M, C> MockSubscription<M, C> {
    /// Stream emitting `messages` in order.
    pub fn new(messages: Vec<Msg<M, C>>) -> Self {
        Self { messages }
    }
}

impl<M, C> Subscription<M, C> for MockSubscription<M, C>
where
    M: Clone + Send,
    C: Clone + Send,
{
    fn run(&self, emitter: Emitter<M, C>, _stop: StopSignal) {
        for msg in &self.messages {
            if !emitter.emit(msg.clone()) {
                break;
            }
        }
    }
}
