#![forbid(unsafe_code)]

//! Elm-style runtime with a dedicated output thread.
//!
//! A [`Program`] binds a [`Component`] (reducer, renderer, command resolver,
//! subscription declarations) to an initial state. All reductions happen on
//! one output thread, one at a time, in queue order. Commands run on the
//! work context and post their results back to the output thread.
//!
//! # Example
//!
//! ```ignore
//! use rein_runtime::{Cmd, Component, Job, Msg, Program, ProgramConfig, Screen, ScreenState};
//!
//! #[derive(Debug, Clone)]
//! struct Counter { screen: Screen, count: i32 }
//!
//! impl ScreenState for Counter {
//!     fn screen(&self) -> &Screen { &self.screen }
//! }
//!
//! #[derive(Debug, Clone)]
//! enum Ev { Increment }
//!
//! struct CounterView;
//!
//! impl Component for CounterView {
//!     type State = Counter;
//!     type Message = Ev;
//!     type Command = ();
//!
//!     fn update(&self, msg: Msg<Ev, ()>, state: &Counter) -> (Counter, Cmd<Ev, ()>) {
//!         match msg {
//!             Msg::App(Ev::Increment) => (Counter { count: state.count + 1, ..state.clone() }, Cmd::none()),
//!             _ => (state.clone(), Cmd::none()),
//!         }
//!     }
//!
//!     fn render(&mut self, state: &Counter) {
//!         println!("count = {}", state.count);
//!     }
//!
//!     fn call(&mut self, _cmd: ()) -> Job<Ev, ()> {
//!         Job::idle()
//!     }
//! }
//!
//! let mut program = Program::new(ProgramConfig::default());
//! let _disposable = program.init(Counter { screen: Screen::new("counter"), count: 0 }, CounterView)?;
//! program.accept(Msg::App(Ev::Increment));
//! ```

use crate::cmd::{Cmd, Job};
use crate::error::{RuntimeError, RuntimeResult};
use crate::executor::{CommandExecutor, ExecutorConfig};
use crate::history::{TimeTravel, TimeTraveller};
use crate::message::{Msg, ScreenState};
use crate::runtime::{Dispatch, Inbound, ProgramStats, Runtime, StateCell};
use crate::subscription::Subscriptions;
use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn};

/// The Component trait defines a screen's behavior.
///
/// Implementations are moved onto the output thread by [`Program::init`];
/// every method runs there.
pub trait Component: Send + 'static {
    /// Immutable state value; replaced after every reduction.
    type State: ScreenState + fmt::Debug + Send + Sync + 'static;
    /// Domain message payload.
    type Message: Clone + fmt::Debug + Send + 'static;
    /// Domain command payload.
    type Command: Clone + fmt::Debug + Send + 'static;

    /// Compute the next state and command. Must not perform I/O.
    fn update(
        &self,
        msg: Msg<Self::Message, Self::Command>,
        state: &Self::State,
    ) -> (Self::State, Cmd<Self::Message, Self::Command>);

    /// Project the state onto a visible surface. May be called repeatedly
    /// with the same state.
    fn render(&mut self, state: &Self::State);

    /// Resolve a domain command into deferred work.
    fn call(&mut self, cmd: Self::Command) -> Job<Self::Message, Self::Command>;

    /// Declare which subscriptions should be active for `state`.
    ///
    /// Called once at startup and after every reduction.
    fn sub(
        &mut self,
        state: &Self::State,
        subs: &mut Subscriptions<Self::Message, Self::Command>,
    ) {
        let _ = (state, subs);
    }

    /// Time-travel capability, if the component has one.
    ///
    /// Checked once when the component is bound.
    fn time_travel(&mut self) -> Option<&mut dyn TimeTravel<Self::State>> {
        None
    }
}

/// Message type of a component.
pub type MsgOf<C> = Msg<<C as Component>::Message, <C as Component>::Command>;
/// Command type of a component.
pub type CmdOf<C> = Cmd<<C as Component>::Message, <C as Component>::Command>;
/// Job type of a component.
pub type JobOf<C> = Job<<C as Component>::Message, <C as Component>::Command>;
/// Subscription manager type of a component.
pub type SubscriptionsOf<C> =
    Subscriptions<<C as Component>::Message, <C as Component>::Command>;
/// History recorder type of a component.
pub type TravellerOf<C> = TimeTraveller<
    <C as Component>::Message,
    <C as Component>::Command,
    <C as Component>::State,
>;

/// What happens to messages and command results after `destroy()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleResultPolicy {
    /// Drop late command results and further accepted messages.
    #[default]
    DropAfterDestroy,
    /// Keep delivering them to the reducer.
    Deliver,
}

/// Program configuration.
#[derive(Debug, Clone)]
pub struct ProgramConfig {
    /// Work context for commands.
    pub executor: ExecutorConfig,
    /// Name of the output thread.
    pub thread_name: String,
    /// Record history when a time traveller is attached.
    pub record_history: bool,
    /// Policy for messages arriving after `destroy()`.
    pub stale_results: StaleResultPolicy,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            thread_name: "rein-output".into(),
            record_history: true,
            stale_results: StaleResultPolicy::default(),
        }
    }
}

impl ProgramConfig {
    /// Defaults, with `REIN_WORKER_THREADS=N` selecting an N-worker pool.
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var("REIN_WORKER_THREADS")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            Some(workers) if workers > 0 => {
                let executor = config.executor.clone().with_pool(workers);
                config.with_executor(executor)
            }
            _ => config,
        }
    }

    /// Set the executor configuration.
    #[must_use]
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Set the output thread name.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Enable or disable history recording.
    #[must_use]
    pub fn with_history(mut self, enabled: bool) -> Self {
        self.record_history = enabled;
        self
    }

    /// Set the post-destroy policy.
    #[must_use]
    pub fn with_stale_results(mut self, policy: StaleResultPolicy) -> Self {
        self.stale_results = policy;
        self
    }
}

#[derive(Debug, Default)]
struct ActivityState {
    inbox: usize,
    handle_dropped: u64,
    stats: ProgramStats,
    closed: bool,
}

impl ActivityState {
    fn is_idle(&self) -> bool {
        self.closed
            || (self.inbox == 0 && self.stats.queued == 0 && self.stats.commands_in_flight == 0)
    }
}

/// Progress shared between the output thread and handles.
#[derive(Debug, Default)]
struct Activity {
    state: Mutex<ActivityState>,
    changed: Condvar,
}

impl Activity {
    fn lock(&self) -> MutexGuard<'_, ActivityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_inbound(&self) {
        self.lock().inbox += 1;
    }

    fn cancel_inbound(&self) {
        let mut state = self.lock();
        state.inbox = state.inbox.saturating_sub(1);
        self.changed.notify_all();
    }

    fn note_dropped(&self) {
        self.lock().handle_dropped += 1;
    }

    fn publish(&self, stats: ProgramStats, consumed: bool) {
        let mut state = self.lock();
        if consumed {
            state.inbox = state.inbox.saturating_sub(1);
        }
        state.stats = stats;
        self.changed.notify_all();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    fn stats(&self) -> ProgramStats {
        let state = self.lock();
        ProgramStats {
            dropped: state.stats.dropped + state.handle_dropped,
            ..state.stats
        }
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        true
    }
}

/// Cloneable, thread-safe handle to a running program.
pub struct ProgramHandle<C: Component> {
    inbox: mpsc::Sender<Inbound<C>>,
    state: StateCell<C::State>,
    activity: Arc<Activity>,
    traveller: Option<TravellerOf<C>>,
}

impl<C: Component> Clone for ProgramHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inbox: self.inbox.clone(),
            state: self.state.clone(),
            activity: Arc::clone(&self.activity),
            traveller: self.traveller.clone(),
        }
    }
}

impl<C: Component> fmt::Debug for ProgramHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramHandle")
            .field("stats", &self.activity.stats())
            .finish_non_exhaustive()
    }
}

impl<C: Component> ProgramHandle<C> {
    fn send(&self, envelope: Inbound<C>) -> RuntimeResult<()> {
        let counted = envelope.is_counted();
        if counted {
            self.activity.begin_inbound();
        }
        if self.inbox.send(envelope).is_err() {
            if counted {
                self.activity.cancel_inbound();
            }
            return Err(RuntimeError::Disconnected);
        }
        Ok(())
    }

    fn send_or_warn(&self, envelope: Inbound<C>) {
        if let Err(err) = self.send(envelope) {
            warn!(%err, "request ignored");
        }
    }

    /// Enqueue a message, reporting whether the loop is still running.
    ///
    /// A message dropped because replay mode is active is not an error.
    pub fn try_accept(&self, msg: MsgOf<C>) -> RuntimeResult<()> {
        if self
            .traveller
            .as_ref()
            .is_some_and(|tt| tt.is_adventure_mode())
        {
            tracing::trace!(msg = %msg.kind(), "message dropped in adventure mode");
            self.activity.note_dropped();
            return Ok(());
        }
        self.send(Inbound::Accept(msg))
    }

    /// Enqueue a message. Dropped silently while replay mode is active.
    pub fn accept(&self, msg: MsgOf<C>) {
        if let Err(err) = self.try_accept(msg) {
            warn!(%err, "message dropped");
        }
    }

    /// Enqueue a domain message.
    pub fn accept_app(&self, msg: C::Message) {
        self.accept(Msg::App(msg));
    }

    /// Re-render the current state.
    pub fn render(&self) {
        self.send_or_warn(Inbound::Render);
    }

    /// Release every subscription stream. Idempotent.
    pub fn destroy(&self) {
        self.send_or_warn(Inbound::Destroy);
    }

    /// Current state snapshot.
    pub fn get_state(&self) -> Arc<C::State> {
        self.state.get()
    }

    /// Loop counters as of the last processed envelope.
    pub fn stats(&self) -> ProgramStats {
        self.activity.stats()
    }

    /// Block until nothing is pending: inbox, queue and in-flight commands.
    ///
    /// Returns `false` on timeout. Subscription streams are not waited for.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.activity.wait_idle(timeout)
    }
}

/// Releases a program's processing pipeline.
///
/// Disposing stops the output thread after its subscriptions are released
/// and joins it. Idempotent; also runs on drop.
pub struct Disposable {
    shutdown: Option<Box<dyn FnOnce() + Send>>,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Disposable {
    /// Tear the pipeline down. Errors during release are swallowed.
    pub fn dispose(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown();
        }
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("output thread ended with a panic");
            }
        }
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_none() && self.thread.is_none()
    }
}

impl Drop for Disposable {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct WorkDispatch<C: Component> {
    executor: CommandExecutor,
    inbox: mpsc::Sender<Inbound<C>>,
}

impl<C: Component> Dispatch<C> for WorkDispatch<C> {
    fn dispatch(&mut self, cmd: C::Command, job: JobOf<C>) {
        let inbox = self.inbox.clone();
        self.executor.spawn(cmd, job, move |msg| {
            if inbox.send(Inbound::Completed(msg)).is_err() {
                debug!("command finished after the program stopped");
            }
        });
    }
}

/// Elm-style program: one state machine, one reducer, serialized reductions.
pub struct Program<C: Component> {
    config: ProgramConfig,
    traveller: Option<TravellerOf<C>>,
    handle: Option<ProgramHandle<C>>,
}

impl<C: Component> fmt::Debug for Program<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("config", &self.config)
            .field("initialized", &self.handle.is_some())
            .finish()
    }
}

impl<C: Component> Program<C> {
    /// Create an unbound program.
    pub fn new(config: ProgramConfig) -> Self {
        Self {
            config,
            traveller: None,
            handle: None,
        }
    }

    /// Create an unbound program recording into `traveller`.
    pub fn with_time_traveller(config: ProgramConfig, traveller: TravellerOf<C>) -> Self {
        Self {
            config,
            traveller: Some(traveller),
            handle: None,
        }
    }

    /// The attached history recorder, if any.
    pub fn time_traveller(&self) -> Option<&TravellerOf<C>> {
        self.traveller.as_ref()
    }

    /// Bind `component` and `initial` and start the output thread.
    ///
    /// Must be called exactly once, before any message is accepted.
    pub fn init(&mut self, initial: C::State, component: C) -> RuntimeResult<Disposable> {
        if self.handle.is_some() {
            return Err(RuntimeError::AlreadyInitialized);
        }
        let _span = info_span!("rein.program.init", screen = %initial.screen()).entered();

        let (tx, rx) = mpsc::channel::<Inbound<C>>();
        let activity = Arc::new(Activity::default());
        let executor = CommandExecutor::new(self.config.executor.clone())
            .map_err(RuntimeError::Spawn)?;

        // Stream messages are accepted when emitted, so replay mode is checked here.
        let sub_tx = tx.clone();
        let sub_traveller = self.traveller.clone();
        let sub_activity = Arc::clone(&activity);
        let subs = Subscriptions::new(move |tagged| {
            if sub_traveller.as_ref().is_some_and(|tt| tt.is_adventure_mode()) {
                sub_activity.note_dropped();
                return true;
            }
            sub_tx.send(Inbound::Subscription(tagged)).is_ok()
        });

        let mut component = component;
        let travel_capable = component.time_travel().is_some();
        let runtime = Runtime::new(
            component,
            Arc::new(initial),
            subs,
            self.traveller.clone(),
            self.config.record_history,
            self.config.stale_results,
        );
        let state = runtime.state_cell();

        let dispatch = WorkDispatch {
            executor,
            inbox: tx.clone(),
        };
        let loop_activity = Arc::clone(&activity);
        let thread = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || output_loop(runtime, &rx, dispatch, &loop_activity))
            .map_err(RuntimeError::Spawn)?;

        if travel_capable {
            if let Some(tt) = &self.traveller {
                let travel_tx = tx.clone();
                let travel_activity = Arc::clone(&activity);
                tt.register(Box::new(move |screen, state| {
                    travel_activity.begin_inbound();
                    let sent = travel_tx
                        .send(Inbound::Travel(screen.clone(), Arc::clone(state)))
                        .is_ok();
                    if !sent {
                        travel_activity.cancel_inbound();
                    }
                    sent
                }));
            }
        }

        let shutdown_tx = tx.clone();
        let disposable = Disposable {
            shutdown: Some(Box::new(move || {
                let _ = shutdown_tx.send(Inbound::Shutdown);
            })),
            thread: Some(thread),
        };

        self.handle = Some(ProgramHandle {
            inbox: tx,
            state,
            activity,
            traveller: self.traveller.clone(),
        });
        Ok(disposable)
    }

    /// Handle usable from other threads. `None` before `init`.
    pub fn handle(&self) -> Option<ProgramHandle<C>> {
        self.handle.clone()
    }

    fn bound(&self) -> RuntimeResult<&ProgramHandle<C>> {
        self.handle.as_ref().ok_or(RuntimeError::NotInitialized)
    }

    /// Enqueue a message. Dropped silently while replay mode is active or
    /// before `init`.
    pub fn accept(&self, msg: MsgOf<C>) {
        match self.bound() {
            Ok(handle) => handle.accept(msg),
            Err(err) => warn!(%err, msg = %msg.kind(), "message dropped"),
        }
    }

    /// Enqueue a domain message.
    pub fn accept_app(&self, msg: C::Message) {
        self.accept(Msg::App(msg));
    }

    /// Re-render the current state.
    pub fn render(&self) {
        if let Ok(handle) = self.bound() {
            handle.render();
        }
    }

    /// Release every subscription stream. Idempotent.
    pub fn destroy(&self) {
        if let Ok(handle) = self.bound() {
            handle.destroy();
        }
    }

    /// Current state snapshot.
    pub fn get_state(&self) -> RuntimeResult<Arc<C::State>> {
        self.bound().map(ProgramHandle::get_state)
    }

    /// Loop counters.
    pub fn stats(&self) -> ProgramStats {
        self.bound().map(ProgramHandle::stats).unwrap_or_default()
    }

    /// Block until inbox, queue and in-flight commands are drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.bound().is_ok_and(|handle| handle.wait_idle(timeout))
    }
}

fn output_loop<C: Component>(
    mut runtime: Runtime<C>,
    inbox: &mpsc::Receiver<Inbound<C>>,
    mut dispatch: WorkDispatch<C>,
    activity: &Activity,
) {
    runtime.start();
    activity.publish(runtime.stats(), false);

    while let Ok(envelope) = inbox.recv() {
        let consumed = envelope.is_counted();
        match envelope {
            Inbound::Shutdown => break,
            Inbound::Accept(msg) => runtime.accept(msg, &mut dispatch),
            Inbound::Completed(msg) => runtime.complete(msg, &mut dispatch),
            Inbound::Subscription(tagged) => runtime.on_subscription(tagged, &mut dispatch),
            Inbound::Render => runtime.render(),
            Inbound::Travel(screen, state) => runtime.travel(&screen, &state),
            Inbound::Destroy => runtime.destroy(),
        }
        activity.publish(runtime.stats(), consumed);
    }

    runtime.destroy();
    dispatch.executor.shutdown();
    activity.publish(runtime.stats(), false);
    activity.close();
    debug!("output loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Screen;

    #[derive(Debug, Clone)]
    struct Tally {
        screen: Screen,
        total: i64,
    }

    impl ScreenState for Tally {
        fn screen(&self) -> &Screen {
            &self.screen
        }
    }

    #[derive(Debug, Clone)]
    enum Ev {
        Add(i64),
    }

    struct Adder {
        renders: Arc<Mutex<Vec<i64>>>,
    }

    impl Component for Adder {
        type State = Tally;
        type Message = Ev;
        type Command = ();

        fn update(&self, msg: Msg<Ev, ()>, state: &Tally) -> (Tally, Cmd<Ev, ()>) {
            match msg {
                Msg::App(Ev::Add(n)) => (
                    Tally {
                        total: state.total + n,
                        ..state.clone()
                    },
                    Cmd::none(),
                ),
                _ => (state.clone(), Cmd::none()),
            }
        }

        fn render(&mut self, state: &Tally) {
            self.renders.lock().unwrap().push(state.total);
        }

        fn call(&mut self, _cmd: ()) -> Job<Ev, ()> {
            Job::idle()
        }
    }

    fn tally() -> Tally {
        Tally {
            screen: Screen::new("tally"),
            total: 0,
        }
    }

    #[test]
    fn init_twice_is_rejected() {
        let renders = Arc::new(Mutex::new(Vec::new()));
        let mut program = Program::new(ProgramConfig::default());
        let _d = program
            .init(tally(), Adder { renders: Arc::clone(&renders) })
            .unwrap();
        let second = program.init(tally(), Adder { renders });
        assert!(matches!(second, Err(RuntimeError::AlreadyInitialized)));
    }

    #[test]
    fn uninitialized_program_reports_not_initialized() {
        let program: Program<Adder> = Program::new(ProgramConfig::default());
        assert!(matches!(program.get_state(), Err(RuntimeError::NotInitialized)));
        program.accept_app(Ev::Add(1));
        assert!(!program.wait_idle(Duration::from_millis(1)));
    }

    #[test]
    fn accepted_messages_reduce_and_render() {
        let renders = Arc::new(Mutex::new(Vec::new()));
        let mut program = Program::new(ProgramConfig::default());
        let _d = program
            .init(tally(), Adder { renders: Arc::clone(&renders) })
            .unwrap();
        for n in 1..=3 {
            program.accept_app(Ev::Add(n));
        }
        assert!(program.wait_idle(Duration::from_secs(2)));
        assert_eq!(program.get_state().unwrap().total, 6);
        assert_eq!(*renders.lock().unwrap(), vec![1, 3, 6]);
        assert_eq!(program.stats().reductions, 3);
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut program = Program::new(ProgramConfig::default());
        let mut disposable = program
            .init(tally(), Adder { renders: Arc::default() })
            .unwrap();
        disposable.dispose();
        assert!(disposable.is_disposed());
        disposable.dispose();
        // Messages after disposal go nowhere but do not panic.
        program.accept_app(Ev::Add(1));
        let handle = program.handle().unwrap();
        assert!(matches!(
            handle.try_accept(Msg::App(Ev::Add(1))),
            Err(RuntimeError::Disconnected)
        ));
        assert!(program.wait_idle(Duration::from_millis(100)));
    }

    #[test]
    fn config_builders() {
        let config = ProgramConfig::default()
            .with_thread_name("custom")
            .with_history(false)
            .with_stale_results(StaleResultPolicy::Deliver)
            .with_executor(ExecutorConfig::default().with_pool(2));
        assert_eq!(config.thread_name, "custom");
        assert!(!config.record_history);
        assert_eq!(config.stale_results, StaleResultPolicy::Deliver);
        assert_eq!(config.executor.pool_size, Some(2));
    }
}
