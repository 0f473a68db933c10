#![forbid(unsafe_code)]

//! The reduction loop shared by [`Program`](crate::Program) and
//! [`ProgramSimulator`](crate::ProgramSimulator).
//!
//! `Runtime` owns the component, the current state, the message queue and
//! the subscriptions. It is driven from a single execution context (the
//! output context); command work is handed to a [`Dispatch`] implementation
//! which decides where jobs run and how their results come back.
//!
//! Per queue head the loop does, in order: reduce, record history, replace
//! state, free the head slot and release the lock, render, refresh
//! subscriptions, dispatch the command, then advance to the next head.

use crate::executor::FanOut;
use crate::message::{Screen, ScreenState};
use crate::program::{Component, JobOf, MsgOf, StaleResultPolicy, TravellerOf};
use crate::queue::MessageQueue;
use crate::subscription::{Subscriptions, Tagged};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug_span;

/// Everything that can arrive at the output context.
pub(crate) enum Inbound<C: Component> {
    /// External message via `accept`.
    Accept(MsgOf<C>),
    /// Result of a dispatched command.
    Completed(MsgOf<C>),
    /// Message from a subscription stream.
    Subscription(Tagged<C::Message, C::Command>),
    /// Re-render the current state.
    Render,
    /// Replay a recorded state.
    Travel(Screen, Arc<C::State>),
    /// Release subscriptions.
    Destroy,
    /// Stop the output loop.
    Shutdown,
}

impl<C: Component> Inbound<C> {
    /// Envelopes counted in the pending-inbox tally by their senders.
    pub(crate) fn is_counted(&self) -> bool {
        matches!(
            self,
            Self::Accept(_) | Self::Render | Self::Travel(..) | Self::Destroy
        )
    }
}

/// Where command jobs go.
pub(crate) trait Dispatch<C: Component> {
    fn dispatch(&mut self, cmd: C::Command, job: JobOf<C>);
}

/// Shared, read-only view of the current state.
pub(crate) struct StateCell<S>(Arc<RwLock<Arc<S>>>);

impl<S> Clone for StateCell<S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<S> StateCell<S> {
    pub(crate) fn new(state: Arc<S>) -> Self {
        Self(Arc::new(RwLock::new(state)))
    }

    pub(crate) fn get(&self) -> Arc<S> {
        Arc::clone(&self.0.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn set(&self, state: Arc<S>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Counters describing what the loop has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramStats {
    /// Completed reductions.
    pub reductions: u64,
    /// Render invocations (including explicit `render()` calls and replays).
    pub renders: u64,
    /// Messages dropped (replay mode, destroyed program).
    pub dropped: u64,
    /// `Idle` command results discarded before the queue.
    pub idle_discarded: u64,
    /// Subscription messages discarded because their stream was superseded.
    pub stale_subscription_messages: u64,
    /// Commands dispatched whose result has not come back yet.
    pub commands_in_flight: usize,
    /// Messages queued, counting the one being reduced.
    pub queued: usize,
    /// Running subscription streams.
    pub active_subscriptions: usize,
}

pub(crate) struct Runtime<C: Component> {
    component: C,
    state: Arc<C::State>,
    cell: StateCell<C::State>,
    queue: MessageQueue<MsgOf<C>>,
    subs: Subscriptions<C::Message, C::Command>,
    traveller: Option<TravellerOf<C>>,
    record_history: bool,
    stale_results: StaleResultPolicy,
    destroyed: bool,
    stats: ProgramStats,
}

impl<C: Component> Runtime<C> {
    pub(crate) fn new(
        component: C,
        initial: Arc<C::State>,
        subs: Subscriptions<C::Message, C::Command>,
        traveller: Option<TravellerOf<C>>,
        record_history: bool,
        stale_results: StaleResultPolicy,
    ) -> Self {
        Self {
            component,
            cell: StateCell::new(Arc::clone(&initial)),
            state: initial,
            queue: MessageQueue::new(),
            subs,
            traveller,
            record_history,
            stale_results,
            destroyed: false,
            stats: ProgramStats::default(),
        }
    }

    /// Bind the initial state: declare its subscriptions.
    pub(crate) fn start(&mut self) {
        tracing::debug!(screen = %self.state.screen(), "program started");
        let state = Arc::clone(&self.state);
        self.component.sub(&state, &mut self.subs);
    }

    pub(crate) fn state(&self) -> Arc<C::State> {
        Arc::clone(&self.state)
    }

    pub(crate) fn state_cell(&self) -> StateCell<C::State> {
        self.cell.clone()
    }

    pub(crate) fn component(&self) -> &C {
        &self.component
    }

    pub(crate) fn stats(&self) -> ProgramStats {
        ProgramStats {
            commands_in_flight: self.stats.commands_in_flight,
            queued: self.queue.len(),
            active_subscriptions: self.subs.active_count(),
            ..self.stats
        }
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.queue.is_locked()
    }

    /// Whether replay mode is on.
    ///
    /// The replay check belongs to the moment a message is accepted; a message
    /// accepted before `enter_adventure` is queued even if it reaches the
    /// output context afterwards.
    pub(crate) fn is_replaying(&self) -> bool {
        self.traveller
            .as_ref()
            .is_some_and(|tt| tt.is_adventure_mode())
    }

    /// Count a message refused because replay mode was on when it was accepted.
    pub(crate) fn refuse(&mut self, msg: &MsgOf<C>) {
        tracing::trace!(msg = %msg.kind(), "message dropped in adventure mode");
        self.stats.dropped += 1;
    }

    fn intake_closed(&self) -> bool {
        self.destroyed && self.stale_results == StaleResultPolicy::DropAfterDestroy
    }

    /// Enqueue an accepted message and advance if the loop is free.
    ///
    /// `Idle` is discarded wherever it comes from. Replay mode does not drop
    /// anything here; during replay the message waits in the queue.
    pub(crate) fn accept(&mut self, msg: MsgOf<C>, exec: &mut dyn Dispatch<C>) {
        if msg.is_idle() {
            self.stats.idle_discarded += 1;
            return;
        }
        if self.intake_closed() {
            tracing::trace!(msg = %msg.kind(), "message dropped after destroy");
            self.stats.dropped += 1;
            return;
        }
        crate::debug_trace!("add msg: {} queue size: {}", msg.kind(), self.queue.len() + 1);
        if self.queue.push(msg) {
            self.advance(exec);
        }
    }

    /// Feed a command result back into the queue.
    ///
    /// `Idle` is discarded. Results arriving during replay are queued but not
    /// reduced until intake resumes.
    pub(crate) fn complete(&mut self, msg: MsgOf<C>, exec: &mut dyn Dispatch<C>) {
        self.stats.commands_in_flight = self.stats.commands_in_flight.saturating_sub(1);
        if msg.is_idle() {
            self.stats.idle_discarded += 1;
            return;
        }
        if self.intake_closed() {
            tracing::debug!(msg = %msg.kind(), "late command result dropped after destroy");
            self.stats.dropped += 1;
            return;
        }
        if self.queue.push(msg) {
            self.advance(exec);
        }
    }

    /// Route a subscription message, discarding superseded streams.
    pub(crate) fn on_subscription(
        &mut self,
        tagged: Tagged<C::Message, C::Command>,
        exec: &mut dyn Dispatch<C>,
    ) {
        if !self.subs.is_current(&tagged.id, tagged.generation) {
            tracing::trace!(sub_id = %tagged.id, generation = tagged.generation, "stale subscription message");
            self.stats.stale_subscription_messages += 1;
            return;
        }
        self.accept(tagged.msg, exec);
    }

    /// Re-render the current state without touching queue or state.
    pub(crate) fn render(&mut self) {
        let state = Arc::clone(&self.state);
        self.component.render(&state);
        self.stats.renders += 1;
    }

    /// Hand a recorded state to the component's time-travel capability.
    pub(crate) fn travel(&mut self, screen: &Screen, state: &C::State) {
        if let Some(capability) = self.component.time_travel() {
            capability.travel(screen, state);
        }
    }

    /// Release every subscription stream. Idempotent.
    pub(crate) fn destroy(&mut self) {
        if !self.destroyed {
            tracing::debug!(screen = %self.state.screen(), "program destroyed");
        }
        self.destroyed = true;
        self.subs.stop_all();
    }

    /// Process queue heads until the queue is empty, locked or suspended.
    pub(crate) fn advance(&mut self, exec: &mut dyn Dispatch<C>) {
        loop {
            if self.is_replaying() {
                crate::debug_trace!("advance suspended: adventure mode");
                return;
            }
            let Some(msg) = self.queue.begin() else {
                return;
            };
            self.reduce(msg, exec);
        }
    }

    fn reduce(&mut self, msg: MsgOf<C>, exec: &mut dyn Dispatch<C>) {
        let kind = msg.kind();
        let _span = debug_span!(
            "rein.program.update",
            msg = %kind,
            cmd_type = tracing::field::Empty
        )
        .entered();

        let recorded = match &self.traveller {
            Some(_) if self.record_history => Some(msg.clone()),
            _ => None,
        };
        let (next, cmd) = self.component.update(msg, &self.state);
        tracing::Span::current().record("cmd_type", cmd.type_name());

        let next = Arc::new(next);
        if let (Some(tt), Some(msg)) = (&self.traveller, recorded) {
            tt.record(msg, &next);
        }
        self.state = Arc::clone(&next);
        self.cell.set(Arc::clone(&next));
        self.queue.finish();
        self.stats.reductions += 1;
        crate::debug_trace!("reduced: {} queue size: {}", kind, self.queue.len());

        self.component.render(&next);
        self.stats.renders += 1;
        if !self.destroyed {
            self.refresh_subscriptions(&next);
        }

        if !cmd.is_none() {
            self.execute(FanOut::of(cmd), exec);
        }
    }

    fn refresh_subscriptions(&mut self, state: &C::State) {
        let _span = debug_span!(
            "rein.program.subscriptions",
            active_count = tracing::field::Empty
        )
        .entered();
        self.component.sub(state, &mut self.subs);
        tracing::Span::current().record("active_count", self.subs.active_count());
    }

    /// Queue pre-resolved messages and hand domain commands to `exec`.
    ///
    /// Pooled or threaded execution goes through [`CommandExecutor::spawn`](crate::CommandExecutor::spawn);
    /// the simulator resolves inline.
    fn execute(&mut self, fan_out: FanOut<C::Message, C::Command>, exec: &mut dyn Dispatch<C>) {
        for msg in fan_out.ready {
            if msg.is_idle() {
                self.stats.idle_discarded += 1;
            } else {
                // The enclosing advance loop reduces it next.
                let _ = self.queue.push(msg);
            }
        }
        for cmd in fan_out.calls {
            tracing::debug!(cmd = ?cmd, "dispatching command");
            let job = self.component.call(cmd.clone());
            self.stats.commands_in_flight += 1;
            exec.dispatch(cmd, job);
        }
    }
}

impl<C: Component> Drop for Runtime<C> {
    fn drop(&mut self) {
        self.subs.stop_all();
    }
}
