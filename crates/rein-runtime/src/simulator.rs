#![forbid(unsafe_code)]

//! Deterministic program simulator for testing.
//!
//! `ProgramSimulator` drives the same reduction loop as [`Program`](crate::Program)
//! on the calling thread. Command jobs are collected instead of spawned and
//! resolved inline, either right away (the default) or step by step with
//! [`with_deferred_commands`](ProgramSimulator::with_deferred_commands).
//! Subscription streams still run on their own threads; their messages are
//! delivered when the test pumps them.
//!
//! # Example
//!
//! ```ignore
//! use rein_runtime::ProgramSimulator;
//!
//! let mut sim = ProgramSimulator::new(initial_state, MyScreen::default());
//! sim.send(MyMsg::Refresh);
//! assert_eq!(sim.state().items.len(), 3);
//! assert_eq!(sim.dispatched(), &[MyCmd::Load]);
//! ```

use crate::executor::resolve;
use crate::message::{Msg, Screen};
use crate::program::{Component, JobOf, MsgOf, StaleResultPolicy, TravellerOf};
use crate::runtime::{Dispatch, ProgramStats, Runtime};
use crate::subscription::{Subscriptions, Tagged};
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

type TravelStop<S> = (Screen, Arc<S>);

struct InlineDispatch<C: Component> {
    pending: VecDeque<(C::Command, JobOf<C>)>,
    log: Vec<C::Command>,
}

impl<C: Component> Dispatch<C> for InlineDispatch<C> {
    fn dispatch(&mut self, cmd: C::Command, job: JobOf<C>) {
        self.log.push(cmd.clone());
        self.pending.push_back((cmd, job));
    }
}

/// Deterministic, single-threaded driver for a [`Component`].
pub struct ProgramSimulator<C: Component> {
    runtime: Runtime<C>,
    jobs: InlineDispatch<C>,
    subscription_rx: mpsc::Receiver<Tagged<C::Message, C::Command>>,
    travel_rx: Option<mpsc::Receiver<TravelStop<C::State>>>,
    auto_resolve: bool,
}

impl<C: Component> ProgramSimulator<C> {
    /// Bind `component` to `initial` and declare the initial subscriptions.
    pub fn new(initial: C::State, component: C) -> Self {
        Self::build(initial, component, None)
    }

    /// Like [`new`](Self::new), recording history into `traveller`.
    pub fn with_traveller(initial: C::State, component: C, traveller: TravellerOf<C>) -> Self {
        Self::build(initial, component, Some(traveller))
    }

    fn build(initial: C::State, mut component: C, traveller: Option<TravellerOf<C>>) -> Self {
        let (sub_tx, subscription_rx) = mpsc::channel();
        let subs = Subscriptions::new(move |tagged| sub_tx.send(tagged).is_ok());

        let travel_rx = match (&traveller, component.time_travel().is_some()) {
            (Some(tt), true) => {
                let (tx, rx) = mpsc::channel::<TravelStop<C::State>>();
                tt.register(Box::new(move |screen, state| {
                    tx.send((screen.clone(), Arc::clone(state))).is_ok()
                }));
                Some(rx)
            }
            _ => None,
        };

        let mut runtime = Runtime::new(
            component,
            Arc::new(initial),
            subs,
            traveller,
            true,
            StaleResultPolicy::default(),
        );
        runtime.start();

        Self {
            runtime,
            jobs: InlineDispatch {
                pending: VecDeque::new(),
                log: Vec::new(),
            },
            subscription_rx,
            travel_rx,
            auto_resolve: true,
        }
    }

    /// Keep dispatched commands pending until [`resolve_next`](Self::resolve_next)
    /// or [`settle`](Self::settle) is called.
    #[must_use]
    pub fn with_deferred_commands(mut self) -> Self {
        self.auto_resolve = false;
        self
    }

    /// Accept a domain message.
    pub fn send(&mut self, msg: C::Message) {
        self.accept(Msg::App(msg));
    }

    /// Accept any message and run the loop until it is idle.
    ///
    /// Dropped while the attached traveller is in adventure mode.
    pub fn accept(&mut self, msg: MsgOf<C>) {
        if self.runtime.is_replaying() {
            self.runtime.refuse(&msg);
            return;
        }
        self.runtime.accept(msg, &mut self.jobs);
        self.after_input();
    }

    fn after_input(&mut self) {
        self.deliver_travel();
        if self.auto_resolve {
            self.settle();
        }
    }

    /// Resolve pending commands (including ones they trigger) until none are
    /// left. Returns how many were resolved.
    pub fn settle(&mut self) -> usize {
        let mut resolved = 0;
        while self.resolve_next().is_some() {
            resolved += 1;
        }
        resolved
    }

    /// Resolve the oldest pending command and feed its result back.
    ///
    /// Returns the command, or `None` when nothing is pending.
    pub fn resolve_next(&mut self) -> Option<C::Command> {
        let (cmd, job) = self.jobs.pending.pop_front()?;
        let msg = resolve(cmd.clone(), job);
        self.runtime.complete(msg, &mut self.jobs);
        self.deliver_travel();
        Some(cmd)
    }

    /// Commands dispatched but not yet resolved, oldest first.
    pub fn pending_commands(&self) -> Vec<C::Command> {
        self.jobs.pending.iter().map(|(cmd, _)| cmd.clone()).collect()
    }

    /// Every command dispatched so far, in dispatch order.
    pub fn dispatched(&self) -> &[C::Command] {
        &self.jobs.log
    }

    /// Deliver every subscription message already emitted.
    ///
    /// Returns how many messages were delivered, stale ones included.
    pub fn pump_subscriptions(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(tagged) = self.subscription_rx.try_recv() {
            self.deliver_subscription(tagged);
            delivered += 1;
        }
        if delivered > 0 {
            self.after_input();
        }
        delivered
    }

    /// Block until a subscription emits, then deliver everything available.
    ///
    /// Returns `false` if nothing arrived within `timeout`.
    pub fn wait_for_subscription(&mut self, timeout: Duration) -> bool {
        match self.subscription_rx.recv_timeout(timeout) {
            Ok(tagged) => {
                self.deliver_subscription(tagged);
                self.pump_subscriptions();
                self.after_input();
                true
            }
            Err(_) => false,
        }
    }

    fn deliver_subscription(&mut self, tagged: Tagged<C::Message, C::Command>) {
        if self.runtime.is_replaying() {
            self.runtime.refuse(&tagged.msg);
            return;
        }
        self.runtime.on_subscription(tagged, &mut self.jobs);
    }

    fn deliver_travel(&mut self) {
        let Some(rx) = &self.travel_rx else {
            return;
        };
        let stops: Vec<_> = rx.try_iter().collect();
        for (screen, state) in stops {
            self.runtime.travel(&screen, &state);
        }
    }

    /// Re-render the current state.
    pub fn render(&mut self) {
        self.runtime.render();
    }

    /// Deliver replay requests issued through the attached traveller.
    pub fn travel(&mut self) {
        self.deliver_travel();
    }

    /// Release every subscription stream.
    pub fn destroy(&mut self) {
        self.runtime.destroy();
    }

    /// Current state.
    pub fn state(&self) -> Arc<C::State> {
        self.runtime.state()
    }

    /// Loop counters.
    pub fn stats(&self) -> ProgramStats {
        self.runtime.stats()
    }

    /// Whether a reduction is in progress. Always `false` between calls.
    pub fn is_locked(&self) -> bool {
        self.runtime.is_locked()
    }

    /// The bound component.
    pub fn component(&self) -> &C {
        self.runtime.component()
    }
}
