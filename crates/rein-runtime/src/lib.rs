#![forbid(unsafe_code)]

//! Rein Runtime
//!
//! An Elm-style presentation runtime: a screen is an immutable state value,
//! a pure reducer, a renderer, a command resolver and a set of declared
//! subscriptions. Reductions are serialized on one output thread; commands
//! run on the work context and feed their results back as messages.
//!
//! # Key Components
//!
//! - [`Program`] - Binds a [`Component`] to a state and runs the loop
//! - [`Component`] - Reducer, renderer, command resolver, subscriptions
//! - [`Msg`] / [`Cmd`] - Messages and the side effects a reduction requests
//! - [`CommandExecutor`] - Resolves commands on worker threads
//! - [`Subscriptions`] - Parameter-memoized long-lived streams
//! - [`TimeTraveller`] - History recording and replay
//! - [`ProgramSimulator`] - Deterministic, single-threaded driver for tests
//!
//! # Loop
//!
//! ```text
//!  accept ──▶ queue ──▶ update ──▶ record ──▶ render ──▶ sub ──▶ commands
//!               ▲                                                   │
//!               └──────────────── results (work context) ◀──────────┘
//! ```
//!
//! One message is reduced at a time. The in-flight slot is released right
//! after the state is replaced, so render, subscription refresh and command
//! dispatch always see the state the reduction produced.

pub mod cmd;
pub mod debug_trace;
pub mod error;
pub mod executor;
pub mod history;
pub mod message;
pub mod program;
pub mod queue;
mod runtime;
pub mod simulator;
pub mod subscription;

pub use cmd::{Cmd, Job};
pub use error::{RuntimeError, RuntimeResult};
pub use executor::{CommandExecutor, Completions, ExecutorConfig};
pub use history::{ConsoleRecord, ReplayMode, TimeRecord, TimeTravel, TimeTraveller};
pub use message::{CallError, CommandFailure, Msg, Screen, ScreenState};
pub use program::{
    CmdOf, Component, Disposable, JobOf, MsgOf, Program, ProgramConfig, ProgramHandle,
    StaleResultPolicy, SubscriptionsOf, TravellerOf,
};
pub use queue::MessageQueue;
pub use runtime::ProgramStats;
pub use simulator::ProgramSimulator;
pub use subscription::{
    Emitter, Every, Materialized, Memoized, MockSubscription, StopSignal, StopTrigger, SubId,
    Subscription, SubscriptionSource, Subscriptions,
};
