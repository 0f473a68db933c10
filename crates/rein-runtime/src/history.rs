#![forbid(unsafe_code)]

//! History recording and time-travel replay.
//!
//! A [`TimeTraveller`] is shared between one or more programs. Every
//! reduction appends a [`TimeRecord`] (screen, message, resulting state) and a
//! lightweight [`ConsoleRecord`] for display. Records are append-only and live
//! as long as the traveller.
//!
//! # Replay ("adventure mode")
//!
//! ```text
//!   Recording ──enter_adventure()──▶ Replaying
//!       ▲                               │
//!       └────────exit_adventure()───────┘
//! ```
//!
//! While replaying, programs drop accepted messages and stop advancing their
//! queues. The driver feeds recorded `(screen, state)` pairs through
//! [`TimeTraveller::travel`] / [`TimeTraveller::travel_to`]; they are delivered
//! to every registered time-travel-capable component, which re-renders the
//! state when the screen is its own. Leaving replay does not flush anything:
//! queue and lock are exactly as they were left.

use crate::message::{Msg, Screen, ScreenState};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Capability of a component to re-render recorded states.
pub trait TimeTravel<S> {
    /// Render `state` if `screen` is this component's own screen; ignore it
    /// otherwise.
    fn travel(&mut self, screen: &Screen, state: &S);
}

/// Current mode of a [`TimeTraveller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Normal intake; every reduction is recorded.
    Recording,
    /// Intake suspended; recorded states are being replayed.
    Replaying,
}

/// One reduction: the message and the state it produced.
#[derive(Debug)]
pub struct TimeRecord<M, C, S> {
    /// Screen of the resulting state.
    pub screen: Screen,
    /// The reduced message.
    pub msg: Msg<M, C>,
    /// The resulting state.
    pub state: Arc<S>,
}

// States are shared, so `S` need not be `Clone`.
impl<M: Clone, C: Clone, S> Clone for TimeRecord<M, C, S> {
    fn clone(&self) -> Self {
        Self {
            screen: self.screen.clone(),
            msg: self.msg.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

/// Console-oriented projection of a [`TimeRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConsoleRecord {
    /// Screen of the resulting state.
    pub screen: Screen,
    /// Message variant name.
    pub message: String,
    /// `Debug` rendering of the resulting state.
    pub state: String,
}

type Listener<S> = Box<dyn Fn(&Screen, &Arc<S>) -> bool + Send>;

struct Inner<M, C, S> {
    records: Vec<TimeRecord<M, C, S>>,
    console: Vec<ConsoleRecord>,
    listeners: Vec<Listener<S>>,
}

/// Shared history recorder and replay driver.
pub struct TimeTraveller<M, C, S> {
    inner: Arc<Mutex<Inner<M, C, S>>>,
    adventure: Arc<AtomicBool>,
}

impl<M, C, S> Clone for TimeTraveller<M, C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            adventure: Arc::clone(&self.adventure),
        }
    }
}

impl<M, C, S> Default for TimeTraveller<M, C, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, C, S> fmt::Debug for TimeTraveller<M, C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("TimeTraveller")
            .field("records", &inner.records.len())
            .field("listeners", &inner.listeners.len())
            .field("mode", &self.mode())
            .finish()
    }
}

impl<M, C, S> TimeTraveller<M, C, S> {
    /// Create an empty recorder in `Recording` mode.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                records: Vec::new(),
                console: Vec::new(),
                listeners: Vec::new(),
            })),
            adventure: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<M, C, S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of recorded reductions.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current replay mode.
    pub fn mode(&self) -> ReplayMode {
        if self.is_adventure_mode() {
            ReplayMode::Replaying
        } else {
            ReplayMode::Recording
        }
    }

    /// Whether replay mode is active.
    #[inline]
    pub fn is_adventure_mode(&self) -> bool {
        self.adventure.load(Ordering::SeqCst)
    }

    /// Suspend normal intake and enable replay.
    pub fn enter_adventure(&self) {
        if !self.adventure.swap(true, Ordering::SeqCst) {
            tracing::info!("entering adventure mode");
        }
    }

    /// Resume normal intake. Pending queue contents are left untouched.
    pub fn exit_adventure(&self) {
        if self.adventure.swap(false, Ordering::SeqCst) {
            tracing::info!("leaving adventure mode");
        }
    }

    /// Snapshot of the console projection.
    pub fn console_records(&self) -> Vec<ConsoleRecord> {
        self.lock().console.clone()
    }

    /// Register a replay listener. Listeners returning `false` are dropped.
    pub(crate) fn register(&self, listener: Listener<S>) {
        self.lock().listeners.push(listener);
    }

    /// Number of registered replay listeners.
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Deliver `(screen, state)` to every registered listener.
    ///
    /// No-op outside adventure mode. Returns the number of listeners reached.
    pub fn travel(&self, screen: &Screen, state: Arc<S>) -> usize {
        if !self.is_adventure_mode() {
            tracing::debug!(%screen, "travel ignored outside adventure mode");
            return 0;
        }
        let mut inner = self.lock();
        inner.listeners.retain(|listener| listener(screen, &state));
        inner.listeners.len()
    }

    /// Replay the record at `index`. Returns `false` when the index is out of
    /// range or replay mode is off.
    pub fn travel_to(&self, index: usize) -> bool {
        let target = {
            let inner = self.lock();
            inner
                .records
                .get(index)
                .map(|r| (r.screen.clone(), Arc::clone(&r.state)))
        };
        match target {
            Some((screen, state)) if self.is_adventure_mode() => {
                self.travel(&screen, state);
                true
            }
            _ => false,
        }
    }
}

impl<M, C, S> TimeTraveller<M, C, S>
where
    M: fmt::Debug,
    S: ScreenState + fmt::Debug,
{
    /// Append a record for a completed reduction.
    pub(crate) fn record(&self, msg: Msg<M, C>, state: &Arc<S>) {
        let screen = state.screen().clone();
        let console = ConsoleRecord {
            screen: screen.clone(),
            message: msg.kind().into_owned(),
            state: format!("{state:?}"),
        };
        let mut inner = self.lock();
        inner.console.push(console);
        inner.records.push(TimeRecord {
            screen,
            msg,
            state: Arc::clone(state),
        });
    }
}

impl<M: Clone, C: Clone, S> TimeTraveller<M, C, S> {
    /// Snapshot of all records, oldest first.
    pub fn records(&self) -> Vec<TimeRecord<M, C, S>> {
        self.lock().records.clone()
    }
}

#[cfg(feature = "serde")]
impl<M, C, S> TimeTraveller<M, C, S> {
    /// Write console records as JSON lines.
    pub fn write_console_jsonl<W: std::io::Write>(&self, mut writer: W) -> std::io::Result<()> {
        for record in self.console_records() {
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}
