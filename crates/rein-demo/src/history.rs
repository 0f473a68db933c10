#![forbid(unsafe_code)]

//! Phrase history screen.
//!
//! The same component serves two screens: the full history and the
//! favorites list. The visible phrases come from a [`HistoryPhrasesSub`]
//! stream keyed on the search text and the favorites flag; typing a new
//! filter replaces the stream, and every store change re-emits the list.

use crate::store::{Phrase, PhraseQuery, PhraseStore};
use crate::view::{HistoryFrame, HistoryView};
use rein_runtime::{
    CallError, Cmd, Component, Emitter, Job, Materialized, Msg, Screen, ScreenState, StopSignal,
    SubId, Subscription, SubscriptionSource, Subscriptions, TimeTravel,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const HISTORY: Screen = Screen::new("history");
pub const FAVORITES: Screen = Screen::new("favorites");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryState {
    pub is_favorite: bool,
    pub phrases: Vec<Phrase>,
    pub search_text: String,
    pub screen: Screen,
}

impl HistoryState {
    pub fn initial(is_favorite: bool) -> Self {
        Self {
            is_favorite,
            phrases: Vec::new(),
            search_text: String::new(),
            screen: if is_favorite { FAVORITES } else { HISTORY },
        }
    }

    pub fn query(&self) -> PhraseQuery {
        PhraseQuery {
            search_text: self.search_text.clone(),
            favorites_only: self.is_favorite,
        }
    }
}

impl ScreenState for HistoryState {
    fn screen(&self) -> &Screen {
        &self.screen
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryMsg {
    FilterPhrases(String),
    ClearHistory,
    HistoryLoaded(Vec<Phrase>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryCmd {
    ClearHistory { favorites_only: bool },
}

pub type HistoryEvent = Msg<HistoryMsg, HistoryCmd>;

/// Interval at which an idle phrase stream re-checks its stop signal.
const STREAM_POLL: Duration = Duration::from_millis(25);

/// Descriptor for the phrase stream, memoized on the query.
#[derive(Debug)]
pub struct HistoryPhrasesSub {
    store: PhraseStore,
    last: Option<PhraseQuery>,
}

impl HistoryPhrasesSub {
    pub fn new(store: PhraseStore) -> Self {
        Self { store, last: None }
    }
}

impl SubscriptionSource<HistoryMsg, HistoryCmd> for HistoryPhrasesSub {
    type Params = PhraseQuery;

    fn id(&self) -> SubId {
        SubId::new("history-phrases")
    }

    fn materialize(&mut self, query: PhraseQuery) -> Materialized<HistoryMsg, HistoryCmd> {
        if self.last.as_ref() == Some(&query) {
            return Materialized::Unchanged;
        }
        self.last = Some(query.clone());
        Materialized::New(Box::new(PhrasesStream {
            store: self.store.clone(),
            query,
        }))
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

struct PhrasesStream {
    store: PhraseStore,
    query: PhraseQuery,
}

impl Subscription<HistoryMsg, HistoryCmd> for PhrasesStream {
    fn run(&self, emitter: Emitter<HistoryMsg, HistoryCmd>, stop: StopSignal) {
        let mut emitted = None;
        while !stop.is_stopped() {
            let version = self.store.version();
            if emitted != Some(version) {
                let phrases = self.store.filter(&self.query);
                tracing::trace!(count = phrases.len(), query = ?self.query, "phrases loaded");
                if !emitter.emit_app(HistoryMsg::HistoryLoaded(phrases)) {
                    break;
                }
                emitted = Some(version);
            }
            self.store.wait_for_change(version, STREAM_POLL);
        }
    }
}

/// Labels shown by the history screen.
#[derive(Debug, Clone, Copy)]
pub struct Labels {
    pub history_title: &'static str,
    pub favorites_title: &'static str,
    pub history_hint: &'static str,
    pub favorites_hint: &'static str,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            history_title: "History",
            favorites_title: "Favorites",
            history_hint: "Search history",
            favorites_hint: "Search favorites",
        }
    }
}

pub struct HistoryScreen<V> {
    is_favorite: bool,
    screen: Screen,
    view: V,
    labels: Labels,
    store: PhraseStore,
    phrases: HistoryPhrasesSub,
}

impl<V: HistoryView> HistoryScreen<V> {
    pub fn new(is_favorite: bool, view: V, store: PhraseStore) -> Self {
        tracing::debug!(is_favorite, "history screen created");
        Self {
            is_favorite,
            screen: if is_favorite { FAVORITES } else { HISTORY },
            view,
            labels: Labels::default(),
            phrases: HistoryPhrasesSub::new(store.clone()),
            store,
        }
    }

    #[must_use]
    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    fn frame(&self, state: &HistoryState) -> HistoryFrame {
        let (title, filter_hint) = if state.is_favorite {
            (self.labels.favorites_title, self.labels.favorites_hint)
        } else {
            (self.labels.history_title, self.labels.history_hint)
        };
        HistoryFrame {
            title,
            filter_hint,
            empty: state.phrases.is_empty(),
            phrases: state.phrases.clone(),
            search_text: state.search_text.clone(),
        }
    }
}

impl<V: HistoryView> Component for HistoryScreen<V> {
    type State = HistoryState;
    type Message = HistoryMsg;
    type Command = HistoryCmd;

    fn update(&self, msg: HistoryEvent, state: &HistoryState) -> (HistoryState, Cmd<HistoryMsg, HistoryCmd>) {
        match msg {
            Msg::App(HistoryMsg::FilterPhrases(query)) => (
                HistoryState {
                    search_text: query,
                    ..state.clone()
                },
                Cmd::none(),
            ),
            Msg::App(HistoryMsg::ClearHistory) => (
                state.clone(),
                Cmd::call(HistoryCmd::ClearHistory {
                    favorites_only: state.is_favorite,
                }),
            ),
            Msg::App(HistoryMsg::HistoryLoaded(phrases)) => (
                HistoryState {
                    phrases,
                    ..state.clone()
                },
                Cmd::none(),
            ),
            Msg::Error(failure) => {
                tracing::error!(error = %failure.error, cmd = ?failure.cmd, "history command failed");
                (state.clone(), Cmd::none())
            }
            Msg::Init | Msg::Idle => (state.clone(), Cmd::none()),
        }
    }

    fn render(&mut self, state: &HistoryState) {
        let frame = self.frame(state);
        self.view.show(frame);
    }

    fn call(&mut self, cmd: HistoryCmd) -> Job<HistoryMsg, HistoryCmd> {
        match cmd {
            HistoryCmd::ClearHistory { favorites_only } => {
                let store = self.store.clone();
                Job::new(move || match store.clear(favorites_only) {
                    // Nothing changed, so no stream will re-emit.
                    Ok(0) => Ok(Msg::Idle),
                    Ok(removed) => {
                        tracing::info!(removed, favorites_only, "history cleared");
                        Ok(Msg::Init)
                    }
                    Err(err) => Err(CallError::new(err)),
                })
            }
        }
    }

    fn sub(&mut self, state: &HistoryState, subs: &mut Subscriptions<HistoryMsg, HistoryCmd>) {
        subs.add(&mut self.phrases, state.query());
    }

    fn time_travel(&mut self) -> Option<&mut dyn TimeTravel<HistoryState>> {
        Some(self)
    }
}

impl<V: HistoryView> TimeTravel<HistoryState> for HistoryScreen<V> {
    fn travel(&mut self, screen: &Screen, state: &HistoryState) {
        if *screen == self.screen && state.is_favorite == self.is_favorite {
            self.render(state);
        }
    }
}
