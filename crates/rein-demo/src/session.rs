#![forbid(unsafe_code)]

//! Scripted session: init, type filters, optionally clear, optionally replay.

use crate::cli::Opts;
use crate::error::{DemoError, Result};
use crate::history::{HistoryCmd, HistoryMsg, HistoryScreen, HistoryState};
use crate::store::PhraseStore;
use crate::view::HistoryView;
use rein_runtime::{
    ExecutorConfig, Msg, Program, ProgramConfig, ProgramStats, TimeTraveller,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub type HistoryTraveller = TimeTraveller<HistoryMsg, HistoryCmd, HistoryState>;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub final_state: Arc<HistoryState>,
    pub stats: ProgramStats,
    pub replayed: usize,
    pub traveller: HistoryTraveller,
}

fn program_config(opts: &Opts) -> ProgramConfig {
    let config = ProgramConfig::from_env();
    match opts.workers {
        Some(workers) => config.with_executor(ExecutorConfig::default().with_pool(workers)),
        None => config,
    }
}

fn settle<V: HistoryView>(
    program: &Program<HistoryScreen<V>>,
    store: &PhraseStore,
    step: &'static str,
) -> Result<Arc<HistoryState>> {
    let deadline = Instant::now() + STEP_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        program.wait_idle(remaining);
        let state = program.get_state()?;
        if state.phrases == store.filter(&state.query()) {
            return Ok(state);
        }
        if remaining.is_zero() {
            return Err(DemoError::Timeout(step));
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Run the scripted session against `store`, rendering into `view`.
pub fn run<V: HistoryView>(opts: &Opts, store: &PhraseStore, view: V) -> Result<SessionReport> {
    let traveller = HistoryTraveller::new();
    let mut program = Program::with_time_traveller(program_config(opts), traveller.clone());
    let component = HistoryScreen::new(opts.favorites, view, store.clone());
    let mut disposable = program.init(HistoryState::initial(opts.favorites), component)?;

    program.accept(Msg::Init);
    settle(&program, store, "initial phrases")?;

    for text in &opts.filters {
        tracing::info!(%text, "typing filter");
        program.accept_app(HistoryMsg::FilterPhrases(text.clone()));
        let state = settle(&program, store, "filtered phrases")?;
        tracing::debug!(shown = state.phrases.len(), "filter applied");
    }

    if opts.clear {
        program.accept_app(HistoryMsg::ClearHistory);
        settle(&program, store, "cleared history")?;
    }

    let mut replayed = 0;
    if opts.replay {
        traveller.enter_adventure();
        for index in 0..traveller.len() {
            if traveller.travel_to(index) {
                replayed += 1;
            }
        }
        if !program.wait_idle(STEP_TIMEOUT) {
            traveller.exit_adventure();
            return Err(DemoError::Timeout("replay"));
        }
        traveller.exit_adventure();
    }

    let final_state = program.get_state()?;
    let stats = program.stats();
    disposable.dispose();
    tracing::info!(
        reductions = stats.reductions,
        renders = stats.renders,
        replayed,
        "session finished"
    );

    Ok(SessionReport {
        final_state,
        stats,
        replayed,
        traveller,
    })
}
