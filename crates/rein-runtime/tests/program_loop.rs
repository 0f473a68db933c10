#![forbid(unsafe_code)]

//! End-to-end behavior of the threaded program loop.

mod common;

use common::{Catalog, CatalogView, Ev, Probe, eventually};
use rein_runtime::{
    Disposable, ExecutorConfig, Msg, Program, ProgramConfig, StaleResultPolicy,
};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

const SETTLE: Duration = Duration::from_secs(5);

fn start(config: ProgramConfig) -> (Program<CatalogView>, Disposable, Probe) {
    let (view, probe) = CatalogView::new();
    let mut program = Program::new(config);
    let disposable = program.init(Catalog::new(), view).unwrap();
    (program, disposable, probe)
}

fn seen(program: &Program<CatalogView>) -> Vec<String> {
    program.get_state().unwrap().seen.clone()
}

#[test]
fn init_renders_once_without_further_activity() {
    let (program, _disposable, probe) = start(ProgramConfig::default());
    // Binding alone does not render.
    assert!(program.wait_idle(SETTLE));
    assert_eq!(probe.render_count(), 0);

    program.accept(Msg::Init);
    assert!(program.wait_idle(SETTLE));

    let renders = probe.rendered();
    assert_eq!(renders.len(), 1);
    assert_eq!(renders[0].items, Catalog::new().items);
    let stats = program.stats();
    assert_eq!(stats.reductions, 1);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.commands_in_flight, 0);
}

#[test]
fn refresh_renders_twice_once_loaded() {
    let (program, _disposable, probe) = start(ProgramConfig::default());
    program.accept_app(Ev::Refresh);
    assert!(program.wait_idle(SETTLE));

    let renders = probe.rendered();
    assert_eq!(renders.len(), 2);
    assert!(renders[0].loading);
    assert!(renders[0].items.is_empty());
    assert!(!renders[1].loading);
    assert_eq!(renders[1].items, vec!["anvil".to_string(), "rope".to_string()]);
    assert_eq!(program.get_state().unwrap().seen, vec!["Refresh", "Loaded([\"anvil\", \"rope\"])"]);
}

#[test]
fn back_to_back_accepts_keep_their_order() {
    let (program, _disposable, probe) = start(ProgramConfig::default());
    program.accept_app(Ev::Slow);
    program.accept_app(Ev::Mark("A".into()));
    program.accept_app(Ev::Mark("B".into()));
    assert!(program.wait_idle(SETTLE));

    assert_eq!(seen(&program), vec!["Slow", "Mark(\"A\")", "Mark(\"B\")"]);
    let rendered: Vec<usize> = probe.rendered().iter().map(|s| s.seen.len()).collect();
    assert_eq!(rendered, vec![1, 2, 3]);
}

#[test]
fn concurrent_accepts_reduce_one_at_a_time() {
    let (program, _disposable, probe) = start(ProgramConfig::default());
    let handle = program.handle().unwrap();

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let handle = handle.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    handle.accept_app(Ev::Mark(format!("{p}:{i}")));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    assert!(program.wait_idle(SETTLE));

    let seen = seen(&program);
    assert_eq!(seen.len(), 100);
    assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
    for p in 0..4 {
        let own: Vec<&String> = seen
            .iter()
            .filter(|s| s.starts_with(&format!("Mark(\"{p}:")))
            .collect();
        let expected: Vec<String> = (0..25).map(|i| format!("Mark(\"{p}:{i}\")")).collect();
        assert_eq!(own.len(), 25);
        assert!(own.iter().zip(&expected).all(|(a, b)| *a == b));
    }
}

#[test]
fn idle_results_never_reach_the_reducer() {
    let (program, _disposable, _probe) = start(ProgramConfig::default());
    program.accept_app(Ev::Quiet);
    program.accept(Msg::Idle);
    assert!(program.wait_idle(SETTLE));

    assert_eq!(seen(&program), vec!["Quiet"]);
    assert_eq!(program.stats().idle_discarded, 3);
    assert_eq!(program.stats().reductions, 1);
}

#[test]
fn batch_fans_out_exactly_once_each() {
    for config in [
        ProgramConfig::default(),
        ProgramConfig::default().with_executor(ExecutorConfig::default().with_pool(3)),
    ] {
        let (program, _disposable, _probe) = start(config);
        program.accept_app(Ev::FanOut(8));
        assert!(program.wait_idle(SETTLE));

        let seen = seen(&program);
        assert_eq!(seen[0], "FanOut(8)");
        let mut got: Vec<&str> = seen[1..].iter().map(String::as_str).collect();
        got.sort_unstable();
        let mut expected: Vec<String> = (0..8).map(|i| format!("Got({i})")).collect();
        expected.sort_unstable();
        assert_eq!(got, expected);
    }
}

#[test]
fn command_failures_arrive_as_error_messages() {
    let (program, _disposable, _probe) = start(ProgramConfig::default());
    program.accept_app(Ev::Fail);
    program.accept_app(Ev::Explode);
    assert!(program.wait_idle(SETTLE));

    let state = program.get_state().unwrap();
    assert_eq!(state.errors.len(), 2);
    assert!(state.errors.contains(&"Broken: catalog offline".to_string()));
    assert!(
        state
            .errors
            .iter()
            .any(|e| e.starts_with("Panics:") && e.contains("resolver blew up"))
    );
    assert_eq!(state.seen.iter().filter(|s| *s == "Error").count(), 2);
}

#[test]
fn replaced_subscription_never_leaks_old_messages() {
    let (program, _disposable, _probe) = start(ProgramConfig::default());
    program.accept_app(Ev::Switch(1));
    assert!(eventually(SETTLE, || seen(&program).contains(&"Tick(1)".into())));

    program.accept_app(Ev::Switch(2));
    assert!(eventually(SETTLE, || seen(&program).contains(&"Tick(2)".into())));
    assert_eq!(program.stats().active_subscriptions, 1);

    let seen = seen(&program);
    let switched = seen.iter().position(|s| s == "Switch(2)").unwrap();
    assert!(seen[switched..].iter().all(|s| s != "Tick(1)"));

    program.accept_app(Ev::Switch(0));
    assert!(eventually(SETTLE, || program.stats().active_subscriptions == 0));
}

#[test]
fn render_repeats_without_touching_state() {
    let (program, _disposable, probe) = start(ProgramConfig::default());
    program.accept_app(Ev::Mark("x".into()));
    assert!(program.wait_idle(SETTLE));
    program.render();
    program.render();
    assert!(program.wait_idle(SETTLE));

    let renders = probe.rendered();
    assert_eq!(renders.len(), 3);
    assert!(renders.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(program.stats().reductions, 1);
}

#[test]
fn destroy_drops_late_results_by_default() {
    let (program, _disposable, probe) = start(ProgramConfig::default());
    program.accept_app(Ev::Switch(3));
    program.accept_app(Ev::Hold);
    assert!(eventually(SETTLE, || program.stats().commands_in_flight == 1));

    program.destroy();
    program.accept_app(Ev::Mark("after".into()));
    probe.open_gate();
    assert!(program.wait_idle(SETTLE));

    let stats = program.stats();
    assert_eq!(stats.active_subscriptions, 0);
    assert_eq!(stats.dropped, 2);
    let state = program.get_state().unwrap();
    assert!(state.items.is_empty());
    assert!(!state.seen.contains(&"Mark(\"after\")".to_string()));

    // Destroy is idempotent.
    program.destroy();
    assert!(program.wait_idle(SETTLE));
}

#[test]
fn deliver_policy_reduces_late_results() {
    let config = ProgramConfig::default().with_stale_results(StaleResultPolicy::Deliver);
    let (program, _disposable, probe) = start(config);
    program.accept_app(Ev::Hold);
    assert!(eventually(SETTLE, || program.stats().commands_in_flight == 1));

    program.destroy();
    probe.open_gate();
    assert!(program.wait_idle(SETTLE));
    assert_eq!(program.get_state().unwrap().items, vec!["late".to_string()]);
}

#[test]
fn state_snapshot_can_seed_a_new_program() {
    let (program, mut disposable, _probe) = start(ProgramConfig::default());
    program.accept_app(Ev::Mark("kept".into()));
    assert!(program.wait_idle(SETTLE));
    let snapshot = (*program.get_state().unwrap()).clone();
    disposable.dispose();

    let (view, probe) = CatalogView::new();
    let mut restored = Program::new(ProgramConfig::default());
    let _disposable = restored.init(snapshot.clone(), view).unwrap();
    restored.render();
    assert!(restored.wait_idle(SETTLE));
    assert_eq!(probe.rendered(), vec![snapshot]);
}

#[test]
fn disposing_stops_the_loop() {
    let (program, mut disposable, _probe) = start(ProgramConfig::default());
    program.accept_app(Ev::Switch(1));
    assert!(program.wait_idle(SETTLE));
    disposable.dispose();
    assert!(disposable.is_disposed());
    assert_eq!(program.stats().active_subscriptions, 0);
}
