//! Catalog screen shared by the integration tests.

#![allow(dead_code)]

use rein_runtime::{
    CallError, Cmd, Component, Every, Job, Memoized, Msg, Screen, ScreenState, SubId, Subscription,
    Subscriptions, TimeTravel,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

pub const CATALOG: Screen = Screen::new("catalog");

#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub screen: Screen,
    pub items: Vec<String>,
    pub loading: bool,
    pub channel: u32,
    pub seen: Vec<String>,
    pub errors: Vec<String>,
}

impl ScreenState for Catalog {
    fn screen(&self) -> &Screen {
        &self.screen
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            screen: CATALOG,
            items: Vec::new(),
            loading: false,
            channel: 0,
            seen: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn on(screen: &'static str) -> Self {
        Self {
            screen: Screen::new(screen),
            ..Self::new()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ev {
    Refresh,
    Loaded(Vec<String>),
    Slow,
    Mark(String),
    FanOut(u32),
    Got(u32),
    Quiet,
    Switch(u32),
    Tick(u32),
    Fail,
    Explode,
    Hold,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Req {
    Load,
    Get(u32),
    Nothing,
    Broken,
    Panics,
    Gated,
}

pub type Event = Msg<Ev, Req>;

type TickFactory = fn(&u32) -> Box<dyn Subscription<Ev, Req>>;

fn tick_stream(channel: &u32) -> Box<dyn Subscription<Ev, Req>> {
    let channel = *channel;
    Box::new(Every::new(Duration::from_millis(5), move || {
        Msg::App(Ev::Tick(channel))
    }))
}

/// Observation points shared with a running [`CatalogView`].
#[derive(Clone)]
pub struct Probe {
    pub renders: Arc<Mutex<Vec<Catalog>>>,
    pub travels: Arc<Mutex<Vec<Catalog>>>,
    pub max_active: Arc<AtomicUsize>,
    pub gate: Arc<Mutex<Option<mpsc::Sender<()>>>>,
}

impl Probe {
    pub fn render_count(&self) -> usize {
        self.renders.lock().unwrap().len()
    }

    pub fn rendered(&self) -> Vec<Catalog> {
        self.renders.lock().unwrap().clone()
    }

    pub fn travelled(&self) -> Vec<Catalog> {
        self.travels.lock().unwrap().clone()
    }

    /// Let every gated command finish.
    pub fn open_gate(&self) {
        self.gate.lock().unwrap().take();
    }
}

pub struct CatalogView {
    renders: Arc<Mutex<Vec<Catalog>>>,
    travels: Arc<Mutex<Vec<Catalog>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    gate: Arc<Mutex<mpsc::Receiver<()>>>,
    slow_render: Duration,
    load_delay: Duration,
    travel_capable: bool,
    ticks: Memoized<u32, TickFactory>,
}

impl CatalogView {
    pub fn new() -> (Self, Probe) {
        let (gate_tx, gate_rx) = mpsc::channel();
        let probe = Probe {
            renders: Arc::default(),
            travels: Arc::default(),
            max_active: Arc::default(),
            gate: Arc::new(Mutex::new(Some(gate_tx))),
        };
        let view = Self {
            renders: Arc::clone(&probe.renders),
            travels: Arc::clone(&probe.travels),
            active: Arc::default(),
            max_active: Arc::clone(&probe.max_active),
            gate: Arc::new(Mutex::new(gate_rx)),
            slow_render: Duration::from_millis(60),
            load_delay: Duration::from_millis(20),
            travel_capable: false,
            ticks: Memoized::new(SubId::new("ticks"), tick_stream as TickFactory),
        };
        (view, probe)
    }

    pub fn time_travelling(mut self) -> Self {
        self.travel_capable = true;
        self
    }
}

impl Component for CatalogView {
    type State = Catalog;
    type Message = Ev;
    type Command = Req;

    fn update(&self, msg: Event, state: &Catalog) -> (Catalog, Cmd<Ev, Req>) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let mut next = state.clone();
        next.seen.push(match &msg {
            Msg::App(ev) => format!("{ev:?}"),
            other => other.kind().into_owned(),
        });
        let cmd = match msg {
            Msg::App(Ev::Refresh) => {
                next.loading = true;
                Cmd::call(Req::Load)
            }
            Msg::App(Ev::Loaded(items)) => {
                next.loading = false;
                next.items = items;
                Cmd::none()
            }
            Msg::App(Ev::FanOut(n)) => Cmd::batch((0..n).map(|i| Cmd::call(Req::Get(i))).collect()),
            Msg::App(Ev::Quiet) => Cmd::batch(vec![Cmd::call(Req::Nothing), Cmd::one_shot(Msg::Idle)]),
            Msg::App(Ev::Switch(channel)) => {
                next.channel = channel;
                Cmd::none()
            }
            Msg::App(Ev::Fail) => Cmd::call(Req::Broken),
            Msg::App(Ev::Explode) => Cmd::call(Req::Panics),
            Msg::App(Ev::Hold) => Cmd::call(Req::Gated),
            Msg::App(Ev::Slow | Ev::Mark(_) | Ev::Got(_) | Ev::Tick(_)) => Cmd::none(),
            Msg::Error(failure) => {
                next.errors.push(format!("{:?}: {}", failure.cmd, failure.error));
                Cmd::none()
            }
            Msg::Init | Msg::Idle => Cmd::none(),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        (next, cmd)
    }

    fn render(&mut self, state: &Catalog) {
        if state.seen.last().map(String::as_str) == Some("Slow") {
            thread::sleep(self.slow_render);
        }
        self.renders.lock().unwrap().push(state.clone());
    }

    fn call(&mut self, cmd: Req) -> Job<Ev, Req> {
        match cmd {
            Req::Load => {
                let delay = self.load_delay;
                Job::new(move || {
                    thread::sleep(delay);
                    Ok(Msg::App(Ev::Loaded(vec!["anvil".into(), "rope".into()])))
                })
            }
            Req::Get(i) => Job::ready(Msg::App(Ev::Got(i))),
            Req::Nothing => Job::idle(),
            Req::Broken => Job::fail(CallError::msg("catalog offline")),
            Req::Panics => Job::new(|| panic!("resolver blew up")),
            Req::Gated => {
                let gate = Arc::clone(&self.gate);
                Job::new(move || {
                    // Returns once the probe drops its sender.
                    let _ = gate.lock().unwrap().recv();
                    Ok(Msg::App(Ev::Loaded(vec!["late".into()])))
                })
            }
        }
    }

    fn sub(&mut self, state: &Catalog, subs: &mut Subscriptions<Ev, Req>) {
        if state.channel == 0 {
            subs.remove(&mut self.ticks);
        } else {
            subs.add(&mut self.ticks, state.channel);
        }
    }

    fn time_travel(&mut self) -> Option<&mut dyn TimeTravel<Catalog>> {
        if self.travel_capable {
            Some(self)
        } else {
            None
        }
    }
}

impl TimeTravel<Catalog> for CatalogView {
    fn travel(&mut self, screen: &Screen, state: &Catalog) {
        if *screen == CATALOG {
            self.travels.lock().unwrap().push(state.clone());
        }
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}
