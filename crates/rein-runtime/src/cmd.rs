#![forbid(unsafe_code)]

//! Commands and deferred command work.
//!
//! A [`Cmd`] describes a side effect requested by the reducer. The runtime
//! never interprets domain commands itself: `Cmd::Call` is handed to the
//! component's resolver, which answers with a [`Job`] that the executor runs
//! on the work context.

use crate::message::{CallError, Msg};
use std::fmt;

/// Commands represent side effects to be executed by the runtime.
pub enum Cmd<M, C> {
    /// No operation.
    None,
    /// Execute commands concurrently; results arrive in completion order.
    Batch(Vec<Cmd<M, C>>),
    /// Yield the given message immediately, without leaving the loop.
    OneShot(Msg<M, C>),
    /// Domain command resolved by the component.
    Call(C),
}

impl<M, C> Default for Cmd<M, C> {
    fn default() -> Self {
        Self::None
    }
}

impl<M: fmt::Debug, C: fmt::Debug> fmt::Debug for Cmd<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Batch(cmds) => f.debug_tuple("Batch").field(cmds).finish(),
            Self::OneShot(m) => f.debug_tuple("OneShot").field(m).finish(),
            Self::Call(c) => f.debug_tuple("Call").field(c).finish(),
        }
    }
}

impl<M, C> Cmd<M, C> {
    /// Create a no-op command.
    #[inline]
    pub fn none() -> Self {
        Self::None
    }

    /// Create a pre-resolved command yielding `msg`.
    #[inline]
    pub fn one_shot(msg: Msg<M, C>) -> Self {
        Self::OneShot(msg)
    }

    /// Create a domain command.
    #[inline]
    pub fn call(cmd: C) -> Self {
        Self::Call(cmd)
    }

    /// Create a batch of commands.
    ///
    /// Empty batches collapse to `None`, singletons to their only element.
    pub fn batch(cmds: Vec<Self>) -> Self {
        let mut cmds = cmds;
        match cmds.len() {
            0 => Self::None,
            1 => cmds.pop().unwrap_or_default(),
            _ => Self::Batch(cmds),
        }
    }

    /// Whether this is the no-op command.
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Return a stable name for tracing.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Batch(_) => "Batch",
            Self::OneShot(_) => "OneShot",
            Self::Call(_) => "Call",
        }
    }

    /// Count the leaf commands that will produce a message.
    pub fn count(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Batch(cmds) => cmds.iter().map(Self::count).sum(),
            Self::OneShot(_) | Self::Call(_) => 1,
        }
    }

    /// Flatten nested batches into leaf effects, preserving declaration order.
    pub(crate) fn into_effects(self) -> Vec<Effect<M, C>> {
        let mut out = Vec::new();
        self.collect_effects(&mut out);
        out
    }

    fn collect_effects(self, out: &mut Vec<Effect<M, C>>) {
        match self {
            Self::None => {}
            Self::Batch(cmds) => {
                for cmd in cmds {
                    cmd.collect_effects(out);
                }
            }
            Self::OneShot(msg) => out.push(Effect::Ready(msg)),
            Self::Call(cmd) => out.push(Effect::Call(cmd)),
        }
    }
}

/// A leaf of a flattened command tree.
pub(crate) enum Effect<M, C> {
    Ready(Msg<M, C>),
    Call(C),
}

type JobFn<M, C> = Box<dyn FnOnce() -> Result<Msg<M, C>, CallError> + Send>;

/// Deferred resolution of a domain command.
///
/// Built on the output context by `Component::call`, executed on the work
/// context. Must produce exactly one message or a failure.
pub struct Job<M, C> {
    run: JobFn<M, C>,
}

impl<M, C> Job<M, C>
where
    M: Send + 'static,
    C: Send + 'static,
{
    /// Job running `f` on the work context.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<Msg<M, C>, CallError> + Send + 'static,
    {
        Self { run: Box::new(f) }
    }

    /// Job that resolves to `msg` without doing any work.
    pub fn ready(msg: Msg<M, C>) -> Self {
        Self::new(move || Ok(msg))
    }

    /// Job that resolves to `Idle`.
    pub fn idle() -> Self {
        Self::ready(Msg::Idle)
    }

    /// Job that fails with `error`.
    pub fn fail(error: CallError) -> Self {
        Self::new(move || Err(error))
    }
}

impl<M, C> Job<M, C> {
    pub(crate) fn run(self) -> Result<Msg<M, C>, CallError> {
        (self.run)()
    }
}

impl<M, C> fmt::Debug for Job<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestCmd = Cmd<u32, &'static str>;

    #[test]
    fn batch_collapses_trivial_cases() {
        assert!(TestCmd::batch(vec![]).is_none());
        assert!(matches!(
            TestCmd::batch(vec![Cmd::call("load")]),
            Cmd::Call("load")
        ));
        assert!(matches!(
            TestCmd::batch(vec![Cmd::call("a"), Cmd::call("b")]),
            Cmd::Batch(ref v) if v.len() == 2
        ));
    }

    #[test]
    fn count_walks_nested_batches() {
        let cmd = TestCmd::Batch(vec![
            Cmd::call("a"),
            Cmd::None,
            Cmd::Batch(vec![Cmd::one_shot(Msg::App(1)), Cmd::call("b")]),
        ]);
        assert_eq!(cmd.count(), 3);
        assert_eq!(cmd.type_name(), "Batch");
    }

    #[test]
    fn into_effects_flattens_in_order() {
        let cmd = TestCmd::Batch(vec![
            Cmd::call("a"),
            Cmd::Batch(vec![Cmd::one_shot(Msg::App(7)), Cmd::call("b")]),
        ]);
        let effects = cmd.into_effects();
        assert_eq!(effects.len(), 3);
        assert!(matches!(effects[0], Effect::Call("a")));
        assert!(matches!(effects[1], Effect::Ready(Msg::App(7))));
        assert!(matches!(effects[2], Effect::Call("b")));
    }

    #[test]
    fn jobs_resolve() {
        let job: Job<u32, ()> = Job::ready(Msg::App(3));
        assert!(matches!(job.run(), Ok(Msg::App(3))));
        let idle: Job<u32, ()> = Job::idle();
        assert!(matches!(idle.run(), Ok(Msg::Idle)));
        let failed: Job<u32, ()> = Job::fail(CallError::msg("nope"));
        assert_eq!(failed.run().err().map(|e| e.to_string()), Some("nope".into()));
    }
}
