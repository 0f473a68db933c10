#![forbid(unsafe_code)]

//! Messages, screen identities and command failures.
//!
//! A [`Msg`] is the only thing the reducer ever sees. Besides the domain
//! payload (`Msg::App`) the runtime defines three framework variants:
//!
//! - `Init`: conventional first message a consumer sends after `init`.
//! - `Idle`: "the command resolved with nothing actionable". The runtime
//!   discards it before it reaches the queue.
//! - `Error`: a command failed; carries the failure and the command that
//!   produced it so the reducer can decide what to do.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Stable identity of a consumer ("screen").
///
/// Used to route time-travel replays to the component that owns the
/// recorded state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Screen(Cow<'static, str>);

impl Screen {
    /// Screen identity from a static name.
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Screen identity from a runtime-built name.
    pub fn owned(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Implemented by every state type driven by the runtime.
pub trait ScreenState {
    /// The screen this state belongs to.
    fn screen(&self) -> &Screen;
}

/// Failure produced while resolving a command.
///
/// Cheap to clone so that it can travel inside messages and history records.
#[derive(Debug, Clone, thiserror::Error)]
#[error(transparent)]
pub struct CallError(Arc<dyn StdError + Send + Sync>);

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct TextError(String);

#[derive(Debug, thiserror::Error)]
#[error("command panicked: {0}")]
struct PanicError(String);

impl CallError {
    /// Wrap any error value.
    pub fn new<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    /// Build an error from a plain description.
    pub fn msg(text: impl Into<String>) -> Self {
        Self(Arc::new(TextError(text.into())))
    }

    /// Build an error from a caught panic payload.
    pub(crate) fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let text = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_owned()
        };
        Self(Arc::new(PanicError(text)))
    }

    /// Borrow the underlying error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }
}

/// A failed command together with the failure it produced.
#[derive(Debug, Clone)]
pub struct CommandFailure<C> {
    /// What went wrong.
    pub error: CallError,
    /// The command whose resolution failed.
    pub cmd: C,
}

/// Event consumed by the reducer.
#[derive(Debug, Clone)]
pub enum Msg<M, C> {
    /// Initialization.
    Init,
    /// Sentinel for "nothing actionable"; never reaches the reducer.
    Idle,
    /// A command failed to resolve.
    Error(CommandFailure<C>),
    /// Domain-specific event.
    App(M),
}

impl<M, C> Msg<M, C> {
    /// Wrap a domain message.
    #[inline]
    pub fn app(m: M) -> Self {
        Self::App(m)
    }

    /// Build an error message for a failed command.
    pub fn error(error: CallError, cmd: C) -> Self {
        Self::Error(CommandFailure { error, cmd })
    }

    /// Whether this is the `Idle` sentinel.
    #[inline]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// The domain payload, if any.
    pub fn as_app(&self) -> Option<&M> {
        match self {
            Self::App(m) => Some(m),
            _ => None,
        }
    }
}

impl<M: fmt::Debug, C> Msg<M, C> {
    /// Short name of the message variant, used for logs and console records.
    pub fn kind(&self) -> Cow<'static, str> {
        match self {
            Self::Init => Cow::Borrowed("Init"),
            Self::Idle => Cow::Borrowed("Idle"),
            Self::Error(_) => Cow::Borrowed("Error"),
            Self::App(m) => Cow::Owned(debug_kind(m)),
        }
    }
}

/// Variant name of a value, taken from its `Debug` representation.
pub fn debug_kind<T: fmt::Debug + ?Sized>(value: &T) -> String {
    let repr = format!("{value:?}");
    let end = repr
        .find(|c: char| c == '(' || c == ' ' || c == '{')
        .unwrap_or(repr.len());
    repr[..end].to_owned()
}
