#![forbid(unsafe_code)]

//! Runtime lifecycle errors.

use std::io;

/// Errors surfaced by [`Program`](crate::Program) lifecycle calls.
///
/// Command failures never appear here; they travel through the reducer as
/// [`Msg::Error`](crate::Msg::Error).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// `init` was called on an already bound program.
    #[error("program is already initialized")]
    AlreadyInitialized,
    /// The call requires `init` first.
    #[error("program is not initialized")]
    NotInitialized,
    /// The output thread or a worker thread could not be started.
    #[error("failed to spawn runtime thread: {0}")]
    Spawn(#[source] io::Error),
    /// The output loop has stopped.
    #[error("program loop is no longer running")]
    Disconnected,
}

/// Result alias for runtime lifecycle calls.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn spawn_error_keeps_source() {
        let err = RuntimeError::Spawn(io::Error::other("no threads left"));
        assert_eq!(err.to_string(), "failed to spawn runtime thread: no threads left");
        assert!(err.source().is_some());
    }

    #[test]
    fn lifecycle_messages() {
        assert_eq!(
            RuntimeError::AlreadyInitialized.to_string(),
            "program is already initialized"
        );
        assert_eq!(RuntimeError::NotInitialized.to_string(), "program is not initialized");
    }
}
