#![forbid(unsafe_code)]

use rein_runtime::RuntimeError;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("runtime: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

pub type Result<T> = std::result::Result<T, DemoError>;
