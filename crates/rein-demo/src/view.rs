#![forbid(unsafe_code)]

//! Plain-text rendering surface for the history screen.

use crate::store::Phrase;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

/// Everything the history screen shows at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFrame {
    pub title: &'static str,
    pub filter_hint: &'static str,
    pub empty: bool,
    pub phrases: Vec<Phrase>,
    pub search_text: String,
}

impl fmt::Display for HistoryFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== {} ==", self.title)?;
        if self.search_text.is_empty() {
            writeln!(f, "[{}]", self.filter_hint)?;
        } else {
            writeln!(f, "[search: {}]", self.search_text)?;
        }
        if self.empty {
            return writeln!(f, "  (nothing here yet)");
        }
        for phrase in &self.phrases {
            let star = if phrase.favorite { " *" } else { "" };
            writeln!(f, "  {} -> {}{}", phrase.source, phrase.translation, star)?;
        }
        Ok(())
    }
}

/// Surface the history screen renders to.
pub trait HistoryView: Send + 'static {
    fn show(&mut self, frame: HistoryFrame);
}

/// Shared log of shown frames.
#[derive(Debug, Clone, Default)]
pub struct FrameLog(Arc<Mutex<Vec<HistoryFrame>>>);

impl FrameLog {
    fn push(&self, frame: HistoryFrame) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame);
    }

    pub fn frames(&self) -> Vec<HistoryFrame> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last(&self) -> Option<HistoryFrame> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Text sink: records frames and optionally echoes them to a writer.
pub struct TextView {
    log: FrameLog,
    echo: Option<Box<dyn Write + Send>>,
}

impl fmt::Debug for TextView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextView")
            .field("frames", &self.log.len())
            .field("echo", &self.echo.is_some())
            .finish()
    }
}

impl TextView {
    /// Record frames without printing them.
    pub fn capture() -> (Self, FrameLog) {
        let log = FrameLog::default();
        (
            Self {
                log: log.clone(),
                echo: None,
            },
            log,
        )
    }

    /// Record frames and print each one to `writer`.
    pub fn echo(writer: impl Write + Send + 'static) -> (Self, FrameLog) {
        let (mut view, log) = Self::capture();
        view.echo = Some(Box::new(writer));
        (view, log)
    }
}

impl HistoryView for TextView {
    fn show(&mut self, frame: HistoryFrame) {
        if let Some(out) = &mut self.echo {
            if let Err(err) = write!(out, "{frame}").and_then(|()| out.flush()) {
                tracing::warn!(%err, "failed to echo frame");
            }
        }
        self.log.push(frame);
    }
}
