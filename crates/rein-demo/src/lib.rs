#![forbid(unsafe_code)]

//! Phrase history screen built on `rein-runtime`.
//!
//! The history and favorites screens share one component. Phrases live in a
//! [`PhraseStore`](store::PhraseStore); the screen subscribes to a filtered
//! stream of them and clears them through a command.

pub mod cli;
pub mod error;
pub mod history;
pub mod session;
pub mod store;
pub mod view;
