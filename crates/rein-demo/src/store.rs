#![forbid(unsafe_code)]

//! In-memory phrase history with change notification.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A translated phrase kept in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    pub id: u64,
    pub source: String,
    pub translation: String,
    pub favorite: bool,
}

impl Phrase {
    fn matches(&self, needle: &str) -> bool {
        needle.is_empty()
            || self.source.to_lowercase().contains(needle)
            || self.translation.to_lowercase().contains(needle)
    }
}

/// Store failures surfaced to commands.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("phrase store is offline")]
    Offline,
}

/// Query a history stream is materialized for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PhraseQuery {
    pub search_text: String,
    pub favorites_only: bool,
}

#[derive(Debug, Default)]
struct Inner {
    phrases: Vec<Phrase>,
    next_id: u64,
    version: u64,
    offline: bool,
}

/// Shared phrase history. Cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct PhraseStore {
    inner: Arc<(Mutex<Inner>, Condvar)>,
}

const SAMPLES: &[(&str, &str)] = &[
    ("hello", "hola"),
    ("thank you", "gracias"),
    ("good morning", "buenos dias"),
    ("where is the station", "donde esta la estacion"),
    ("how much", "cuanto cuesta"),
    ("cheers", "salud"),
    ("see you later", "hasta luego"),
    ("the bill please", "la cuenta por favor"),
];

impl PhraseStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `count` sample phrases. Every third is a favorite.
    pub fn seeded(count: usize) -> Self {
        let store = Self::new();
        for i in 0..count {
            let (source, translation) = SAMPLES[i % SAMPLES.len()];
            let round = i / SAMPLES.len();
            let (source, translation) = if round == 0 {
                (source.to_string(), translation.to_string())
            } else {
                (format!("{source} ({round})"), format!("{translation} ({round})"))
            };
            store.add(source, translation, i % 3 == 0);
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn changed(&self, mut inner: MutexGuard<'_, Inner>) {
        inner.version += 1;
        drop(inner);
        self.inner.1.notify_all();
    }

    /// Append a phrase; returns its id.
    pub fn add(&self, source: impl Into<String>, translation: impl Into<String>, favorite: bool) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.phrases.push(Phrase {
            id,
            source: source.into(),
            translation: translation.into(),
            favorite,
        });
        self.changed(inner);
        id
    }

    /// Remove favorites (`favorites_only`) or everything. Returns the number
    /// of phrases removed.
    pub fn clear(&self, favorites_only: bool) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(StoreError::Offline);
        }
        let before = inner.phrases.len();
        if favorites_only {
            inner.phrases.retain(|p| !p.favorite);
        } else {
            inner.phrases.clear();
        }
        let removed = before - inner.phrases.len();
        if removed > 0 {
            self.changed(inner);
        }
        Ok(removed)
    }

    /// Make subsequent `clear` calls fail.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Phrases matching `query`, newest first.
    pub fn filter(&self, query: &PhraseQuery) -> Vec<Phrase> {
        let needle = query.search_text.trim().to_lowercase();
        self.lock()
            .phrases
            .iter()
            .rev()
            .filter(|p| !query.favorites_only || p.favorite)
            .filter(|p| p.matches(&needle))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monotonic change counter.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Block until the version moves past `seen` or `timeout` elapses.
    /// Returns the current version.
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> u64 {
        let inner = self.lock();
        let (inner, _) = self
            .inner
            .1
            .wait_timeout_while(inner, timeout, |inner| inner.version == seen)
            .unwrap_or_else(PoisonError::into_inner);
        inner.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn query(text: &str, favorites_only: bool) -> PhraseQuery {
        PhraseQuery {
            search_text: text.into(),
            favorites_only,
        }
    }

    #[test]
    fn seeded_store_marks_every_third_favorite() {
        let store = PhraseStore::seeded(10);
        assert_eq!(store.len(), 10);
        assert_eq!(store.filter(&query("", true)).len(), 4);
        assert!(store.filter(&query("", false))[0].source.contains("(1)"));
    }

    #[test]
    fn filter_is_case_insensitive_on_both_sides() {
        let store = PhraseStore::new();
        store.add("Hello", "Hola", false);
        store.add("Cheers", "Salud", true);
        assert_eq!(store.filter(&query("HOL", false)).len(), 1);
        assert_eq!(store.filter(&query(" salud ", false))[0].source, "Cheers");
        assert!(store.filter(&query("hello", true)).is_empty());
    }

    #[test]
    fn clear_respects_favorites_and_offline() {
        let store = PhraseStore::seeded(6);
        assert_eq!(store.clear(true), Ok(2));
        assert_eq!(store.clear(true), Ok(0));
        store.set_offline(true);
        assert_eq!(store.clear(false), Err(StoreError::Offline));
        store.set_offline(false);
        assert_eq!(store.clear(false), Ok(4));
        assert!(store.is_empty());
    }

    #[test]
    fn waiters_wake_on_change() {
        let store = PhraseStore::new();
        let seen = store.version();
        let writer = store.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.add("a", "b", false);
        });
        let version = store.wait_for_change(seen, Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(version, seen + 1);
        // Nothing changes afterwards: the wait times out.
        assert_eq!(store.wait_for_change(version, Duration::from_millis(10)), version);
    }
}
