//! Property-based tests for phrase filtering.
//!
//! 1. Favorites-only results are a subset of the full results.
//! 2. Every returned phrase matches the search text.
//! 3. An empty search returns everything in scope.

use proptest::prelude::*;
use rein_demo::store::{PhraseQuery, PhraseStore};

fn query(text: &str, favorites_only: bool) -> PhraseQuery {
    PhraseQuery {
        search_text: text.to_string(),
        favorites_only,
    }
}

proptest! {
    #[test]
    fn favorites_are_a_subset(seed in 0usize..40, text in "[a-z ]{0,3}") {
        let store = PhraseStore::seeded(seed);
        let all = store.filter(&query(&text, false));
        let favorites = store.filter(&query(&text, true));
        prop_assert!(favorites.len() <= all.len());
        prop_assert!(favorites.iter().all(|p| p.favorite && all.contains(p)));
    }

    #[test]
    fn results_match_the_search(seed in 0usize..40, text in "[a-z]{1,3}") {
        let store = PhraseStore::seeded(seed);
        for phrase in store.filter(&query(&text, false)) {
            prop_assert!(phrase.source.contains(&text) || phrase.translation.contains(&text));
        }
    }

    #[test]
    fn empty_search_returns_everything(seed in 0usize..40) {
        let store = PhraseStore::seeded(seed);
        prop_assert_eq!(store.filter(&query("", false)).len(), seed);
        prop_assert_eq!(store.filter(&query("", true)).len(), seed.div_ceil(3));
    }
}
