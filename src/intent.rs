//! Deterministic keyword-scored classifier over a fixed intent set.

use crate::types::Intent;

const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
    (Intent::Debug, &["debug", "fix", "broken", "fail", "error", "bug", "issue", "wrong"]),
    (Intent::AddFeature, &["add", "new", "create", "implement", "build", "feature", "metric"]),
    (Intent::Refactor, &["refactor", "clean", "simplify", "restructure", "rename", "split", "consolidate"]),
    (Intent::Test, &["test", "assert", "validate", "coverage", "check"]),
    (Intent::Document, &["document", "describe", "explain", "comment", "doc"]),
    (Intent::Explore, &["explore", "understand", "what", "how", "show", "find"]),
];

/// Score = number of keyword substring hits (case-insensitive). The
/// label with the strictly-highest score wins; ties resolve by the
/// order intents are listed above; zero hits falls back to `explore`.
pub fn detect_intent(task: &str) -> Intent {
    let lower = task.to_lowercase();
    let mut best = Intent::Explore;
    let mut best_score = 0usize;

    for (intent, keywords) in INTENT_KEYWORDS {
        let score = keywords.iter().filter(|kw| lower.contains(*kw)).count();
        if score > best_score {
            best_score = score;
            best = *intent;
        }
    }

    if best_score == 0 {
        Intent::Explore
    } else {
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_debug_task() {
        assert_eq!(detect_intent("debug failing test on fct_orders"), Intent::Debug);
    }

    #[test]
    fn classifies_add_feature_task() {
        assert_eq!(detect_intent("add monthly revenue metric"), Intent::AddFeature);
    }

    #[test]
    fn falls_back_to_explore_on_zero_hits() {
        assert_eq!(detect_intent("xyzzy gobbledygook"), Intent::Explore);
    }
}
