//! Trait classification of dialogue text and personality blending.

use crate::storage::TraitScores;

/// Scores free text against a fixed label set.
///
/// An empty map means "no usable result" and callers leave their state
/// untouched. Runs on the tick thread at session close, so implementations
/// must be cheap and must not block.
pub trait TraitClassifier: Send + Sync {
    fn classify(&self, text: &str, labels: &[String]) -> TraitScores;
}

/// Keyword-hit classifier. Scores are each label's share of all hits, so
/// they sum to 1 whenever anything matched.
pub struct LexiconClassifier {
    lexicon: Vec<(String, Vec<&'static str>)>,
}

impl Default for LexiconClassifier {
    fn default() -> Self {
        let lexicon = vec![
            (
                "Annoyed",
                vec![
                    "annoy", "annoying", "shut up", "stupid", "dumb", "hate", "go away",
                    "stop", "ugh", "boring", "idiot", "leave me", "angry", "whatever",
                ],
            ),
            (
                "Intelligent",
                vec![
                    "why", "because", "think", "explain", "science", "math", "idea", "learn",
                    "smart", "theory", "reason", "book",
                ],
            ),
            (
                "Curious",
                vec![
                    "what", "how", "where", "wonder", "curious", "?", "explore", "new",
                    "discover", "tell me", "interesting",
                ],
            ),
            (
                "Brave",
                vec![
                    "brave", "fight", "danger", "hawk", "cat", "fearless", "adventure", "bold",
                    "storm", "protect", "courage",
                ],
            ),
            (
                "Lazy",
                vec![
                    "sleep", "nap", "tired", "lazy", "rest", "later", "relax", "bed", "slow",
                    "chill", "couch",
                ],
            ),
            (
                "Friendly",
                vec![
                    "hi", "hello", "friend", "thanks", "thank you", "love", "nice", "cute",
                    "sweet", "buddy", "please", "happy",
                ],
            ),
        ];
        Self {
            lexicon: lexicon
                .into_iter()
                .map(|(label, words)| (label.to_string(), words))
                .collect(),
        }
    }
}

impl LexiconClassifier {
    fn keywords(&self, label: &str) -> &[&'static str] {
        self.lexicon
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(label))
            .map(|(_, words)| words.as_slice())
            .unwrap_or(&[])
    }
}

impl TraitClassifier for LexiconClassifier {
    fn classify(&self, text: &str, labels: &[String]) -> TraitScores {
        let text = text.to_lowercase();
        if text.trim().is_empty() {
            return TraitScores::new();
        }
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .collect();

        let mut hits: Vec<(String, usize)> = Vec::with_capacity(labels.len());
        for label in labels {
            let count = self
                .keywords(label)
                .iter()
                .map(|keyword| count_matches(&text, &words, keyword))
                .sum();
            hits.push((label.clone(), count));
        }

        let total: usize = hits.iter().map(|(_, count)| count).sum();
        if total == 0 {
            return TraitScores::new();
        }
        hits.into_iter()
            .map(|(label, count)| (label, count as f32 / total as f32))
            .collect()
    }
}

/// Single words match whole tokens; phrases and punctuation match substrings.
fn count_matches(text: &str, words: &[&str], keyword: &str) -> usize {
    let is_word = keyword.chars().all(|c| c.is_alphanumeric());
    if is_word {
        words.iter().filter(|w| **w == keyword).count()
    } else {
        text.matches(keyword).count()
    }
}

/// Alpha-blends fresh scores into prior ones: `prior * (1 - w) + new * w`.
/// Labels missing from `prior` start at 0. Labels only in `prior` keep
/// their value.
pub fn blend_traits(prior: Option<&TraitScores>, fresh: &TraitScores, weight: f32) -> TraitScores {
    let weight = weight.clamp(0.0, 1.0);
    let mut blended = prior.cloned().unwrap_or_default();
    for (label, &score) in fresh {
        let old = blended.get(label).copied().unwrap_or(0.0);
        let value = old * (1.0 - weight) + score.clamp(0.0, 1.0) * weight;
        blended.insert(label.clone(), value);
    }
    blended
}

/// Highest-scoring label. Ties resolve to the label that sorts first.
/// A map with no positive score has no dominant label.
pub fn dominant_personality(scores: &TraitScores) -> Option<&str> {
    let mut best: Option<(&str, f32)> = None;
    for (label, &score) in scores {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((label.as_str(), score)),
        }
    }
    best.filter(|(_, score)| *score > 0.0).map(|(label, _)| label)
}
