//! Text scoring capability.
//!
//! The pipeline only talks to [`TextScorer`]. [`LexiconScorer`] is the
//! built-in implementation: word-list sentiment plus term-frequency keywords,
//! with no model files or network access.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ScoringError;
use crate::models::{round4, KeywordWeight, SentimentResult, NEUTRAL_SCORE};

/// Sentiment scoring and keyword extraction.
///
/// Calls are synchronous and may be CPU heavy; the batch coordinator runs them
/// on blocking threads.
pub trait TextScorer: Send + Sync {
    fn score(&self, text: &str) -> Result<SentimentResult, ScoringError>;

    /// At most `top_k` keywords, heaviest first, every weight `>= 0`.
    fn extract_keywords(&self, text: &str, top_k: usize)
        -> Result<Vec<KeywordWeight>, ScoringError>;
}

/// Upper bound on keywords returned by a single extraction.
pub const MAX_KEYWORDS_PER_CALL: usize = 30;

static WORD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+(?:['’-][\p{L}\p{N}]+)*").expect("valid word pattern"));

static POSITIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    vec![
        "good", "great", "excellent", "amazing", "wonderful", "fantastic", "superb",
        "outstanding", "brilliant", "love", "loved", "loving", "best", "better",
        "positive", "happy", "joy", "joyful", "beautiful", "perfect", "awesome",
        "incredible", "magnificent", "delightful", "pleasant", "satisfying", "satisfied",
        "recommend", "recommended", "impressive", "exceptional", "remarkable", "success",
        "successful", "win", "winner", "winning", "efficient", "effective", "helpful",
        "reliable", "trustworthy", "quality", "valuable", "beneficial", "favorable",
        "thanks", "thank", "agree", "nice", "glad", "enjoy", "enjoyed", "fun", "cool",
    ]
    .into_iter()
    .collect()
});

static NEGATIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    vec![
        "bad", "terrible", "awful", "horrible", "poor", "worst", "worse", "hate",
        "hated", "hating", "dislike", "disappointing", "disappointed", "disappoints",
        "failure", "failed", "fail", "failing", "negative", "sad", "unhappy",
        "angry", "annoyed", "frustrated", "frustrating", "problem", "problems",
        "broken", "crash", "crashed", "wrong", "incorrect", "useless", "waste",
        "scam", "fraud", "fake", "unreliable", "unstable", "slow", "difficult",
        "complicated", "confusing", "expensive", "overpriced", "worthless", "garbage",
        "trash", "rubbish", "pathetic", "mediocre", "subpar", "inferior", "boring",
        "ugly", "stupid", "annoying", "disagree",
    ]
    .into_iter()
    .collect()
});

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    vec![
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had",
        "her", "was", "one", "our", "out", "has", "have", "him", "his", "how", "its",
        "let", "she", "too", "use", "that", "this", "with", "they", "them", "then",
        "than", "there", "their", "what", "when", "where", "which", "who", "why",
        "will", "would", "could", "should", "been", "being", "from", "into", "just",
        "like", "more", "most", "some", "such", "only", "also", "very", "about",
        "because", "if", "so", "it", "is", "in", "on", "at", "of", "to", "a", "an",
        "i", "me", "my", "we", "he", "be", "do", "does", "did", "or", "as", "by",
        "no", "yes", "your", "yours", "these", "those", "after", "before", "over",
        "really", "even", "still", "much", "many", "here", "now", "get", "got",
    ]
    .into_iter()
    .collect()
});

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
}

/// Word-list sentiment scorer with term-frequency keyword extraction.
#[derive(Debug, Default, Clone)]
pub struct LexiconScorer;

impl LexiconScorer {
    pub fn new() -> Self {
        Self
    }
}

impl TextScorer for LexiconScorer {
    fn score(&self, text: &str) -> Result<SentimentResult, ScoringError> {
        let mut positive = 0usize;
        let mut negative = 0usize;
        for token in tokens(text) {
            if POSITIVE_WORDS.contains(token.as_str()) {
                positive += 1;
            } else if NEGATIVE_WORDS.contains(token.as_str()) {
                negative += 1;
            }
        }

        if positive + negative == 0 {
            return Ok(SentimentResult::from_score(NEUTRAL_SCORE));
        }

        // Laplace smoothing keeps a single hit away from the 0/1 extremes.
        let score = (positive as f64 + 1.0) / ((positive + negative) as f64 + 2.0);
        Ok(SentimentResult::from_score(score))
    }

    fn extract_keywords(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<KeywordWeight>, ScoringError> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut total = 0usize;

        for token in tokens(text) {
            total += 1;
            if token.chars().count() < 3
                || STOPWORDS.contains(token.as_str())
                || token.chars().all(|c| c.is_numeric())
            {
                continue;
            }
            *counts.entry(token).or_insert(0) += 1;
        }

        if total == 0 {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(ranked
            .into_iter()
            .take(top_k.min(MAX_KEYWORDS_PER_CALL))
            .map(|(word, count)| KeywordWeight::new(word, round4(count as f64 / total as f64)))
            .collect())
    }
}
