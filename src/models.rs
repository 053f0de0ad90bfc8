//! Input records and analysis results.
//!
//! Field names follow the JSON layout written by the thread crawler and read
//! by the dashboard, so every type here round-trips through `serde_json`
//! unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Scores strictly above this are positive.
pub const POSITIVE_THRESHOLD: f64 = 0.6;
/// Scores strictly below this are negative.
pub const NEGATIVE_THRESHOLD: f64 = 0.4;
/// Score used whenever nothing better is known.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Rounds to the 4 decimal places used in every published score and weight.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// ---------------------------------------------------------------------------
// Input records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Author {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Post {
    #[serde(default)]
    pub post_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Comment {
    #[serde(default)]
    pub comment_id: String,
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub content: String,
    /// `YYYY-MM-DD HH:MM:SS`
    #[serde(default)]
    pub publish_time: String,
    #[serde(default)]
    pub like_count: u64,
}

/// One post plus its comments, the unit of analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Document {
    #[serde(default)]
    pub post: Post,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

// ---------------------------------------------------------------------------
// Sentiment primitives
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    /// Both thresholds are exclusive: 0.6 and 0.4 are neutral.
    pub fn for_score(score: f64) -> Self {
        if score > POSITIVE_THRESHOLD {
            SentimentLabel::Positive
        } else if score < NEGATIVE_THRESHOLD {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SentimentResult {
    pub score: f64,
    #[serde(rename = "sentiment")]
    pub label: SentimentLabel,
    pub intensity: f64,
}

impl SentimentResult {
    /// Builds a result whose label and intensity agree with `score`.
    ///
    /// The score is clamped into `[0, 1]` and rounded; non-finite input is
    /// treated as neutral.
    pub fn from_score(score: f64) -> Self {
        let score = if score.is_finite() {
            round4(score.clamp(0.0, 1.0))
        } else {
            NEUTRAL_SCORE
        };

        Self {
            score,
            label: SentimentLabel::for_score(score),
            intensity: round4((score - NEUTRAL_SCORE).abs() * 2.0),
        }
    }

    pub fn neutral() -> Self {
        Self::from_score(NEUTRAL_SCORE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct KeywordWeight {
    pub word: String,
    pub weight: f64,
}

impl KeywordWeight {
    pub fn new(word: impl Into<String>, weight: f64) -> Self {
        Self {
            word: word.into(),
            weight,
        }
    }
}

/// Label counts.
///
/// `merge` is plain addition per label, so any grouping or order of merges
/// gives the same counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SentimentDistribution {
    pub positive: u64,
    pub negative: u64,
    pub neutral: u64,
}

impl SentimentDistribution {
    pub fn record(&mut self, label: SentimentLabel) {
        match label {
            SentimentLabel::Positive => self.positive += 1,
            SentimentLabel::Negative => self.negative += 1,
            SentimentLabel::Neutral => self.neutral += 1,
        }
    }

    pub fn merge(&mut self, other: &SentimentDistribution) {
        self.positive += other.positive;
        self.negative += other.negative;
        self.neutral += other.neutral;
    }

    pub fn total(&self) -> u64 {
        self.positive + self.negative + self.neutral
    }
}

// ---------------------------------------------------------------------------
// Per-document analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PostInfo {
    pub post_id: String,
    pub title: String,
    pub sentiment: SentimentResult,
    pub keywords: Vec<KeywordWeight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CommentSentiment {
    #[serde(flatten)]
    pub sentiment: SentimentResult,
    pub comment_id: String,
    pub author_id: String,
    pub author_name: String,
    pub publish_time: String,
    pub like_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuthorSentiment {
    pub avg_score: f64,
    pub count: u64,
}

/// One point of the per-document sentiment time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TimePoint {
    pub time: String,
    /// Seconds since the Unix epoch, `publish_time` read as UTC.
    pub timestamp: i64,
    pub score: f64,
    #[serde(rename = "sentiment")]
    pub label: SentimentLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DocumentStatistics {
    /// Raw comment count, before filtering and capping.
    pub total_comments: u64,
    /// Comments that were scored.
    pub processed_comments: u64,
    pub avg_sentiment_score: f64,
    pub sentiment_distribution: SentimentDistribution,
}

/// Failures absorbed while analysing one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AnalysisDiagnostics {
    pub scoring_failures: u64,
    pub keyword_failures: u64,
    pub unparsed_times: u64,
    /// Non-empty comments beyond the processing cap.
    pub capped_comments: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PerDocumentAnalysis {
    pub post_info: PostInfo,
    pub overall_statistics: DocumentStatistics,
    pub comment_sentiments: Vec<CommentSentiment>,
    pub author_sentiments: BTreeMap<String, AuthorSentiment>,
    pub time_sentiments: Vec<TimePoint>,
    pub top_keywords: Vec<KeywordWeight>,
    #[serde(default)]
    pub diagnostics: AnalysisDiagnostics,
}

impl PerDocumentAnalysis {
    pub fn post_id(&self) -> &str {
        &self.post_info.post_id
    }

    pub fn avg_score(&self) -> f64 {
        self.overall_statistics.avg_sentiment_score
    }
}

// ---------------------------------------------------------------------------
// Corpus aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PostsBySentiment {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    pub neutral: Vec<String>,
}

impl PostsBySentiment {
    pub fn push(&mut self, label: SentimentLabel, post_id: String) {
        match label {
            SentimentLabel::Positive => self.positive.push(post_id),
            SentimentLabel::Negative => self.negative.push(post_id),
            SentimentLabel::Neutral => self.neutral.push(post_id),
        }
    }

    pub fn sort(&mut self) {
        self.positive.sort();
        self.negative.sort();
        self.neutral.sort();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CorpusStatistics {
    pub total_posts: u64,
    /// Sum of raw comment counts.
    pub total_comments: u64,
    /// Sum of scored comments; equals the distribution total.
    #[serde(default)]
    pub processed_comments: u64,
    pub avg_sentiment_score: f64,
    pub sentiment_distribution: SentimentDistribution,
    pub posts_by_sentiment: PostsBySentiment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CorpusAggregate {
    pub overall_statistics: CorpusStatistics,
    pub top_keywords: Vec<KeywordWeight>,
    /// In completion order of the batch run, which varies between runs.
    pub posts: Vec<PerDocumentAnalysis>,
}

impl CorpusAggregate {
    /// The result of analysing a corpus with no documents.
    pub fn empty() -> Self {
        Self {
            overall_statistics: CorpusStatistics {
                total_posts: 0,
                total_comments: 0,
                processed_comments: 0,
                avg_sentiment_score: NEUTRAL_SCORE,
                sentiment_distribution: SentimentDistribution::default(),
                posts_by_sentiment: PostsBySentiment::default(),
            },
            top_keywords: Vec::new(),
            posts: Vec::new(),
        }
    }

    pub fn find_post(&self, post_id: &str) -> Option<&PerDocumentAnalysis> {
        self.posts.iter().find(|post| post.post_id() == post_id)
    }
}
