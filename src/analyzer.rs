//! Analysis of a single document.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::error::TimeParseError;
use crate::models::{
    AnalysisDiagnostics, AuthorSentiment, CommentSentiment, Document, DocumentStatistics,
    KeywordWeight, PerDocumentAnalysis, PostInfo, SentimentDistribution, SentimentResult,
    TimePoint,
};
use crate::scorer::TextScorer;
use crate::tally::{FixedSum, WeightMap};

/// Text longer than this many characters is cut before scoring.
pub const SCORE_TEXT_CAP: usize = 2000;
/// Text longer than this many characters is cut before keyword extraction.
pub const KEYWORD_TEXT_CAP: usize = 5000;
/// Only the first non-empty comments up to this count are analysed.
pub const MAX_PROCESSED_COMMENTS: usize = 100;
/// Keywords requested from each extraction call.
pub const KEYWORDS_PER_EXTRACTION: usize = 20;
/// Keywords kept per document after merging post and comment keywords.
pub const DOCUMENT_TOP_KEYWORDS: usize = 30;

pub const PUBLISH_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Cuts `text` to at most `cap` characters, on a character boundary.
pub fn truncate_chars(text: &str, cap: usize) -> &str {
    match text.char_indices().nth(cap) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Parses a `publish_time` into seconds since the epoch, reading it as UTC.
pub fn parse_publish_time(value: &str) -> Result<i64, TimeParseError> {
    NaiveDateTime::parse_from_str(value, PUBLISH_TIME_FORMAT)
        .map(|time| time.and_utc().timestamp())
        .map_err(|source| TimeParseError {
            value: value.to_string(),
            source,
        })
}

/// Turns one [`Document`] into a [`PerDocumentAnalysis`].
///
/// Never fails: scorer errors degrade to the neutral result and are counted
/// in the analysis diagnostics.
pub struct DocumentAnalyzer {
    scorer: Arc<dyn TextScorer>,
}

impl DocumentAnalyzer {
    pub fn new(scorer: Arc<dyn TextScorer>) -> Self {
        Self { scorer }
    }

    pub fn analyze(&self, doc: &Document) -> PerDocumentAnalysis {
        let mut diagnostics = AnalysisDiagnostics::default();
        let post_id = doc.post.post_id.as_str();

        let post_sentiment = self.score(post_id, &doc.post.content, &mut diagnostics);
        let post_keywords = self.keywords(
            post_id,
            &doc.post.content,
            KEYWORDS_PER_EXTRACTION,
            &mut diagnostics,
        );

        let non_empty: Vec<_> = doc
            .comments
            .iter()
            .filter(|c| !c.content.trim().is_empty())
            .collect();
        let processed = &non_empty[..non_empty.len().min(MAX_PROCESSED_COMMENTS)];
        diagnostics.capped_comments = (non_empty.len() - processed.len()) as u64;

        let comment_text = processed
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let comment_keywords = self.keywords(
            post_id,
            &comment_text,
            KEYWORDS_PER_EXTRACTION,
            &mut diagnostics,
        );

        let mut comment_sentiments = Vec::with_capacity(processed.len());
        let mut comment_scores = FixedSum::default();
        let mut distribution = SentimentDistribution::default();
        let mut by_author: BTreeMap<String, FixedSum> = BTreeMap::new();
        let mut time_sentiments = Vec::new();

        for comment in processed {
            let sentiment = self.score(post_id, &comment.content, &mut diagnostics);

            comment_scores.add(sentiment.score);
            distribution.record(sentiment.label);

            if !comment.author.id.is_empty() {
                by_author
                    .entry(comment.author.id.clone())
                    .or_default()
                    .add(sentiment.score);
            }

            if !comment.publish_time.is_empty() {
                match parse_publish_time(&comment.publish_time) {
                    Ok(timestamp) => time_sentiments.push(TimePoint {
                        time: comment.publish_time.clone(),
                        timestamp,
                        score: sentiment.score,
                        label: sentiment.label,
                    }),
                    Err(e) => {
                        diagnostics.unparsed_times += 1;
                        debug!(
                            "Post {}: comment {} left out of time series: {}",
                            post_id, comment.comment_id, e
                        );
                    }
                }
            }

            comment_sentiments.push(CommentSentiment {
                sentiment,
                comment_id: comment.comment_id.clone(),
                author_id: comment.author.id.clone(),
                author_name: comment.author.name.clone(),
                publish_time: comment.publish_time.clone(),
                like_count: comment.like_count,
            });
        }

        time_sentiments.sort_by_key(|point| point.timestamp);

        let author_sentiments = by_author
            .into_iter()
            .filter_map(|(author, sum)| {
                sum.mean().map(|avg_score| {
                    (
                        author,
                        AuthorSentiment {
                            avg_score,
                            count: sum.count(),
                        },
                    )
                })
            })
            .collect();

        let mut merged = WeightMap::new();
        merged.extend(&post_keywords);
        merged.extend(&comment_keywords);

        let avg_sentiment_score = comment_scores.mean().unwrap_or(post_sentiment.score);

        debug_assert_eq!(distribution.total(), processed.len() as u64);

        PerDocumentAnalysis {
            post_info: PostInfo {
                post_id: doc.post.post_id.clone(),
                title: doc.post.title.clone(),
                sentiment: post_sentiment,
                keywords: post_keywords,
            },
            overall_statistics: DocumentStatistics {
                total_comments: doc.comments.len() as u64,
                processed_comments: processed.len() as u64,
                avg_sentiment_score,
                sentiment_distribution: distribution,
            },
            comment_sentiments,
            author_sentiments,
            time_sentiments,
            top_keywords: merged.top(DOCUMENT_TOP_KEYWORDS),
            diagnostics,
        }
    }

    fn score(
        &self,
        post_id: &str,
        text: &str,
        diagnostics: &mut AnalysisDiagnostics,
    ) -> SentimentResult {
        if text.trim().is_empty() {
            return SentimentResult::neutral();
        }

        match self.scorer.score(truncate_chars(text, SCORE_TEXT_CAP)) {
            // Label and intensity always follow from the clamped score.
            Ok(result) => SentimentResult::from_score(result.score),
            Err(e) => {
                diagnostics.scoring_failures += 1;
                warn!("Post {}: {}; using neutral sentiment", post_id, e);
                SentimentResult::neutral()
            }
        }
    }

    fn keywords(
        &self,
        post_id: &str,
        text: &str,
        top_k: usize,
        diagnostics: &mut AnalysisDiagnostics,
    ) -> Vec<KeywordWeight> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        match self
            .scorer
            .extract_keywords(truncate_chars(text, KEYWORD_TEXT_CAP), top_k)
        {
            Ok(mut keywords) => {
                keywords.truncate(top_k);
                keywords
            }
            Err(e) => {
                diagnostics.keyword_failures += 1;
                warn!("Post {}: keyword extraction failed: {}", post_id, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::models::SentimentLabel;
    use crate::scorer::test_support::ScriptedScorer;
    use crate::testing::{comment, document};

    fn analyzer() -> (Arc<ScriptedScorer>, DocumentAnalyzer) {
        let scorer = Arc::new(ScriptedScorer::new());
        (scorer.clone(), DocumentAnalyzer::new(scorer))
    }

    #[test]
    fn test_three_comment_scenario() {
        let (_, analyzer) = analyzer();
        let doc = document("p1", "s=0.9 launch", &["s=0.8 great", "s=0.3 awful", "s=0.5 meh"]);

        let analysis = analyzer.analyze(&doc);
        let stats = &analysis.overall_statistics;

        assert_eq!(stats.total_comments, 3);
        assert_eq!(stats.processed_comments, 3);
        assert_eq!(stats.avg_sentiment_score, 0.5333);
        assert_eq!(
            stats.sentiment_distribution,
            SentimentDistribution { positive: 1, negative: 1, neutral: 1 }
        );
        assert_eq!(analysis.post_info.sentiment.label, SentimentLabel::Positive);
        assert_eq!(analysis.comment_sentiments[1].sentiment.label, SentimentLabel::Negative);
        assert_eq!(analysis.comment_sentiments[1].author_id, "u1");
        assert_eq!(analysis.comment_sentiments[1].comment_id, "p1-c1");
    }

    #[test]
    fn test_no_processed_comments_falls_back_to_post_score() {
        let (_, analyzer) = analyzer();
        let doc = document("p1", "s=0.72 post", &["   ", ""]);

        let analysis = analyzer.analyze(&doc);

        assert_eq!(analysis.overall_statistics.total_comments, 2);
        assert_eq!(analysis.overall_statistics.processed_comments, 0);
        assert_eq!(analysis.overall_statistics.avg_sentiment_score, 0.72);
        assert_eq!(analysis.overall_statistics.sentiment_distribution.total(), 0);
        assert!(analysis.comment_sentiments.is_empty());
    }

    #[test]
    fn test_comment_cap_counts_raw_total() {
        let (scorer, analyzer) = analyzer();
        let texts: Vec<String> = (0..130).map(|i| format!("s=0.7 w{i}")).collect();
        let mut refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        refs.insert(5, "");

        let analysis = analyzer.analyze(&document("p1", "", &refs));
        let stats = &analysis.overall_statistics;

        assert_eq!(stats.total_comments, 131);
        assert_eq!(stats.processed_comments, MAX_PROCESSED_COMMENTS as u64);
        assert_eq!(stats.sentiment_distribution.total(), MAX_PROCESSED_COMMENTS as u64);
        assert_eq!(analysis.diagnostics.capped_comments, 30);
        // empty post content is never sent to the scorer
        assert_eq!(scorer.score_calls.load(Ordering::SeqCst), MAX_PROCESSED_COMMENTS);

        let keyword_input = scorer.last_keyword_input.lock().unwrap().clone();
        assert!(keyword_input.contains("w99"));
        assert!(!keyword_input.contains("w100"));
    }

    #[test]
    fn test_scoring_failure_degrades_to_neutral() {
        let (_, analyzer) = analyzer();
        let doc = document("p1", "!fail", &["s=0.9 ok", "!fail s=0.9"]);

        let analysis = analyzer.analyze(&doc);

        assert_eq!(analysis.post_info.sentiment, SentimentResult::neutral());
        assert_eq!(analysis.comment_sentiments[1].sentiment, SentimentResult::neutral());
        assert_eq!(analysis.diagnostics.scoring_failures, 2);
        assert_eq!(analysis.overall_statistics.avg_sentiment_score, 0.7);
    }

    #[test]
    fn test_keyword_failure_keeps_document() {
        let (_, analyzer) = analyzer();
        let doc = document("p1", "alpha alpha", &["!kwfail beta"]);

        let analysis = analyzer.analyze(&doc);

        assert_eq!(analysis.diagnostics.keyword_failures, 1);
        assert_eq!(analysis.top_keywords, vec![KeywordWeight::new("alpha", 2.0)]);
    }

    #[test]
    fn test_keywords_merge_additively() {
        let (scorer, analyzer) = analyzer();
        let doc = document("p1", "rust rust tokio", &["rust serde", "serde"]);

        let analysis = analyzer.analyze(&doc);

        assert_eq!(
            analysis.top_keywords,
            vec![
                KeywordWeight::new("rust", 3.0),
                KeywordWeight::new("serde", 2.0),
                KeywordWeight::new("tokio", 1.0),
            ]
        );
        // one call for the post, one for the whole comment batch
        assert_eq!(scorer.keyword_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_author_averages_skip_anonymous() {
        let (_, analyzer) = analyzer();
        let mut doc = document("p1", "", &[]);
        doc.comments = vec![
            comment("c1", "alice", "s=0.8", "2024-01-01 10:00:00"),
            comment("c2", "alice", "s=0.4", "2024-01-01 10:01:00"),
            comment("c3", "", "s=0.1", "2024-01-01 10:02:00"),
        ];

        let analysis = analyzer.analyze(&doc);

        assert_eq!(analysis.author_sentiments.len(), 1);
        let alice = &analysis.author_sentiments["alice"];
        assert_eq!(alice.count, 2);
        assert_eq!(alice.avg_score, 0.6);
    }

    #[test]
    fn test_time_series_sorted_and_bad_times_dropped() {
        let (_, analyzer) = analyzer();
        let mut doc = document("p1", "", &[]);
        doc.comments = vec![
            comment("late", "a", "s=0.9", "2024-03-01 12:00:00"),
            comment("bad", "b", "s=0.1", "yesterday"),
            comment("early", "c", "s=0.2", "2023-12-31 23:59:59"),
            comment("untimed", "d", "s=0.5", ""),
        ];

        let analysis = analyzer.analyze(&doc);

        let times: Vec<&str> = analysis.time_sentiments.iter().map(|p| p.time.as_str()).collect();
        assert_eq!(times, vec!["2023-12-31 23:59:59", "2024-03-01 12:00:00"]);
        assert_eq!(analysis.time_sentiments[0].timestamp, 1_704_067_199);
        assert_eq!(analysis.diagnostics.unparsed_times, 1);
        // the unparsable comment still counts everywhere else
        assert_eq!(analysis.overall_statistics.processed_comments, 4);
        assert_eq!(analysis.overall_statistics.sentiment_distribution.negative, 2);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("短文本测试", 3), "短文本");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn test_long_post_is_truncated_before_scoring() {
        let (scorer, analyzer) = analyzer();
        let long = format!("{} s=0.1", "x".repeat(SCORE_TEXT_CAP));

        let analysis = analyzer.analyze(&document("p1", &long, &[]));

        // the marker sits past the cap, so the scorer never sees it
        assert_eq!(analysis.post_info.sentiment.score, 0.5);
        assert_eq!(scorer.score_calls.load(Ordering::SeqCst), 1);
        let keyword_input = scorer.last_keyword_input.lock().unwrap().clone();
        assert_eq!(keyword_input.chars().count(), long.chars().count());
    }

    #[test]
    fn test_parse_publish_time() {
        assert_eq!(parse_publish_time("1970-01-01 00:01:00").unwrap(), 60);
        let err = parse_publish_time("2024/01/01 00:00").unwrap_err();
        assert_eq!(err.value, "2024/01/01 00:00");
    }
}
