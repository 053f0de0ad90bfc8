//! Fixtures shared by the unit tests.

use chrono::{Duration, NaiveDate};

use crate::models::{Author, Comment, Document, Post};

pub fn comment(id: &str, author_id: &str, content: &str, publish_time: &str) -> Comment {
    Comment {
        comment_id: id.to_string(),
        author: Author {
            id: author_id.to_string(),
            name: format!("user {author_id}"),
        },
        content: content.to_string(),
        publish_time: publish_time.to_string(),
        like_count: 1,
    }
}

/// A document whose i-th comment is written by `u{i}` one minute after the
/// previous one.
pub fn document(post_id: &str, post_content: &str, comments: &[&str]) -> Document {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap();

    Document {
        post: Post {
            post_id: post_id.to_string(),
            title: format!("post {post_id}"),
            content: post_content.to_string(),
        },
        comments: comments
            .iter()
            .enumerate()
            .map(|(i, content)| {
                let at = start + Duration::minutes(i as i64);
                comment(
                    &format!("{post_id}-c{i}"),
                    &format!("u{i}"),
                    content,
                    &at.format("%Y-%m-%d %H:%M:%S").to_string(),
                )
            })
            .collect(),
    }
}
