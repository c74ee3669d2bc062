use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::platform::types::{
    ApiIssueComment, ApiPullRequest, ApiReviewComment, ApiUser, Author, Channel, Comment,
    PullRequestDiscussion,
};

pub const MAIN_CHANNEL_TITLE: &str = "Main";

/// Build a discussion snapshot from the pull request and its two comment feeds.
///
/// The Main channel holds the description followed by the issue comments in
/// API order. Review comments are threaded in a single left-to-right pass: a
/// comment whose `in_reply_to_id` names an existing channel joins it, any
/// other comment roots a new channel. No sorting is applied.
pub fn aggregate(
    pr: &ApiPullRequest,
    issue_comments: Vec<ApiIssueComment>,
    review_comments: Vec<ApiReviewComment>,
    current_login: Option<&str>,
) -> PullRequestDiscussion {
    let id = pr.id.to_string();
    let author = map_author(&pr.user);
    let created_at = normalize_timestamp(&pr.created_at);
    let body_text = pr.body.clone().unwrap_or_default();

    let description = Comment {
        id: id.clone(),
        body_text: body_text.clone(),
        created_at,
        author: author.clone(),
        in_reply_to_id: None,
        can_delete: false,
    };

    let mut main_comments = Vec::with_capacity(issue_comments.len() + 1);
    main_comments.push(description);
    main_comments.extend(
        issue_comments
            .into_iter()
            .map(|c| map_issue_comment(c, current_login)),
    );

    let mut channels = Vec::new();
    channels.push(Channel {
        key: id.clone(),
        title: MAIN_CHANNEL_TITLE.to_string(),
        is_review: false,
        comments: main_comments,
    });
    channels.extend(thread_review_comments(review_comments, current_login));

    PullRequestDiscussion {
        id,
        body_text,
        title: pr.title.clone(),
        author,
        created_at,
        channels,
    }
}

fn thread_review_comments(
    review_comments: Vec<ApiReviewComment>,
    current_login: Option<&str>,
) -> Vec<Channel> {
    let mut channels: Vec<Channel> = Vec::new();
    let mut by_root: HashMap<String, usize> = HashMap::new();

    for raw in review_comments {
        let parent = raw.in_reply_to_id.map(|id| id.to_string());
        let title = file_name(&raw.path).to_string();
        let comment = map_review_comment(raw, current_login);

        match parent.as_deref().and_then(|p| by_root.get(p)) {
            Some(&index) => channels[index].comments.push(comment),
            None => {
                by_root.insert(comment.id.clone(), channels.len());
                channels.push(Channel {
                    key: comment.id.clone(),
                    title,
                    is_review: true,
                    comments: vec![comment],
                });
            }
        }
    }

    channels
}

fn map_author(user: &ApiUser) -> Author {
    Author {
        login: user.login.clone(),
        avatar_url: user.avatar_url.clone(),
    }
}

fn can_delete(author: &Author, current_login: Option<&str>) -> bool {
    current_login.is_some_and(|login| author.login == login)
}

fn map_issue_comment(comment: ApiIssueComment, current_login: Option<&str>) -> Comment {
    let author = map_author(&comment.user);
    Comment {
        id: comment.id.to_string(),
        body_text: comment.body.unwrap_or_default(),
        created_at: normalize_timestamp(&comment.created_at),
        can_delete: can_delete(&author, current_login),
        author,
        in_reply_to_id: None,
    }
}

fn map_review_comment(comment: ApiReviewComment, current_login: Option<&str>) -> Comment {
    let author = map_author(&comment.user);
    Comment {
        id: comment.id.to_string(),
        body_text: comment.body.unwrap_or_default(),
        created_at: normalize_timestamp(&comment.created_at),
        can_delete: can_delete(&author, current_login),
        author,
        in_reply_to_id: comment.in_reply_to_id.map(|id| id.to_string()),
    }
}

/// Final path segment, accepting either separator.
fn file_name(path: &str) -> &str {
    path.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(path)
}

/// Unparseable timestamps fall back to the Unix epoch rather than failing
/// the whole snapshot.
fn normalize_timestamp(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(e) => {
            tracing::warn!(timestamp = raw, error = %e, "Unparseable timestamp");
            DateTime::<Utc>::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn user(login: &str) -> ApiUser {
        ApiUser {
            login: login.to_string(),
            avatar_url: format!("https://avatars.example.com/{login}"),
            name: None,
        }
    }

    fn pull_request() -> ApiPullRequest {
        ApiPullRequest {
            id: 1,
            body: Some("body".to_string()),
            title: "title".to_string(),
            created_at: "1970-01-01T00:00:00Z".to_string(),
            user: user("login"),
        }
    }

    fn issue_comment(id: u64, login: &str) -> ApiIssueComment {
        ApiIssueComment {
            id,
            body: Some(format!("issue comment {id}")),
            created_at: "1970-01-01T00:00:00.001Z".to_string(),
            user: user(login),
        }
    }

    fn review_comment(id: u64, reply_to: Option<u64>, path: &str, login: &str) -> ApiReviewComment {
        ApiReviewComment {
            id,
            body: Some(format!("review comment {id}")),
            created_at: "1970-01-01T00:00:00.002Z".to_string(),
            user: user(login),
            in_reply_to_id: reply_to,
            path: path.to_string(),
        }
    }

    fn keys(discussion: &PullRequestDiscussion) -> Vec<&str> {
        discussion.channels.iter().map(|c| c.key.as_str()).collect()
    }

    #[test]
    fn test_main_channel_starts_with_description() {
        let result = aggregate(&pull_request(), vec![issue_comment(100, "login")], vec![], Some("login"));

        let main = &result.channels[0];
        assert_eq!(main.key, "1");
        assert_eq!(main.title, "Main");
        assert!(!main.is_review);
        assert_eq!(main.comments.len(), 2);
        assert_eq!(main.comments[0].id, "1");
        assert_eq!(main.comments[0].body_text, "body");
        assert!(!main.comments[0].can_delete, "description is never deletable");
        assert_eq!(main.comments[1].id, "100");
        assert!(main.comments[1].can_delete);
    }

    #[test]
    fn test_review_threads_preserve_first_seen_order() {
        let result = aggregate(
            &pull_request(),
            vec![],
            vec![
                review_comment(10, None, "src/lib.rs", "a"),
                review_comment(11, Some(10), "src/lib.rs", "b"),
                review_comment(12, None, "README.md", "c"),
            ],
            None,
        );

        assert_eq!(keys(&result), vec!["1", "10", "12"]);
        let first = &result.channels[1];
        assert!(first.is_review);
        assert_eq!(first.title, "lib.rs");
        let ids: Vec<&str> = first.comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["10", "11"]);
        assert_eq!(first.comments[1].in_reply_to_id.as_deref(), Some("10"));
        assert_eq!(result.channels[2].comments.len(), 1);
    }

    #[test]
    fn test_unresolved_reply_becomes_root() {
        // Reply arrives before its parent: no second pass, so it roots a channel.
        let result = aggregate(
            &pull_request(),
            vec![],
            vec![
                review_comment(21, Some(20), "a/b.rs", "x"),
                review_comment(20, None, "a/b.rs", "x"),
            ],
            None,
        );

        assert_eq!(keys(&result), vec!["1", "21", "20"]);
    }

    #[test]
    fn test_reply_to_reply_roots_new_channel() {
        let result = aggregate(
            &pull_request(),
            vec![],
            vec![
                review_comment(30, None, "x.rs", "x"),
                review_comment(31, Some(30), "x.rs", "x"),
                review_comment(32, Some(31), "x.rs", "x"),
            ],
            None,
        );

        assert_eq!(keys(&result), vec!["1", "30", "32"]);
    }

    #[test]
    fn test_every_comment_in_exactly_one_channel() {
        let reviews = vec![
            review_comment(40, None, "a.rs", "x"),
            review_comment(41, Some(40), "a.rs", "y"),
            review_comment(42, None, "b.rs", "x"),
            review_comment(43, Some(42), "b.rs", "y"),
            review_comment(44, Some(99), "c.rs", "y"),
        ];
        let issues = vec![issue_comment(100, "x"), issue_comment(101, "y")];
        let result = aggregate(&pull_request(), issues, reviews, Some("x"));

        let mut seen = HashSet::new();
        let mut total = 0;
        for channel in &result.channels {
            for comment in &channel.comments {
                assert!(seen.insert(comment.id.clone()), "duplicate {}", comment.id);
                total += 1;
            }
        }
        assert_eq!(total, 1 + 2 + 5);
        assert!(!result.channels[0].is_review);
        assert!(result.channels[1..].iter().all(|c| c.is_review));
    }

    #[test]
    fn test_can_delete_is_exact_login_match() {
        let result = aggregate(
            &pull_request(),
            vec![issue_comment(100, "Login"), issue_comment(101, "login")],
            vec![review_comment(50, None, "f.rs", "login")],
            Some("login"),
        );

        let main = &result.channels[0];
        assert!(!main.comments[0].can_delete);
        assert!(!main.comments[1].can_delete, "match is case-sensitive");
        assert!(main.comments[2].can_delete);
        assert!(result.channels[1].comments[0].can_delete);
    }

    #[test]
    fn test_timestamps_are_normalized() {
        let result = aggregate(&pull_request(), vec![issue_comment(1, "x")], vec![], None);
        assert_eq!(result.created_at, DateTime::<Utc>::default());
        assert_eq!(result.channels[0].comments[1].created_at.timestamp_millis(), 1);

        let mut pr = pull_request();
        pr.created_at = "not a date".to_string();
        assert_eq!(aggregate(&pr, vec![], vec![], None).created_at, DateTime::<Utc>::default());
    }

    #[test]
    fn test_file_name_handles_both_separators() {
        assert_eq!(file_name("src/platform/mod.rs"), "mod.rs");
        assert_eq!(file_name(r"src\main.rs"), "main.rs");
        assert_eq!(file_name("Readme.md"), "Readme.md");
    }
}
