use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a comment writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub login: String,
    pub avatar_url: String,
}

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub login: String,
    pub avatar_url: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub body_text: String,
    pub created_at: DateTime<Utc>,
    pub author: Author,
    pub in_reply_to_id: Option<String>,
    /// True iff the author is the locally cached current user.
    pub can_delete: bool,
}

/// A named, ordered thread of comments: the Main discussion or one review thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub key: String,
    pub title: String,
    pub is_review: bool,
    pub comments: Vec<Comment>,
}

impl Channel {
    /// Copy of this channel without the given comment.
    pub fn without_comment(&self, comment_id: &str) -> Channel {
        Channel {
            key: self.key.clone(),
            title: self.title.clone(),
            is_review: self.is_review,
            comments: self
                .comments
                .iter()
                .filter(|c| c.id != comment_id)
                .cloned()
                .collect(),
        }
    }
}

/// One immutable snapshot of a pull request's discussion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestDiscussion {
    pub id: String,
    pub body_text: String,
    pub title: String,
    pub author: Author,
    pub created_at: DateTime<Utc>,
    /// `[Main, ...review channels in first-seen order]`.
    pub channels: Vec<Channel>,
}

impl PullRequestDiscussion {
    pub fn channel(&self, key: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.key == key)
    }

    pub fn first_channel_key(&self) -> Option<&str> {
        self.channels.first().map(|c| c.key.as_str())
    }

    /// New snapshot with `comment_id` filtered out of the channel `channel_key`.
    /// Other channels are left alone: issue and review comment ids are
    /// separate id spaces.
    pub fn without_comment(&self, channel_key: &str, comment_id: &str) -> PullRequestDiscussion {
        PullRequestDiscussion {
            channels: self
                .channels
                .iter()
                .map(|c| {
                    if c.key == channel_key {
                        c.without_comment(comment_id)
                    } else {
                        c.clone()
                    }
                })
                .collect(),
            ..self.clone()
        }
    }
}

/// Where a new comment goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub key: String,
    pub is_review: bool,
}

impl From<&Channel> for ChannelTarget {
    fn from(channel: &Channel) -> Self {
        Self {
            key: channel.key.clone(),
            is_review: channel.is_review,
        }
    }
}

// --- Wire payloads ---

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiPullRequest {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_at: String,
    pub user: ApiUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiIssueComment {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub created_at: String,
    pub user: ApiUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiReviewComment {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub created_at: String,
    pub user: ApiUser,
    #[serde(default)]
    pub in_reply_to_id: Option<u64>,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct CommentBody<'a> {
    pub body: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn comment(id: &str) -> Comment {
        Comment {
            id: id.to_string(),
            body_text: String::new(),
            created_at: Utc::now(),
            author: Author {
                login: "octocat".to_string(),
                avatar_url: String::new(),
            },
            in_reply_to_id: None,
            can_delete: true,
        }
    }

    fn channel(key: &str, is_review: bool, ids: &[&str]) -> Channel {
        Channel {
            key: key.to_string(),
            title: key.to_string(),
            is_review,
            comments: ids.iter().map(|id| comment(id)).collect(),
        }
    }

    #[test]
    fn test_without_comment_only_touches_named_channel() {
        let discussion = PullRequestDiscussion {
            id: "100".to_string(),
            body_text: String::new(),
            title: "Title".to_string(),
            author: comment("100").author,
            created_at: Utc::now(),
            channels: vec![
                channel("100", false, &["100", "5"]),
                channel("5", true, &["5", "6"]),
            ],
        };

        let pruned = discussion.without_comment("5", "5");

        let ids = |c: &Channel| c.comments.iter().map(|c| c.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&pruned.channels[0]), vec!["100", "5"]);
        assert_eq!(ids(&pruned.channels[1]), vec!["6"]);
        assert_eq!(pruned.channels.len(), 2);
    }
}
