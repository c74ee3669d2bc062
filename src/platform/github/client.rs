use std::sync::Arc;

use async_trait::async_trait;

use crate::config::GitHubConfig;
use crate::error::Result;
use crate::platform::types::*;
use crate::platform::ReviewPlatform;
use crate::store::{TokenStore, LOGIN_KEY};

use super::http::ApiClient;
use super::locator::DiscussionLocation;
use super::mapper;

/// GitHub REST implementation of [`ReviewPlatform`].
pub struct GitHubPlatform {
    api: ApiClient,
    store: Arc<dyn TokenStore>,
    review_page_size: u32,
}

impl GitHubPlatform {
    pub fn new(config: &GitHubConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
        let api = ApiClient::new(&config.api_base, Arc::clone(&store), config.max_pages)?;
        Ok(Self {
            api,
            store,
            review_page_size: config.review_page_size,
        })
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    fn repo_path(location: &DiscussionLocation) -> String {
        format!("repos/{}/{}", location.owner, location.repo)
    }
}

#[async_trait]
impl ReviewPlatform for GitHubPlatform {
    async fn current_user(&self) -> Result<User> {
        let user: ApiUser = self.api.get_json("user").await?;
        self.store.set(LOGIN_KEY, &user.login).await?;

        tracing::info!(login = %user.login, "Signed in");

        Ok(User {
            login: user.login,
            avatar_url: user.avatar_url,
            name: user.name,
        })
    }

    async fn get_discussion(
        &self,
        location: &DiscussionLocation,
    ) -> Result<PullRequestDiscussion> {
        let repo = Self::repo_path(location);
        let number = location.number;

        let pull_path = format!("{repo}/pulls/{number}");
        let issue_comments_path = format!("{repo}/issues/{number}/comments");
        let review_comments_path = format!(
            "{repo}/pulls/{number}/comments?per_page={}",
            self.review_page_size
        );

        let (pr, issue_comments, review_comments) = tokio::try_join!(
            self.api.get_json::<ApiPullRequest>(&pull_path),
            self.api.fetch_all::<ApiIssueComment>(&issue_comments_path),
            self.api.fetch_all::<ApiReviewComment>(&review_comments_path),
        )?;

        let current_login = self.store.get(LOGIN_KEY).await?;
        let discussion = mapper::aggregate(
            &pr,
            issue_comments,
            review_comments,
            current_login.as_deref(),
        );

        tracing::info!(
            discussion = %location,
            id = %discussion.id,
            channels = discussion.channels.len(),
            "Discussion fetched"
        );

        Ok(discussion)
    }

    async fn create_comment(
        &self,
        location: &DiscussionLocation,
        target: &ChannelTarget,
        body: &str,
    ) -> Result<()> {
        let repo = Self::repo_path(location);
        let number = location.number;
        let path = if target.is_review {
            format!("{repo}/pulls/{number}/comments/{}/replies", target.key)
        } else {
            format!("{repo}/issues/{number}/comments")
        };

        self.api.post_json(&path, &CommentBody { body }).await?;

        tracing::info!(
            discussion = %location,
            channel = %target.key,
            review = target.is_review,
            "Comment posted"
        );
        Ok(())
    }

    async fn delete_comment(
        &self,
        location: &DiscussionLocation,
        is_review: bool,
        comment_id: &str,
    ) -> Result<()> {
        let repo = Self::repo_path(location);
        let path = if is_review {
            format!("{repo}/pulls/comments/{comment_id}")
        } else {
            format!("{repo}/issues/comments/{comment_id}")
        };

        self.api.delete(&path).await?;

        tracing::info!(discussion = %location, comment = comment_id, "Comment deleted");
        Ok(())
    }
}
