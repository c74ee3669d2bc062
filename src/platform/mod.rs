pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use github::locator::DiscussionLocation;
use types::*;

#[async_trait]
pub trait ReviewPlatform: Send + Sync {
    /// Fetch the signed-in user and cache their login for `can_delete`.
    async fn current_user(&self) -> Result<User>;

    /// Fetch a fresh, fully rebuilt discussion snapshot.
    async fn get_discussion(&self, location: &DiscussionLocation)
        -> Result<PullRequestDiscussion>;

    /// Post a comment to the Main channel or reply in a review thread.
    async fn create_comment(
        &self,
        location: &DiscussionLocation,
        target: &ChannelTarget,
        body: &str,
    ) -> Result<()>;

    /// Delete an issue comment (`is_review == false`) or a review comment.
    async fn delete_comment(
        &self,
        location: &DiscussionLocation,
        is_review: bool,
        comment_id: &str,
    ) -> Result<()>;
}
