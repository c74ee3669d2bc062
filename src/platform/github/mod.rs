pub mod client;
pub mod http;
pub mod locator;
pub mod mapper;
pub mod pagination;

pub use client::GitHubPlatform;
pub use locator::DiscussionLocation;
