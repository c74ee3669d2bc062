use std::fmt;

use regex::Regex;

use crate::error::{AppError, Result};

/// Identifies the pull request a page URL points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscussionLocation {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl DiscussionLocation {
    /// Parse `https://<host>/<owner>/<repo>/pull/<number>`.
    ///
    /// Anything else is a [`AppError::NavigationMismatch`], which callers treat
    /// as "no active discussion".
    pub fn parse(url: &str, host: &str) -> Result<Self> {
        let pattern = format!(
            r"^https://{}/([^/]+)/([^/]+)/pull/(\d+)",
            regex::escape(host)
        );
        let re = Regex::new(&pattern).map_err(|e| AppError::Internal(e.to_string()))?;

        let captures = re
            .captures(url)
            .ok_or_else(|| AppError::NavigationMismatch(url.to_string()))?;

        let number = captures[3]
            .parse::<u64>()
            .map_err(|_| AppError::NavigationMismatch(url.to_string()))?;

        Ok(Self {
            owner: captures[1].to_string(),
            repo: captures[2].to_string(),
            number,
        })
    }

    /// Lenient variant of [`parse`](Self::parse).
    pub fn from_page(url: &str, host: &str) -> Option<Self> {
        Self::parse(url, host).ok()
    }

    pub fn page_url(&self, host: &str) -> String {
        format!("https://{host}/{}/{}/pull/{}", self.owner, self.repo, self.number)
    }
}

impl fmt::Display for DiscussionLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}
