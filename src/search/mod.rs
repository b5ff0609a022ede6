//! Reddit discussion retrieval.
//!
//! The search provider is an external collaborator: given a query and an
//! optional subreddit filter it returns ranked documents. The relay treats
//! a failed or empty search as a degraded turn, never a fatal one.

mod tavily;

pub use tavily::TavilyClient;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

/// One ranked document from the search provider.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        subreddit_filter: Option<&str>,
    ) -> Result<Vec<SearchResult>>;
}

/// Extract the subreddit name from a Reddit URL, `"unknown"` if absent.
pub fn subreddit_from_url(url: &str) -> String {
    let re = Regex::new(r"reddit\.com/r/([^/]+)").unwrap();
    re.captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Pull an upvote count out of post body text, if one is mentioned.
pub fn upvotes_from_content(content: &str) -> Option<u64> {
    let re = Regex::new(r"(?i)(\d+)\s*(upvotes?|karma|points?)").unwrap();
    re.captures(content)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subreddit_from_url() {
        assert_eq!(
            subreddit_from_url("https://www.reddit.com/r/rust/comments/abc/title/"),
            "rust"
        );
        assert_eq!(subreddit_from_url("https://reddit.com/r/apple"), "apple");
        assert_eq!(subreddit_from_url("https://example.com/page"), "unknown");
    }

    #[test]
    fn test_upvotes_from_content() {
        assert_eq!(upvotes_from_content("this got 1523 upvotes"), Some(1523));
        assert_eq!(upvotes_from_content("over 40 points in an hour"), Some(40));
        assert_eq!(upvotes_from_content("12 Karma"), Some(12));
        assert_eq!(upvotes_from_content("no numbers here"), None);
    }
}
