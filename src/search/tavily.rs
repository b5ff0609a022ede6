//! Tavily search client scoped to reddit.com.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{SearchProvider, SearchResult};

const TAVILY_API_URL: &str = "https://api.tavily.com/search";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_RESULTS: usize = 10;

pub struct TavilyClient {
    client: HttpClient,
    api_key: String,
}

impl TavilyClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: HttpClient::new(),
            api_key,
        }
    }

    /// Create from the TAVILY_API_KEY environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("TAVILY_API_KEY")
            .map_err(|_| anyhow::anyhow!("TAVILY_API_KEY not set"))?;
        Ok(Self::new(api_key))
    }

    fn build_query(query: &str, subreddit_filter: Option<&str>) -> String {
        match subreddit_filter {
            Some(sub) => format!("{query} site:reddit.com/r/{sub}"),
            None => format!("{query} site:reddit.com"),
        }
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(
        &self,
        query: &str,
        subreddit_filter: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let request = TavilyRequest {
            api_key: &self.api_key,
            query: Self::build_query(query, subreddit_filter),
            search_depth: "advanced",
            include_domains: vec!["reddit.com"],
            max_results: MAX_RESULTS,
            include_answer: false,
            include_raw_content: true,
        };

        let response = self
            .client
            .post(TAVILY_API_URL)
            .json(&request)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Tavily API error: {status} - {body}");
        }

        let parsed: TavilyResponse = response.json().await?;
        Ok(parsed.results)
    }
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: String,
    search_depth: &'static str,
    include_domains: Vec<&'static str>,
    max_results: usize,
    include_answer: bool,
    include_raw_content: bool,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query() {
        assert_eq!(
            TavilyClient::build_query("iPhone 16", None),
            "iPhone 16 site:reddit.com"
        );
        assert_eq!(
            TavilyClient::build_query("iPhone 16", Some("apple")),
            "iPhone 16 site:reddit.com/r/apple"
        );
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "results": [
                {"title": "Thread", "url": "https://reddit.com/r/apple/x", "content": "body"},
                {"url": "https://reddit.com/r/apple/y"}
            ],
            "response_time": 1.2
        }"#;
        let parsed: TavilyResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].title, "Thread");
        assert!(parsed.results[1].title.is_empty());
    }
}
