//! Gemini summarization provider.
//!
//! Uses `streamGenerateContent?alt=sse` for the report stream and a plain
//! `generateContent` call for the sentiment assessment.

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use super::{Summarizer, SummarizerEvent};
use crate::error::ResearchError;
use crate::models::SentimentAnalysis;
use crate::prompt::build_sentiment_prompt;

const GEMINI_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";
const GEMINI_STREAM_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:streamGenerateContent";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct GeminiClient {
    client: HttpClient,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: HttpClient::new(),
            api_key,
        }
    }

    /// Create from the GEMINI_API_KEY environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY not set"))?;
        Ok(Self::new(api_key))
    }

    fn build_request(prompt: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        }
    }
}

#[async_trait]
impl Summarizer for GeminiClient {
    async fn summarize_stream(&self, prompt: &str) -> Result<mpsc::Receiver<SummarizerEvent>> {
        let (tx, rx) = mpsc::channel(100);

        let api_request = Self::build_request(prompt);
        let url = format!("{GEMINI_STREAM_URL}?alt=sse&key={}", self.api_key);
        let client = self.client.clone();

        tokio::spawn(async move {
            let response = match client
                .post(&url)
                .json(&api_request)
                .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    let message = if e.is_timeout() {
                        ResearchError::ProviderTimeout(e.to_string()).to_string()
                    } else {
                        e.to_string()
                    };
                    let _ = tx.send(SummarizerEvent::Error(message)).await;
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let _ = tx
                    .send(SummarizerEvent::Error(format!(
                        "Gemini API error: {status} - {body}"
                    )))
                    .await;
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buffer = LineBuffer::default();

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        for line in buffer.push(&bytes) {
                            if let Some(data) = line.strip_prefix("data: ") {
                                if let Ok(response) =
                                    serde_json::from_str::<GeminiResponse>(data)
                                {
                                    if let Some(error) = response.error {
                                        let _ = tx
                                            .send(SummarizerEvent::Error(error.message))
                                            .await;
                                        return;
                                    }
                                    for candidate in response.candidates.unwrap_or_default() {
                                        for part in candidate.content.parts {
                                            if let Some(text) = part.text {
                                                if tx
                                                    .send(SummarizerEvent::TextDelta(text))
                                                    .await
                                                    .is_err()
                                                {
                                                    // Consumer gone; stop reading.
                                                    return;
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(SummarizerEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }

            let _ = tx.send(SummarizerEvent::Done).await;
        });

        Ok(rx)
    }

    async fn analyze_sentiment(&self, texts: &[String]) -> Result<SentimentAnalysis> {
        if texts.iter().all(|t| t.trim().is_empty()) {
            return Ok(SentimentAnalysis::neutral(0.0));
        }

        let prompt = build_sentiment_prompt(texts);
        let api_request = Self::build_request(&prompt);
        let url = format!("{GEMINI_API_URL}?key={}", self.api_key);

        let response = self
            .client
            .post(&url)
            .json(&api_request)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error: {status} - {body}");
        }

        let parsed: GeminiResponse = response.json().await?;
        if let Some(error) = parsed.error {
            anyhow::bail!("Gemini error: {}", error.message);
        }

        let reply: String = parsed
            .candidates
            .unwrap_or_default()
            .into_iter()
            .flat_map(|c| c.content.parts)
            .filter_map(|p| p.text)
            .collect();

        Ok(parse_sentiment_reply(&reply).unwrap_or_else(|| {
            warn!("unparseable sentiment reply: {}", reply.chars().take(200).collect::<String>());
            SentimentAnalysis::neutral(0.3)
        }))
    }
}

/// Reassembles raw byte chunks into complete lines. Bytes of an unfinished
/// line stay buffered, so a multi-byte character split across chunks is only
/// converted to text once the whole line is present.
#[derive(Default)]
struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            lines.push(String::from_utf8_lossy(&raw[..end]).into_owned());
        }
        lines
    }
}

/// Parse the model's sentiment JSON, tolerating markdown code fences around
/// the object.
pub fn parse_sentiment_reply(reply: &str) -> Option<SentimentAnalysis> {
    let trimmed = reply.trim();
    let body = if let Some(rest) = trimmed.split("```json").nth(1) {
        rest.split("```").next().unwrap_or(rest)
    } else if let Some(rest) = trimmed.split("```").nth(1) {
        rest.split("```").next().unwrap_or(rest)
    } else {
        trimmed
    };
    serde_json::from_str(body.trim()).ok()
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContentResponse,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SentimentLabel;

    #[test]
    fn test_parse_sentiment_plain() {
        let reply = r#"{"score": 72, "label": "Positive", "confidence": 0.85}"#;
        let parsed = parse_sentiment_reply(reply).unwrap();
        assert_eq!(parsed.score, 72.0);
        assert_eq!(parsed.label, SentimentLabel::Positive);
        assert_eq!(parsed.confidence, 0.85);
    }

    #[test]
    fn test_parse_sentiment_fenced() {
        let reply = "```json\n{\"score\": 20, \"label\": \"Negative\", \"confidence\": 0.6}\n```";
        let parsed = parse_sentiment_reply(reply).unwrap();
        assert_eq!(parsed.label, SentimentLabel::Negative);

        let bare_fence = "```\n{\"score\": 90, \"label\": \"Very Positive\", \"confidence\": 0.9}\n```";
        let parsed = parse_sentiment_reply(bare_fence).unwrap();
        assert_eq!(parsed.label, SentimentLabel::VeryPositive);
    }

    #[test]
    fn test_parse_sentiment_garbage() {
        assert!(parse_sentiment_reply("the vibes are good").is_none());
        assert!(parse_sentiment_reply("").is_none());
    }

    #[test]
    fn test_line_buffer_split_inside_multibyte_char() {
        let mut buffer = LineBuffer::default();
        let wire = "data: {\"text\": \"r\u{e9}sum\u{e9}\"}\n".as_bytes();
        // split inside the two-byte encoding of the first 'é'
        let mid = wire.iter().position(|&b| b == 0xc3).unwrap() + 1;
        assert!(buffer.push(&wire[..mid]).is_empty());
        assert_eq!(
            buffer.push(&wire[mid..]),
            vec!["data: {\"text\": \"r\u{e9}sum\u{e9}\"}".to_string()]
        );
    }

    #[test]
    fn test_line_buffer_holds_trailing_partial_line() {
        let mut buffer = LineBuffer::default();
        assert_eq!(
            buffer.push(b"data: one\ndata: tw"),
            vec!["data: one".to_string()]
        );
        assert_eq!(buffer.push(b"o\n"), vec!["data: two".to_string()]);
    }

    #[test]
    fn test_stream_response_parsing() {
        let data = r#"{"candidates": [{"content": {"parts": [{"text": "hello"}]}}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(data).unwrap();
        let text: String = parsed
            .candidates
            .unwrap()
            .into_iter()
            .flat_map(|c| c.content.parts)
            .filter_map(|p| p.text)
            .collect();
        assert_eq!(text, "hello");
    }
}
