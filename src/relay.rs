//! Server-side turn orchestration.
//!
//! One relay invocation handles one research turn: search, prompt assembly,
//! sentiment, report streaming, and the durable write that closes the turn.
//! The relay is a low-latency passthrough: provider fragments are forwarded
//! in emission order, never reordered or coalesced, while the full text is
//! accumulated for persistence.
//!
//! Degradation policy (deterministic on purpose):
//! - Search failure or zero results: the turn still completes, with a fixed
//!   disclaimer persisted as the assistant message and zero sources.
//! - Summarization failure before the first fragment: an error-marked
//!   assistant message is persisted, so the user message is never left
//!   without a counterpart.
//! - Summarization failure mid-stream: the partial text is persisted and an
//!   error fragment is forwarded to the client.
//! - Client disconnect: the outbound channel closes, the relay stops
//!   consuming the provider, and whatever accumulated is persisted.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::ResearchError;
use crate::models::SentimentAnalysis;
use crate::prompt::{build_report_prompt, build_sources};
use crate::search::SearchProvider;
use crate::store::SessionStore;
use crate::summarize::{Summarizer, SummarizerEvent};

/// Assistant content persisted when search yields nothing.
pub const NO_RESULTS_MESSAGE: &str = "No relevant discussions found on Reddit.";

/// Fallback content when the provider completes without emitting any text.
pub const EMPTY_REPORT_MESSAGE: &str = "Report generated successfully";

/// Wire protocol sentinel closing every stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Outbound stream unit, Relay to client.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A report text fragment.
    Fragment(String),
    /// The turn's sentiment assessment; forwarded once, never persisted.
    Sentiment(SentimentAnalysis),
    /// Terminal marker: no further events for this turn.
    Done,
}

impl RelayEvent {
    /// Encode as an SSE data payload: fragments are JSON strings, sentiment
    /// is a JSON object, and the terminal marker is a bare sentinel distinct
    /// from any valid JSON payload.
    pub fn sse_data(&self) -> String {
        match self {
            RelayEvent::Fragment(text) => {
                serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
            }
            RelayEvent::Sentiment(s) => {
                serde_json::to_string(s).unwrap_or_else(|_| json!({}).to_string())
            }
            RelayEvent::Done => DONE_SENTINEL.to_string(),
        }
    }
}

/// Run one research turn against an existing session.
///
/// The caller has already appended the user message (synchronously, before
/// streaming begins). Exactly one assistant message is durably appended
/// here, on every path.
pub async fn run_research_turn(
    store: Arc<SessionStore>,
    search: Arc<dyn SearchProvider>,
    summarizer: Arc<dyn Summarizer>,
    chat_id: String,
    query: String,
    subreddit_filter: Option<String>,
    tx: mpsc::Sender<RelayEvent>,
) -> Result<()> {
    let results = match search.search(&query, subreddit_filter.as_deref()).await {
        Ok(results) => results,
        Err(e) => {
            let err = ResearchError::SearchProvider(e.to_string());
            if !err.is_recoverable() {
                return Err(err.into());
            }
            warn!(%chat_id, "{err}, degrading to zero sources");
            Vec::new()
        }
    };

    if results.is_empty() {
        info!(%chat_id, "no search results, completing degraded turn");
        store
            .complete_turn(&chat_id, NO_RESULTS_MESSAGE, Vec::new())
            .await?;
        let _ = tx
            .send(RelayEvent::Fragment(NO_RESULTS_MESSAGE.to_string()))
            .await;
        let _ = tx.send(RelayEvent::Done).await;
        return Ok(());
    }

    let sources = build_sources(&results);
    let texts: Vec<String> = sources.iter().map(|s| s.content.clone()).collect();

    let sentiment = match summarizer.analyze_sentiment(&texts).await {
        Ok(s) => s,
        Err(e) => {
            warn!(%chat_id, "sentiment analysis failed: {e}");
            SentimentAnalysis::neutral(0.0)
        }
    };
    let _ = tx.send(RelayEvent::Sentiment(sentiment.clone())).await;

    let prompt = build_report_prompt(&query, &sources, &sentiment);
    let mut provider_rx = match summarizer.summarize_stream(&prompt).await {
        Ok(rx) => rx,
        Err(e) => {
            // Failed before any content: persist an error-marked assistant
            // message so the session stays consistent.
            warn!(%chat_id, "summarization failed before streaming: {e}");
            let content = format!("Error: {e}");
            store.complete_turn(&chat_id, &content, sources).await?;
            let _ = tx.send(RelayEvent::Fragment(content)).await;
            let _ = tx.send(RelayEvent::Done).await;
            return Ok(());
        }
    };

    let mut accumulated = String::new();
    let mut stream_error: Option<String> = None;
    let mut client_gone = false;

    while let Some(event) = provider_rx.recv().await {
        match event {
            SummarizerEvent::TextDelta(delta) => {
                accumulated.push_str(&delta);
                if !client_gone && tx.send(RelayEvent::Fragment(delta)).await.is_err() {
                    // Client disconnected: stop consuming the provider.
                    info!(%chat_id, "client disconnected mid-stream, cancelling turn");
                    client_gone = true;
                    break;
                }
            }
            SummarizerEvent::Error(e) => {
                warn!(%chat_id, "summarization failed mid-stream: {e}");
                stream_error = Some(e);
                break;
            }
            SummarizerEvent::Done => break,
        }
    }
    drop(provider_rx);

    let content = if !accumulated.trim().is_empty() {
        accumulated
    } else if let Some(ref e) = stream_error {
        format!("Error: {e}")
    } else {
        EMPTY_REPORT_MESSAGE.to_string()
    };

    if let Some(e) = stream_error {
        if !client_gone {
            let _ = tx
                .send(RelayEvent::Fragment(format!("\n\nError: {e}")))
                .await;
        }
    }

    // Persist before the terminal marker so a reconciliation fetch issued on
    // [DONE] always finds the completed turn.
    store.complete_turn(&chat_id, &content, sources).await?;

    if !client_gone {
        let _ = tx.send(RelayEvent::Done).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SentimentLabel;

    #[test]
    fn test_fragment_sse_encoding_escapes() {
        let event = RelayEvent::Fragment("line one\nwith \"quotes\"".to_string());
        let data = event.sse_data();
        assert_eq!(data, "\"line one\\nwith \\\"quotes\\\"\"");
        // round-trips as a JSON string
        let back: String = serde_json::from_str(&data).unwrap();
        assert_eq!(back, "line one\nwith \"quotes\"");
    }

    #[test]
    fn test_sentiment_sse_encoding() {
        let event = RelayEvent::Sentiment(SentimentAnalysis {
            score: 72.0,
            label: SentimentLabel::Positive,
            confidence: 0.85,
        });
        let data = event.sse_data();
        let value: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(value["score"], 72.0);
        assert_eq!(value["label"], "Positive");
    }

    #[test]
    fn test_done_sentinel_is_not_json() {
        let data = RelayEvent::Done.sse_data();
        assert_eq!(data, "[DONE]");
        assert!(serde_json::from_str::<serde_json::Value>(&data).is_err());
    }
}
