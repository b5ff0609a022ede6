//! Summarization provider abstraction.
//!
//! The provider generates the research report as a finite, non-restartable
//! fragment stream, plus a one-shot sentiment assessment the relay emits
//! ahead of the report text.

mod gemini;

pub use gemini::GeminiClient;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::SentimentAnalysis;

/// Units produced by a streaming summarization call.
#[derive(Debug, Clone)]
pub enum SummarizerEvent {
    /// Incremental report text, in emission order.
    TextDelta(String),
    /// The provider finished cleanly.
    Done,
    /// The provider failed mid-stream.
    Error(String),
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Stream the report for a fully-assembled prompt.
    async fn summarize_stream(&self, prompt: &str) -> Result<mpsc::Receiver<SummarizerEvent>>;

    /// One-shot sentiment assessment over retrieved discussion bodies.
    async fn analyze_sentiment(&self, texts: &[String]) -> Result<SentimentAnalysis>;
}
