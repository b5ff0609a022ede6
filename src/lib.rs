//! Conversational Reddit sentiment research.
//!
//! A server relays streaming research turns (web search scoped to Reddit,
//! sentiment assessment, cited report generation) over SSE and persists the
//! resulting conversations in a JSON file store. A client library
//! reconstructs those streams into a coherent transcript with batching,
//! cancellation, reconciliation, and interruption recovery.

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod prompt;
pub mod relay;
pub mod search;
pub mod server;
pub mod store;
pub mod summarize;

pub use config::Config;
pub use error::{ApiError, ApiResult, ResearchError};
pub use models::{ChatSession, Message, QueryRequest, Role, SentimentAnalysis, Source};
pub use store::SessionStore;
