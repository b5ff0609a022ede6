//! Client driver: owns the HTTP transport and pumps the turn machine.
//!
//! The driver reads the SSE body, feeds decoded events and periodic ticks
//! into [`TurnMachine`], and executes the updates it emits against a
//! [`RenderSink`]. Reconciliation and interruption recovery both resolve to
//! the same move: fetch the canonical session and replace local state with
//! it. The server's copy always wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::Client as HttpClient;
use tracing::{debug, warn};

use super::decoder::{StreamDecoder, WireEvent};
use super::machine::{TurnEvent, TurnMachine, Update};
use crate::error::ResearchError;
use crate::models::{ChatSession, QueryRequest, TitleUpdate};

/// Tick period driving the machine's interval flush.
const TICK_PERIOD: Duration = Duration::from_millis(50);

/// Where render updates land. The REPL prints; a UI would repaint.
pub trait RenderSink {
    fn apply(&mut self, update: Update);
    /// Replace all local state for the session with the canonical copy.
    fn replace(&mut self, session: &ChatSession);
}

/// HTTP client for the research server.
pub struct ResearchClient {
    http: HttpClient,
    base_url: String,
}

impl ResearchClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn list_chats(&self) -> Result<Vec<ChatSession>> {
        #[derive(serde::Deserialize)]
        struct ChatList {
            chats: Vec<ChatSession>,
        }
        let list: ChatList = self
            .http
            .get(format!("{}/api/chats", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(list.chats)
    }

    pub async fn get_chat(&self, id: &str) -> Result<ChatSession> {
        let session = self
            .http
            .get(format!("{}/api/chats/{id}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(session)
    }

    pub async fn update_title(&self, id: &str, title: &str) -> Result<()> {
        self.http
            .put(format!("{}/api/chats/{id}/title", self.base_url))
            .json(&TitleUpdate {
                title: title.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn delete_chat(&self, id: &str) -> Result<()> {
        self.http
            .delete(format!("{}/api/chats/{id}", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Run one research turn end to end. With `chat_id` set the turn
    /// continues that session; otherwise the server creates one and its id
    /// is returned either way.
    pub async fn run_turn(
        &self,
        chat_id: Option<&str>,
        query: &str,
        subreddit_filter: Option<&str>,
        cancel: Arc<AtomicBool>,
        sink: &mut dyn RenderSink,
    ) -> Result<String> {
        let turn_started_at = Utc::now();
        let body = QueryRequest {
            query: query.to_string(),
            subreddit_filter: subreddit_filter.map(str::to_string),
        };

        let url = match chat_id {
            Some(id) => format!("{}/api/research/{id}/stream", self.base_url),
            None => format!("{}/api/research", self.base_url),
        };
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let chat_id = match chat_id {
            Some(id) => id.to_string(),
            None => response
                .headers()
                .get("X-Chat-ID")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .context("server did not return a chat id")?,
        };

        let mut machine = TurnMachine::new();
        self.drain_updates(
            &mut machine,
            TurnEvent::SessionBound {
                chat_id: chat_id.clone(),
            },
            sink,
        )
        .await?;

        let mut stream = response.bytes_stream();
        let mut decoder = StreamDecoder::new();
        let mut saw_done = false;
        let mut cancelled = false;

        loop {
            tokio::select! {
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            for event in decoder.push(&bytes) {
                                let turn_event = match event {
                                    WireEvent::Fragment(text) => TurnEvent::FragmentReceived {
                                        chat_id: chat_id.clone(),
                                        text,
                                    },
                                    WireEvent::Sentiment(sentiment) => {
                                        TurnEvent::SentimentReceived {
                                            chat_id: chat_id.clone(),
                                            sentiment,
                                        }
                                    }
                                    WireEvent::Done => {
                                        saw_done = true;
                                        TurnEvent::StreamEnded {
                                            chat_id: chat_id.clone(),
                                        }
                                    }
                                };
                                self.drain_updates(&mut machine, turn_event, sink).await?;
                            }
                            if saw_done {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!("{}", ResearchError::TransportInterrupted(e.to_string()));
                            break;
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(TICK_PERIOD) => {
                    if cancel.load(Ordering::Relaxed) {
                        cancelled = true;
                        break;
                    }
                    self.drain_updates(&mut machine, TurnEvent::Tick, sink).await?;
                }
            }
        }
        drop(stream);

        if cancelled {
            self.drain_updates(&mut machine, TurnEvent::CancelRequested, sink)
                .await?;
            return Ok(chat_id);
        }

        if !saw_done {
            // Connection dropped before the terminal marker. Show what we
            // have, then recover against the durable copy.
            self.drain_updates(
                &mut machine,
                TurnEvent::TransportLost {
                    chat_id: chat_id.clone(),
                },
                sink,
            )
            .await?;
            self.recover_interrupted(&mut machine, &chat_id, turn_started_at, sink)
                .await?;
        }

        Ok(chat_id)
    }

    /// Feed one event through the machine and execute its updates.
    /// `Reconcile` is handled here since it needs the transport.
    async fn drain_updates(
        &self,
        machine: &mut TurnMachine,
        event: TurnEvent,
        sink: &mut dyn RenderSink,
    ) -> Result<()> {
        for update in machine.handle(event, Instant::now()) {
            match update {
                Update::Reconcile { chat_id } => {
                    debug!(%chat_id, "reconciling against canonical session");
                    let session = self.get_chat(&chat_id).await?;
                    sink.replace(&session);
                    machine.handle(TurnEvent::Reconciled { chat_id }, Instant::now());
                }
                Update::RenderFragments(text) => {
                    sink.apply(Update::RenderFragments(text));
                    // stay cooperative between render batches
                    tokio::task::yield_now().await;
                }
                other => sink.apply(other),
            }
        }
        Ok(())
    }

    /// After a transport loss: if the server finished the turn while we were
    /// disconnected, the canonical session already holds the assistant
    /// message and replaces the provisional view. Otherwise the provisional
    /// text stands.
    async fn recover_interrupted(
        &self,
        machine: &mut TurnMachine,
        chat_id: &str,
        turn_started_at: DateTime<Utc>,
        sink: &mut dyn RenderSink,
    ) -> Result<()> {
        let session = match self.get_chat(chat_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(%chat_id, "recovery fetch failed: {e}");
                return Ok(());
            }
        };
        if session.has_assistant_message_since(turn_started_at) {
            if let Some(message) = session.last_assistant_message() {
                debug!(%chat_id, bytes = message.content.len(), "canonical answer recovered");
            }
            self.drain_updates(machine, TurnEvent::TabVisible, sink)
                .await?;
        } else {
            debug!(%chat_id, "turn not yet durable, keeping provisional view");
        }
        Ok(())
    }
}
