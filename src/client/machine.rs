//! Turn state machine for the streaming client.
//!
//! Pure state: events go in with an explicit clock reading, render updates
//! come out. All batching and reconciliation policy lives here, where it can
//! be tested without a network or a runtime, while the driver owns IO.
//!
//! Fragments are batched to keep render churn bounded: a batch flushes when
//! it reaches [`MAX_BATCH_FRAGMENTS`] or when [`FLUSH_INTERVAL`] has elapsed
//! since its first fragment, whichever comes first. Order within and across
//! batches is arrival order. Sentiment is never batched. The terminal marker
//! flushes whatever is pending before the provisional display and the
//! reconciliation request.
//!
//! Every inbound event carries the chat id of the stream that produced it;
//! events from a turn that is no longer active are dropped, so switching
//! sessions mid-stream cannot leak stale fragments into the new view.

use std::time::{Duration, Instant};

use crate::models::SentimentAnalysis;

/// Flush a fragment batch once it holds this many fragments.
pub const MAX_BATCH_FRAGMENTS: usize = 8;

/// Flush a non-empty fragment batch once this long has passed since its
/// first fragment arrived.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Where the machine is in a turn's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// No turn in flight.
    Idle,
    /// Bound to a stream, consuming events.
    Streaming,
    /// The transport dropped mid-turn; awaiting a recovery trigger.
    Interrupted,
    /// Terminal marker seen, provisional content shown, canonical fetch due.
    AwaitingReconcile,
}

/// Inbound events, from the transport and from the user.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// A stream was opened for this chat; subsequent events must match it.
    SessionBound { chat_id: String },
    FragmentReceived { chat_id: String, text: String },
    SentimentReceived {
        chat_id: String,
        sentiment: SentimentAnalysis,
    },
    /// Terminal marker: the stream ended cleanly.
    StreamEnded { chat_id: String },
    /// The connection dropped before the terminal marker.
    TransportLost { chat_id: String },
    /// The canonical session was fetched and applied.
    Reconciled { chat_id: String },
    /// The user stopped the turn.
    CancelRequested,
    /// The user switched to another session.
    SessionSelected { chat_id: String },
    /// The view regained focus; an interrupted turn recovers here.
    TabVisible,
    /// Periodic clock tick driving the interval flush.
    Tick,
}

/// Outbound render instructions.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Append batched fragment text to the live transcript.
    RenderFragments(String),
    RenderSentiment(SentimentAnalysis),
    /// Mark the accumulated transcript as a provisional complete answer.
    ShowProvisional,
    /// Fetch the canonical session and replace local state with it.
    Reconcile { chat_id: String },
    /// Discard any provisional transcript for the active turn.
    ClearTransient,
}

pub struct TurnMachine {
    phase: TurnPhase,
    active_chat: Option<String>,
    pending: Vec<String>,
    first_pending_at: Option<Instant>,
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnMachine {
    pub fn new() -> Self {
        Self {
            phase: TurnPhase::Idle,
            active_chat: None,
            pending: Vec::new(),
            first_pending_at: None,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Advance the machine by one event at the given clock reading.
    pub fn handle(&mut self, event: TurnEvent, now: Instant) -> Vec<Update> {
        match event {
            TurnEvent::SessionBound { chat_id } => {
                self.pending.clear();
                self.first_pending_at = None;
                self.active_chat = Some(chat_id);
                self.phase = TurnPhase::Streaming;
                Vec::new()
            }

            TurnEvent::FragmentReceived { chat_id, text } => {
                if !self.accepts(&chat_id) || self.phase != TurnPhase::Streaming {
                    return Vec::new();
                }
                if self.pending.is_empty() {
                    self.first_pending_at = Some(now);
                }
                self.pending.push(text);
                if self.pending.len() >= MAX_BATCH_FRAGMENTS || self.interval_elapsed(now) {
                    self.flush()
                } else {
                    Vec::new()
                }
            }

            TurnEvent::SentimentReceived { chat_id, sentiment } => {
                if !self.accepts(&chat_id) || self.phase != TurnPhase::Streaming {
                    return Vec::new();
                }
                vec![Update::RenderSentiment(sentiment)]
            }

            TurnEvent::Tick => {
                if self.phase == TurnPhase::Streaming && self.interval_elapsed(now) {
                    self.flush()
                } else {
                    Vec::new()
                }
            }

            TurnEvent::StreamEnded { chat_id } => {
                if !self.accepts(&chat_id) || self.phase != TurnPhase::Streaming {
                    return Vec::new();
                }
                let mut updates = self.flush();
                updates.push(Update::ShowProvisional);
                updates.push(Update::Reconcile {
                    chat_id: chat_id.clone(),
                });
                self.phase = TurnPhase::AwaitingReconcile;
                updates
            }

            TurnEvent::TransportLost { chat_id } => {
                if !self.accepts(&chat_id) || self.phase != TurnPhase::Streaming {
                    return Vec::new();
                }
                let mut updates = self.flush();
                updates.push(Update::ShowProvisional);
                self.phase = TurnPhase::Interrupted;
                updates
            }

            TurnEvent::TabVisible => match (&self.phase, &self.active_chat) {
                (TurnPhase::Interrupted, Some(chat_id)) => {
                    let chat_id = chat_id.clone();
                    self.phase = TurnPhase::AwaitingReconcile;
                    vec![Update::Reconcile { chat_id }]
                }
                _ => Vec::new(),
            },

            TurnEvent::Reconciled { chat_id } => {
                if !self.accepts(&chat_id) {
                    return Vec::new();
                }
                self.reset();
                Vec::new()
            }

            TurnEvent::CancelRequested => {
                if self.phase == TurnPhase::Idle {
                    return Vec::new();
                }
                self.reset();
                vec![Update::ClearTransient]
            }

            TurnEvent::SessionSelected { chat_id } => {
                if self.active_chat.as_deref() == Some(chat_id.as_str()) {
                    return Vec::new();
                }
                // Abandon any in-flight turn; its remaining events fail the
                // chat-id guard from here on.
                let had_turn = self.phase != TurnPhase::Idle;
                self.reset();
                if had_turn {
                    vec![Update::ClearTransient]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn accepts(&self, chat_id: &str) -> bool {
        self.active_chat.as_deref() == Some(chat_id)
    }

    fn interval_elapsed(&self, now: Instant) -> bool {
        match self.first_pending_at {
            Some(first) => now.duration_since(first) >= FLUSH_INTERVAL,
            None => false,
        }
    }

    fn flush(&mut self) -> Vec<Update> {
        self.first_pending_at = None;
        if self.pending.is_empty() {
            return Vec::new();
        }
        let text = self.pending.drain(..).collect::<String>();
        vec![Update::RenderFragments(text)]
    }

    fn reset(&mut self) {
        self.phase = TurnPhase::Idle;
        self.active_chat = None;
        self.pending.clear();
        self.first_pending_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(machine: &mut TurnMachine, chat: &str, t: Instant) {
        machine.handle(
            TurnEvent::SessionBound {
                chat_id: chat.to_string(),
            },
            t,
        );
    }

    fn fragment(chat: &str, text: &str) -> TurnEvent {
        TurnEvent::FragmentReceived {
            chat_id: chat.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_count_trigger_flushes_at_limit() {
        let mut machine = TurnMachine::new();
        let t0 = Instant::now();
        bound(&mut machine, "c1", t0);

        for i in 0..MAX_BATCH_FRAGMENTS - 1 {
            assert!(machine.handle(fragment("c1", &format!("f{i} ")), t0).is_empty());
        }
        let updates = machine.handle(fragment("c1", "last"), t0);
        assert_eq!(
            updates,
            vec![Update::RenderFragments(
                "f0 f1 f2 f3 f4 f5 f6 last".to_string()
            )]
        );
    }

    #[test]
    fn test_interval_trigger_flushes_on_tick() {
        let mut machine = TurnMachine::new();
        let t0 = Instant::now();
        bound(&mut machine, "c1", t0);

        assert!(machine.handle(fragment("c1", "a"), t0).is_empty());
        assert!(machine.handle(TurnEvent::Tick, t0 + Duration::from_millis(50)).is_empty());

        let updates = machine.handle(TurnEvent::Tick, t0 + FLUSH_INTERVAL);
        assert_eq!(updates, vec![Update::RenderFragments("a".to_string())]);

        // nothing pending, later ticks are no-ops
        assert!(machine
            .handle(TurnEvent::Tick, t0 + Duration::from_secs(5))
            .is_empty());
    }

    #[test]
    fn test_order_preserved_across_batches() {
        let mut machine = TurnMachine::new();
        let t0 = Instant::now();
        bound(&mut machine, "c1", t0);

        let mut rendered = String::new();
        for i in 0..20 {
            for update in machine.handle(fragment("c1", &format!("{i},")), t0) {
                if let Update::RenderFragments(text) = update {
                    rendered.push_str(&text);
                }
            }
        }
        for update in machine.handle(
            TurnEvent::StreamEnded {
                chat_id: "c1".to_string(),
            },
            t0,
        ) {
            if let Update::RenderFragments(text) = update {
                rendered.push_str(&text);
            }
        }
        let expected: String = (0..20).map(|i| format!("{i},")).collect();
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_sentiment_is_immediate() {
        let mut machine = TurnMachine::new();
        let t0 = Instant::now();
        bound(&mut machine, "c1", t0);

        machine.handle(fragment("c1", "pending"), t0);
        let updates = machine.handle(
            TurnEvent::SentimentReceived {
                chat_id: "c1".to_string(),
                sentiment: SentimentAnalysis::neutral(0.9),
            },
            t0,
        );
        assert_eq!(
            updates,
            vec![Update::RenderSentiment(SentimentAnalysis::neutral(0.9))]
        );
    }

    #[test]
    fn test_stream_end_flushes_then_reconciles() {
        let mut machine = TurnMachine::new();
        let t0 = Instant::now();
        bound(&mut machine, "c1", t0);

        machine.handle(fragment("c1", "tail"), t0);
        let updates = machine.handle(
            TurnEvent::StreamEnded {
                chat_id: "c1".to_string(),
            },
            t0,
        );
        assert_eq!(
            updates,
            vec![
                Update::RenderFragments("tail".to_string()),
                Update::ShowProvisional,
                Update::Reconcile {
                    chat_id: "c1".to_string()
                },
            ]
        );
        assert_eq!(machine.phase(), TurnPhase::AwaitingReconcile);

        machine.handle(
            TurnEvent::Reconciled {
                chat_id: "c1".to_string(),
            },
            t0,
        );
        assert_eq!(machine.phase(), TurnPhase::Idle);
    }

    #[test]
    fn test_abandoned_stream_events_are_dropped() {
        let mut machine = TurnMachine::new();
        let t0 = Instant::now();
        bound(&mut machine, "c1", t0);
        machine.handle(fragment("c1", "old"), t0);

        let updates = machine.handle(
            TurnEvent::SessionSelected {
                chat_id: "c2".to_string(),
            },
            t0,
        );
        assert_eq!(updates, vec![Update::ClearTransient]);

        // late events from the abandoned turn do nothing
        assert!(machine.handle(fragment("c1", "late"), t0).is_empty());
        assert!(machine
            .handle(
                TurnEvent::StreamEnded {
                    chat_id: "c1".to_string()
                },
                t0
            )
            .is_empty());
        assert_eq!(machine.phase(), TurnPhase::Idle);
    }

    #[test]
    fn test_cancel_drops_pending_without_reconcile() {
        let mut machine = TurnMachine::new();
        let t0 = Instant::now();
        bound(&mut machine, "c1", t0);
        machine.handle(fragment("c1", "half an answer"), t0);

        let updates = machine.handle(TurnEvent::CancelRequested, t0);
        assert_eq!(updates, vec![Update::ClearTransient]);
        assert_eq!(machine.phase(), TurnPhase::Idle);
        assert!(!updates
            .iter()
            .any(|u| matches!(u, Update::Reconcile { .. })));
    }

    #[test]
    fn test_transport_loss_recovers_on_visibility() {
        let mut machine = TurnMachine::new();
        let t0 = Instant::now();
        bound(&mut machine, "c1", t0);
        machine.handle(fragment("c1", "partial"), t0);

        let updates = machine.handle(
            TurnEvent::TransportLost {
                chat_id: "c1".to_string(),
            },
            t0,
        );
        assert_eq!(
            updates,
            vec![
                Update::RenderFragments("partial".to_string()),
                Update::ShowProvisional,
            ]
        );
        assert_eq!(machine.phase(), TurnPhase::Interrupted);

        let updates = machine.handle(TurnEvent::TabVisible, t0 + Duration::from_secs(30));
        assert_eq!(
            updates,
            vec![Update::Reconcile {
                chat_id: "c1".to_string()
            }]
        );
    }

    #[test]
    fn test_tab_visible_while_idle_is_noop() {
        let mut machine = TurnMachine::new();
        assert!(machine.handle(TurnEvent::TabVisible, Instant::now()).is_empty());
    }
}
