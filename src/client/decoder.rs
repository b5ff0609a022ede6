//! SSE wire decoder.
//!
//! Reassembles byte chunks into SSE records and decodes each `data:` payload
//! into a typed event. Chunk boundaries carry no meaning: bytes accumulate
//! raw and a record is only converted to text once its terminating blank
//! line has arrived, so a fragment split across reads comes out whole even
//! when the split lands inside a multi-byte character.
//!
//! Decoding is lenient. Payloads are JSON strings (report fragments), a JSON
//! object carrying `score`/`label`/`confidence` (the sentiment assessment),
//! or the bare `[DONE]` sentinel. Anything else is passed through as literal
//! fragment text rather than dropped.

use crate::models::SentimentAnalysis;

/// One decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    Fragment(String),
    Sentiment(SentimentAnalysis),
    Done,
}

/// Incremental decoder over a single SSE response body.
#[derive(Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every event completed by this chunk, in
    /// arrival order. Trailing bytes of an unfinished record stay buffered.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<WireEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(end) = find_record_end(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let record = String::from_utf8_lossy(&raw[..end]);
            if let Some(event) = decode_record(&record) {
                events.push(event);
            }
        }
        events
    }
}

fn find_record_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Decode one SSE record (the lines between blank-line separators).
fn decode_record(record: &str) -> Option<WireEvent> {
    let data = record
        .lines()
        .filter_map(|line| {
            line.strip_prefix("data: ")
                .or_else(|| line.strip_prefix("data:"))
        })
        .collect::<Vec<_>>()
        .join("\n");

    // Keep-alive comments and empty records carry no data lines.
    if data.is_empty() {
        return None;
    }

    Some(decode_payload(&data))
}

fn decode_payload(data: &str) -> WireEvent {
    if data == "[DONE]" {
        return WireEvent::Done;
    }

    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(serde_json::Value::String(text)) => WireEvent::Fragment(text),
        Ok(value) if SentimentAnalysis::matches_shape(&value) => {
            match serde_json::from_value(value) {
                Ok(sentiment) => WireEvent::Sentiment(sentiment),
                Err(_) => WireEvent::Fragment(data.to_string()),
            }
        }
        // Unknown JSON shapes and non-JSON payloads stay visible as text.
        _ => WireEvent::Fragment(data.to_string()),
    }
}
