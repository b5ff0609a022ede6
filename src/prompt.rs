//! Prompt assembly and citation handling.
//!
//! Sources carry stable 1-based indices: source N in the session's current
//! list is cited as `[N]` in assistant text, and that mapping holds for the
//! life of the list.

use chrono::Utc;
use uuid::Uuid;

use crate::models::{SentimentAnalysis, Source};
use crate::search::{subreddit_from_url, upvotes_from_content, SearchResult};

/// At most this many search results become sources for a turn.
pub const MAX_SOURCES: usize = 8;

/// Stored body excerpts are capped at this many characters.
pub const EXCERPT_CHARS: usize = 1000;

const CONTEXT_CHARS: usize = 500;
const SENTIMENT_TEXTS: usize = 5;
const SENTIMENT_CHARS: usize = 2000;

/// Convert ranked search results into the turn's source list, capped and
/// excerpted.
pub fn build_sources(results: &[SearchResult]) -> Vec<Source> {
    results
        .iter()
        .take(MAX_SOURCES)
        .map(|r| Source {
            id: Uuid::new_v4().to_string(),
            title: if r.title.is_empty() {
                "No Title".to_string()
            } else {
                r.title.clone()
            },
            url: r.url.clone(),
            subreddit: subreddit_from_url(&r.url),
            upvotes: upvotes_from_content(&r.content),
            content: truncate_chars(&r.content, EXCERPT_CHARS),
            timestamp: Utc::now(),
        })
        .collect()
}

/// The analyst prompt: retrieved excerpts under their citation indices, the
/// precomputed sentiment, and the report structure the model must follow.
pub fn build_report_prompt(
    query: &str,
    sources: &[Source],
    sentiment: &SentimentAnalysis,
) -> String {
    let context = sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "Source [{}]: {}\nSubreddit: r/{}\nContent: {}...",
                i + 1,
                s.title,
                s.subreddit,
                truncate_chars(&s.content, CONTEXT_CHARS),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let label = sentiment.label.as_str();
    format!(
        r#"You are a social listening analyst. Analyze the following Reddit discussions about "{query}" and provide comprehensive insights.

Context from Reddit:
{context}

The overall sentiment score for "{query}" is {score:.0}/100 ({label}) with {confidence:.0}% confidence.

You MUST follow this exact structure in your response:

**Sentiment Explanation:**
Explain why the sentiment score is {score:.0}/100 ({label}). What specific aspects of "{query}" drive this sentiment? (2-3 sentences)

**Direct Answer:**
Provide a 2-3 sentence summary of the overall sentiment about "{query}" on Reddit based on the discussions analyzed.

**Key Sentiment Drivers:**
Explain WHY people feel this way. Provide a bulleted list of the main factors driving the sentiment, each with a citation [X] when referencing a specific source.

**Contradicting Views:**
What are the minority opinions or dissenting views? List them with citations [X] where applicable.

Use citations like [1], [2], etc., to reference the sources provided above. Be concise, data-driven, and specific in your analysis."#,
        score = sentiment.score,
        confidence = sentiment.confidence * 100.0,
    )
}

/// Prompt asking the model for a strict-JSON sentiment assessment of the
/// retrieved discussion bodies.
pub fn build_sentiment_prompt(texts: &[String]) -> String {
    let combined: String = texts
        .iter()
        .take(SENTIMENT_TEXTS)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    let combined = truncate_chars(&combined, SENTIMENT_CHARS);

    format!(
        r#"Analyze the sentiment of the following text and provide:
1. A sentiment score from 0-100 (0=very negative, 50=neutral, 100=very positive)
2. A sentiment label (Very Negative, Negative, Neutral, Positive, Very Positive)
3. A confidence score from 0-1

Text: {combined}

Respond only with a JSON object in this exact format:
{{
    "score": <number 0-100>,
    "label": "<sentiment label>",
    "confidence": <number 0-1>
}}"#
    )
}

/// A bracketed numeral resolved against a source list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    /// The numeral as written, 1-based.
    pub numeral: usize,
    /// Index into the session's source list.
    pub source_index: usize,
    /// Byte range of the `[N]` token in the text.
    pub start: usize,
    pub end: usize,
}

/// Find every in-range citation in assistant text. Out-of-range numerals
/// stay literal text and are not returned.
pub fn resolve_citations(text: &str, source_count: usize) -> Vec<Citation> {
    let re = regex::Regex::new(r"\[(\d+)\]").unwrap();
    re.captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let numeral: usize = caps.get(1)?.as_str().parse().ok()?;
            if numeral == 0 || numeral > source_count {
                return None;
            }
            Some(Citation {
                numeral,
                source_index: numeral - 1,
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}
