//! HTTP server: chat CRUD plus the SSE research endpoints.
//!
//! Streaming endpoints return `text/event-stream`. The relay runs in a
//! spawned task and talks to the response stream through a bounded channel,
//! so a dropped connection shows up as a send failure inside the relay.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use futures::Stream;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::{ApiError, ApiResult, IntoApiError, ResearchError};
use crate::models::{QueryRequest, Role, TitleUpdate};
use crate::relay::{run_research_turn, RelayEvent};
use crate::search::SearchProvider;
use crate::store::SessionStore;
use crate::summarize::Summarizer;

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub search: Arc<dyn SearchProvider>,
    pub summarizer: Arc<dyn Summarizer>,
}

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/chats", get(list_chats_handler))
        .route("/api/chats", post(create_chat_handler))
        .route("/api/chats/{id}", get(get_chat_handler))
        .route("/api/chats/{id}", delete(delete_chat_handler))
        .route("/api/chats/{id}/title", put(update_title_handler))
        .route("/api/research", post(new_research_handler))
        .route("/api/research/{id}/stream", post(continue_research_handler))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any)
                .expose_headers(tower_http::cors::Any),
        )
        .with_state(state)
}

/// Start the HTTP server.
pub async fn run(port: u16, state: AppState) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = format!("0.0.0.0:{port}");
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_chats_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let chats = state.store.list().await;
    Json(json!({ "chats": chats }))
}

/// Create a session without running a research turn. Titled from the query.
async fn create_chat_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("Query must not be empty"));
    }
    let chat = state
        .store
        .create(&request.query, request.subreddit_filter)
        .await
        .into_internal_error("Failed to create chat")?;
    Ok((StatusCode::CREATED, Json(chat)))
}

async fn get_chat_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    match state.store.get(&id).await {
        Some(chat) => Ok(Json(chat)),
        None => Err(ResearchError::SessionNotFound(id).into()),
    }
}

async fn delete_chat_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let removed = state
        .store
        .delete(&id)
        .await
        .into_internal_error("Failed to delete chat")?;
    if !removed {
        return Err(ApiError::not_found(format!("Chat not found: {id}")));
    }
    Ok(Json(json!({ "deleted": true })))
}

async fn update_title_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<TitleUpdate>,
) -> ApiResult<impl IntoResponse> {
    let title = update.title.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("Title must not be empty"));
    }
    let renamed = state
        .store
        .update_title(&id, title)
        .await
        .into_internal_error("Failed to update title")?;
    if !renamed {
        return Err(ApiError::not_found(format!("Chat not found: {id}")));
    }
    Ok(Json(json!({ "title": title })))
}

/// Start a new research session. The session id travels in the `X-Chat-ID`
/// response header so the client can bind before the first fragment arrives.
async fn new_research_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("Query must not be empty"));
    }

    let chat = state
        .store
        .create(&request.query, request.subreddit_filter.clone())
        .await
        .into_internal_error("Failed to create chat")?;

    let stream = start_turn(state, chat.id.clone(), request).await?;
    Ok((
        [("X-Chat-ID", chat.id)],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    ))
}

/// Run a research turn against an existing session.
async fn continue_research_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("Query must not be empty"));
    }
    if state.store.get(&id).await.is_none() {
        return Err(ResearchError::SessionNotFound(id).into());
    }

    let stream = start_turn(state, id, request).await?;
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Persist the user message, spawn the relay, and adapt its channel into an
/// SSE event stream.
async fn start_turn(
    state: AppState,
    chat_id: String,
    request: QueryRequest,
) -> ApiResult<impl Stream<Item = Result<Event, Infallible>>> {
    // The user half of the turn is durable before any streaming begins.
    state
        .store
        .add_message(&chat_id, Role::User, &request.query)
        .await
        .into_internal_error("Failed to record query")?;

    let (tx, mut rx) = mpsc::channel::<RelayEvent>(100);

    let relay_tx = tx.clone();
    let relay_chat_id = chat_id.clone();
    tokio::spawn(async move {
        if let Err(e) = run_research_turn(
            state.store,
            state.search,
            state.summarizer,
            relay_chat_id.clone(),
            request.query,
            request.subreddit_filter,
            relay_tx.clone(),
        )
        .await
        {
            error!(chat_id = %relay_chat_id, "research turn failed: {e}");
            let _ = relay_tx
                .send(RelayEvent::Fragment(format!("Error: {e}")))
                .await;
            let _ = relay_tx.send(RelayEvent::Done).await;
        }
    });
    drop(tx);

    Ok(async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let done = matches!(event, RelayEvent::Done);
            yield Ok(Event::default().data(event.sse_data()));
            if done {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SentimentAnalysis;
    use crate::search::SearchResult;
    use crate::summarize::SummarizerEvent;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct EmptySearch;

    #[async_trait]
    impl SearchProvider for EmptySearch {
        async fn search(&self, _: &str, _: Option<&str>) -> Result<Vec<SearchResult>> {
            Ok(Vec::new())
        }
    }

    struct SilentSummarizer;

    #[async_trait]
    impl Summarizer for SilentSummarizer {
        async fn summarize_stream(&self, _: &str) -> Result<mpsc::Receiver<SummarizerEvent>> {
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.send(SummarizerEvent::Done).await;
            Ok(rx)
        }

        async fn analyze_sentiment(&self, _: &[String]) -> Result<SentimentAnalysis> {
            Ok(SentimentAnalysis::neutral(0.0))
        }
    }

    async fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path().join("chats.json"))
            .await
            .unwrap();
        (
            AppState {
                store: Arc::new(store),
                search: Arc::new(EmptySearch),
                summarizer: Arc::new(SilentSummarizer),
            },
            dir,
        )
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _dir) = test_state().await;
        let app = create_router(state);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_missing_chat_is_404() {
        let (state, _dir) = test_state().await;
        let app = create_router(state);
        let response = app
            .oneshot(
                Request::get("/api/chats/no-such-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (state, _dir) = test_state().await;
        let app = create_router(state);
        let response = app
            .oneshot(
                Request::post("/api/research")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query": "   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_new_research_sets_chat_id_header() {
        let (state, _dir) = test_state().await;
        let app = create_router(state.clone());
        let response = app
            .oneshot(
                Request::post("/api/research")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query": "rust opinions"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let chat_id = response
            .headers()
            .get("X-Chat-ID")
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        let chat = state.store.get(&chat_id).await.unwrap();
        assert_eq!(chat.title, "rust opinions");
        assert_eq!(chat.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_create_chat_without_turn() {
        let (state, _dir) = test_state().await;
        let app = create_router(state.clone());
        let response = app
            .oneshot(
                Request::post("/api/chats")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query": "battery life complaints"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let chats = state.store.list().await;
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].title, "battery life complaints");
        // messages only appear once a research turn runs
        assert!(chats[0].messages.is_empty());
    }

    #[tokio::test]
    async fn test_continue_on_missing_chat_is_404() {
        let (state, _dir) = test_state().await;
        let app = create_router(state);
        let response = app
            .oneshot(
                Request::post("/api/research/ghost/stream")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query": "still there?"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_title_update_and_delete() {
        let (state, _dir) = test_state().await;
        let app = create_router(state.clone());

        let chat = state.store.create("before", None).await.unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::put(format!("/api/chats/{}/title", chat.id))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"title": "after"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.store.get(&chat.id).await.unwrap().title, "after");

        let response = app
            .oneshot(
                Request::delete(format!("/api/chats/{}", chat.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.store.get(&chat.id).await.is_none());
    }
}
