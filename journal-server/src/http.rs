//! Journal HTTP API
//!
//! Axum JSON API the presentation layer calls for entries, analysis and chat.
//!
//! Each endpoint has a thin axum handler that delegates to an inner function returning
//! `(StatusCode, serde_json::Value)`. The inner functions are tested directly without axum
//! dispatch.
//!
//! Endpoints:
//! - GET    /health                     : store liveness
//! - GET    /version                    : server version info
//! - GET    /stats                      : entry count and today's date
//! - GET    /entries?from=&to=          : entries, newest first
//! - POST   /entries                    : save (upsert by date) and notify the engine
//! - GET    /entries/:id                : one entry
//! - GET    /entries/:id/analysis       : pending or available emotion scores
//! - GET    /analysis?from=&to=         : emotion summary over a date range
//! - POST   /chat/sessions              : start a chat session
//! - GET    /chat/sessions/:id          : session state and history
//! - POST   /chat/sessions/:id/messages : one chat exchange
//! - DELETE /chat/sessions/:id          : end a session

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Local, NaiveDate};
use journal_core::error::{GatewayError, JournalError, SessionError, StorageError};
use journal_core::{ChatService, DateRange, EntryId, JournalConfig, JournalService, SessionId};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub journal: JournalService,
    pub chat: ChatService,
    pub config: JournalConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/stats", get(stats_handler))
        .route("/entries", get(list_entries_handler).post(save_entry_handler))
        .route("/entries/:id", get(get_entry_handler))
        .route("/entries/:id/analysis", get(entry_analysis_handler))
        .route("/analysis", get(emotion_summary_handler))
        .route("/chat/sessions", post(start_session_handler))
        .route(
            "/chat/sessions/:id",
            get(session_handler).delete(end_session_handler),
        )
        .route("/chat/sessions/:id/messages", post(send_message_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Journal HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

/// Inclusive date bounds from the query string, e.g. `?from=2025-03-01&to=2025-03-31`.
#[derive(Debug, Deserialize, Default)]
pub struct RangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl From<RangeQuery> for DateRange {
    fn from(q: RangeQuery) -> Self {
        DateRange::new(q.from, q.to)
    }
}

#[derive(Debug, Deserialize)]
pub struct SaveEntryRequest {
    pub content: Option<String>,
    /// Defaults to today's local date.
    pub entry_date: Option<NaiveDate>,
    pub file_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessageRequest {
    pub message: Option<String>,
    /// Id of an earlier attempt to retry; a new one is generated when absent.
    #[serde(default)]
    pub request_id: Option<Uuid>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check: counts entries in the store.
pub async fn health_inner(journal: &JournalService) -> (StatusCode, serde_json::Value) {
    let store = journal.store();
    match store.count().await {
        Ok(entries) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": store.name(),
                "entries": entries,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "store": store.name(),
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "journal/1",
    })
}

pub async fn stats_inner(
    journal: &JournalService,
    today: NaiveDate,
) -> (StatusCode, serde_json::Value) {
    match journal.stats(today).await {
        Ok(stats) => json_body(StatusCode::OK, &stats),
        Err(e) => error_response(&e),
    }
}

pub async fn list_entries_inner(
    journal: &JournalService,
    query: RangeQuery,
) -> (StatusCode, serde_json::Value) {
    match journal.list_entries(query.into()).await {
        Ok(entries) => (
            StatusCode::OK,
            serde_json::json!({
                "count": entries.len(),
                "entries": entries,
            }),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn get_entry_inner(
    journal: &JournalService,
    id: EntryId,
) -> (StatusCode, serde_json::Value) {
    match journal.get_entry(id).await {
        Ok(entry) => json_body(StatusCode::OK, &entry),
        Err(e) => error_response(&e),
    }
}

/// Inner save: 201 when a new entry was created, 200 when the date's entry was replaced.
/// A failed engine notification is reported in the body, not as an error status.
pub async fn save_entry_inner(
    journal: &JournalService,
    req: SaveEntryRequest,
    today: NaiveDate,
) -> (StatusCode, serde_json::Value) {
    let content = match req.content {
        Some(c) if !c.trim().is_empty() => c,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                error_value("content field is required"),
            );
        }
    };
    let entry_date = req.entry_date.unwrap_or(today);

    match journal
        .save_entry(entry_date, &content, req.file_ref.as_deref())
        .await
    {
        Ok(saved) => {
            let status = if saved.was_update {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            json_body(status, &saved)
        }
        Err(e) => error_response(&e),
    }
}

pub async fn entry_analysis_inner(
    journal: &JournalService,
    id: EntryId,
) -> (StatusCode, serde_json::Value) {
    match journal.analysis_status(id).await {
        Ok(status) => json_body(StatusCode::OK, &status),
        Err(e) => error_response(&e),
    }
}

pub async fn emotion_summary_inner(
    journal: &JournalService,
    query: RangeQuery,
) -> (StatusCode, serde_json::Value) {
    match journal.emotion_summary(query.into()).await {
        Ok(summary) => json_body(StatusCode::OK, &summary),
        Err(e) => error_response(&e),
    }
}

pub async fn start_session_inner(chat: &ChatService) -> (StatusCode, serde_json::Value) {
    let session_id = chat.sessions().start_session().await;
    (
        StatusCode::CREATED,
        serde_json::json!({ "session_id": session_id }),
    )
}

pub async fn session_inner(
    chat: &ChatService,
    id: SessionId,
) -> (StatusCode, serde_json::Value) {
    match chat.sessions().snapshot(id).await {
        Ok(snapshot) => json_body(StatusCode::OK, &snapshot),
        Err(e) => error_response(&JournalError::from(e)),
    }
}

pub async fn send_message_inner(
    chat: &ChatService,
    id: SessionId,
    req: ChatMessageRequest,
) -> (StatusCode, serde_json::Value) {
    let message = match req.message {
        Some(m) if !m.trim().is_empty() => m,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                error_value("message field is required"),
            );
        }
    };

    match chat.send_message(id, &message, req.request_id).await {
        Ok(reply) => json_body(StatusCode::OK, &reply),
        Err(e) => error_response(&e),
    }
}

pub async fn end_session_inner(
    chat: &ChatService,
    id: SessionId,
) -> (StatusCode, serde_json::Value) {
    if chat.sessions().end_session(id).await {
        (
            StatusCode::OK,
            serde_json::json!({ "session_id": id, "ended": true }),
        )
    } else {
        error_response(&JournalError::from(SessionError::NotFound(id)))
    }
}

// ============================================================================
// Axum handler wrappers (thin: delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.journal).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn stats_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = stats_inner(&state.journal, today()).await;
    (status, Json(body))
}

pub async fn list_entries_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<RangeQuery>,
) -> impl IntoResponse {
    let (status, body) = list_entries_inner(&state.journal, query).await;
    (status, Json(body))
}

pub async fn save_entry_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<SaveEntryRequest>,
) -> impl IntoResponse {
    let (status, body) = save_entry_inner(&state.journal, req, today()).await;
    (status, Json(body))
}

pub async fn get_entry_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<EntryId>,
) -> impl IntoResponse {
    let (status, body) = get_entry_inner(&state.journal, id).await;
    (status, Json(body))
}

pub async fn entry_analysis_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<EntryId>,
) -> impl IntoResponse {
    let (status, body) = entry_analysis_inner(&state.journal, id).await;
    (status, Json(body))
}

pub async fn emotion_summary_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<RangeQuery>,
) -> impl IntoResponse {
    let (status, body) = emotion_summary_inner(&state.journal, query).await;
    (status, Json(body))
}

pub async fn start_session_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = start_session_inner(&state.chat).await;
    (status, Json(body))
}

pub async fn session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<SessionId>,
) -> impl IntoResponse {
    let (status, body) = session_inner(&state.chat, id).await;
    (status, Json(body))
}

pub async fn send_message_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<SessionId>,
    Json(req): Json<ChatMessageRequest>,
) -> impl IntoResponse {
    let (status, body) = send_message_inner(&state.chat, id, req).await;
    (status, Json(body))
}

pub async fn end_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<SessionId>,
) -> impl IntoResponse {
    let (status, body) = end_session_inner(&state.chat, id).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// HTTP status for a service error.
pub fn error_status(err: &JournalError) -> StatusCode {
    match err {
        JournalError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        JournalError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
        JournalError::Storage(StorageError::Rejected(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        JournalError::Storage(StorageError::Unreachable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        JournalError::Gateway(GatewayError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        JournalError::Gateway(_) => StatusCode::BAD_GATEWAY,
        JournalError::Session(SessionError::NotFound(_)) => StatusCode::NOT_FOUND,
        JournalError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Standard error body: `{"status": "error", "error": msg}`.
fn error_value(msg: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "error": msg.into(),
        "status": "error",
    })
}

pub fn error_response(err: &JournalError) -> (StatusCode, serde_json::Value) {
    let status = error_status(err);
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %err, "Request failed");
    }
    (status, error_value(err.to_string()))
}

fn json_body<T: Serialize>(status: StatusCode, value: &T) -> (StatusCode, serde_json::Value) {
    match serde_json::to_value(value) {
        Ok(body) => (status, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_value(format!("failed to encode response: {e}")),
        ),
    }
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use journal_core::config::GatewayConfig;
    use journal_core::{ChatSessionTracker, MemoryEntryStore, Turn, WebhookGatewayClient};
    use std::time::Duration;

    /// Services backed by the in-memory store and a gateway nobody listens on.
    fn make_services() -> (JournalService, ChatService) {
        let gateway_config = GatewayConfig {
            chat_url: "http://127.0.0.1:9/chat".to_string(),
            entry_update_url: "http://127.0.0.1:9/entry".to_string(),
            bearer_token: "test-token".to_string(),
            timeout_seconds: 1,
            ..GatewayConfig::default()
        };
        let gateway = Arc::new(WebhookGatewayClient::new(&gateway_config).unwrap());
        let journal = JournalService::new(Arc::new(MemoryEntryStore::new()), gateway.clone());
        let chat = ChatService::new(Arc::new(ChatSessionTracker::new()), gateway);
        (journal, chat)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "journal/1");
    }

    #[test]
    fn test_error_status_mapping() {
        let id = Uuid::new_v4();
        let cases = [
            (JournalError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (StorageError::NotFound(id).into(), StatusCode::NOT_FOUND),
            (StorageError::Rejected("x".into()).into(), StatusCode::UNPROCESSABLE_ENTITY),
            (StorageError::Unreachable("x".into()).into(), StatusCode::SERVICE_UNAVAILABLE),
            (GatewayError::Timeout("x".into()).into(), StatusCode::GATEWAY_TIMEOUT),
            (GatewayError::Unauthenticated { status: 401 }.into(), StatusCode::BAD_GATEWAY),
            (GatewayError::MalformedResponse("x".into()).into(), StatusCode::BAD_GATEWAY),
            (SessionError::NotFound(id).into(), StatusCode::NOT_FOUND),
        ];
        for (err, expected) in cases {
            assert_eq!(error_status(&err), expected, "{err}");
        }
    }

    #[test]
    fn test_error_response_shape() {
        let (status, body) = error_response(&JournalError::InvalidInput("bad range".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "Invalid input: bad range");
    }

    #[tokio::test]
    async fn test_health_inner_memory_store() {
        let (journal, _chat) = make_services();
        let (status, body) = health_inner(&journal).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["store"], "memory");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_save_entry_inner_missing_content() {
        let (journal, _chat) = make_services();
        let req = SaveEntryRequest {
            content: Some("   ".to_string()),
            entry_date: None,
            file_ref: None,
        };
        let (status, body) = save_entry_inner(&journal, req, date(2025, 3, 14)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_save_entry_inner_reports_failed_notification() {
        let (journal, _chat) = make_services();
        let req = SaveEntryRequest {
            content: Some("Saved even if the engine is down".to_string()),
            entry_date: None,
            file_ref: None,
        };
        let (status, body) = save_entry_inner(&journal, req, date(2025, 3, 14)).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["entry"]["entry_date"], "2025-03-14");
        assert_eq!(body["was_update"], false);
        assert_eq!(body["notification"]["status"], "failed");
    }

    #[tokio::test]
    async fn test_get_entry_inner_unknown_is_404() {
        let (journal, _chat) = make_services();
        let (status, body) = get_entry_inner(&journal, Uuid::new_v4()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_list_entries_inner_inverted_range() {
        let (journal, _chat) = make_services();
        let query = RangeQuery {
            from: Some(date(2025, 3, 31)),
            to: Some(date(2025, 3, 1)),
        };
        let (status, _body) = list_entries_inner(&journal, query).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_emotion_summary_inner_empty() {
        let (journal, _chat) = make_services();
        let (status, body) = emotion_summary_inner(&journal, RangeQuery::default()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entry_count"], 0);
        assert!(body["dominant"].is_null());
    }

    #[tokio::test]
    async fn test_session_lifecycle_inner() {
        let (_journal, chat) = make_services();
        let (status, body) = start_session_inner(&chat).await;
        assert_eq!(status, StatusCode::CREATED);
        let id: SessionId = body["session_id"].as_str().unwrap().parse().unwrap();

        let (status, body) = session_inner(&chat, id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "idle");
        assert_eq!(body["history"], serde_json::json!([]));

        let (status, _) = end_session_inner(&chat, id).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = end_session_inner(&chat, id).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = session_inner(&chat, id).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_inner_answers_during_exchange() {
        let (_journal, chat) = make_services();
        let id = chat.sessions().start_session().await;
        let handle = chat.sessions().session(id).await.unwrap();
        handle
            .lock()
            .await
            .commit([Turn::user("Hello"), Turn::assistant("Hi")]);

        let _exchange = handle.lock().await;
        let lookup = session_inner(&chat, id);
        let (status, body) = tokio::time::timeout(Duration::from_millis(200), lookup)
            .await
            .expect("session lookup blocked on the in-flight exchange");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "awaiting_reply");
        assert_eq!(body["history"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_chat_message_request_accepts_request_id() {
        let id = Uuid::new_v4();
        let req: ChatMessageRequest =
            serde_json::from_value(serde_json::json!({ "message": "Hello", "request_id": id }))
                .unwrap();
        assert_eq!(req.request_id, Some(id));
        let req: ChatMessageRequest =
            serde_json::from_value(serde_json::json!({ "message": "Hello" })).unwrap();
        assert!(req.request_id.is_none());
    }

    #[tokio::test]
    async fn test_send_message_inner_missing_message() {
        let (_journal, chat) = make_services();
        let id = chat.sessions().start_session().await;
        let req = ChatMessageRequest {
            message: None,
            request_id: None,
        };
        let (status, body) = send_message_inner(&chat, id, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_send_message_inner_unreachable_gateway_is_502() {
        let (_journal, chat) = make_services();
        let id = chat.sessions().start_session().await;
        let req = ChatMessageRequest {
            message: Some("Hello".to_string()),
            request_id: None,
        };
        let (status, _body) = send_message_inner(&chat, id, req).await;
        assert!(
            status == StatusCode::BAD_GATEWAY || status == StatusCode::GATEWAY_TIMEOUT,
            "Unexpected status: {status}"
        );
        assert!(chat.sessions().history(id).await.unwrap().is_empty());
    }
}
