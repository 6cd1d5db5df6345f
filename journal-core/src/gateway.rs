//! Webhook Gateway: journal-change and chat events to the automation engine.
//!
//! Every response body goes through a validated decode into [`GatewayReply`]; anything that
//! does not match the expected shape is a [`GatewayError::MalformedResponse`], never a guess.
//! The client performs no retries unless a [`RetryPolicy`] is configured, and retries always
//! reuse the original idempotency key.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::models::{EntryId, JournalEntry, SessionId, Turn};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Acknowledged entry states remembered for deduplication.
const DELIVERED_KEY_CAPACITY: usize = 1024;

const BODY_PREVIEW_CHARS: usize = 500;

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Tell the engine an entry was created or edited so it can recompute its analysis.
    async fn notify_entry_changed(
        &self,
        entry: &JournalEntry,
    ) -> Result<Acknowledgement, GatewayError>;

    /// Send one user message with the prior history and return the assistant reply.
    async fn send_chat_message(&self, request: &ChatRequest) -> Result<String, GatewayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Acknowledgement {
    Delivered,
    /// The same entry state was already acknowledged; nothing was sent.
    AlreadyDelivered,
}

/// Decoded gateway body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayReply<T> {
    Success(T),
    Error {
        code: Option<String>,
        message: String,
    },
}

impl<T> GatewayReply<T> {
    fn into_result(self, status: Option<u16>) -> Result<T, GatewayError> {
        match self {
            GatewayReply::Success(value) => Ok(value),
            GatewayReply::Error { code, message } => Err(GatewayError::UpstreamFailure {
                status,
                message: match code {
                    Some(code) => format!("{code}: {message}"),
                    None => message,
                },
            }),
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryChangedPayload<'a> {
    entry_id: EntryId,
    content: &'a str,
    entry_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_ref: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

impl<'a> From<&'a JournalEntry> for EntryChangedPayload<'a> {
    fn from(entry: &'a JournalEntry) -> Self {
        Self {
            entry_id: entry.id,
            content: &entry.content,
            entry_date: entry.entry_date,
            file_ref: entry.file_ref.as_deref(),
            updated_at: entry.updated_at,
        }
    }
}

/// Chat webhook request. `request_id` identifies one user message and is reused on retry,
/// including a retry the caller makes after a timeout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub session_id: SessionId,
    pub request_id: Uuid,
    pub message: String,
    pub history: Vec<Turn>,
}

impl ChatRequest {
    pub fn new(session_id: SessionId, message: impl Into<String>, history: Vec<Turn>) -> Self {
        Self::with_request_id(session_id, message, history, Uuid::new_v4())
    }

    pub fn with_request_id(
        session_id: SessionId,
        message: impl Into<String>,
        history: Vec<Turn>,
        request_id: Uuid,
    ) -> Self {
        Self {
            session_id,
            request_id,
            message: message.into(),
            history,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EntryAckBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatReplyBody {
    // `output` is what the engine's agent node emits by default.
    #[serde(default, alias = "output")]
    reply: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, GatewayError> {
    serde_json::from_str(body).map_err(|e| {
        GatewayError::MalformedResponse(format!("{e}; body: {}", preview(body)))
    })
}

fn error_reply<T>(
    code: Option<String>,
    message: Option<String>,
    error: Option<String>,
) -> GatewayReply<T> {
    GatewayReply::Error {
        code,
        message: message
            .or(error)
            .unwrap_or_else(|| "engine reported an error without a message".to_string()),
    }
}

/// Decode an entry-changed response: `{"status":"ok"}` or `{"status":"error","message":..}`.
pub fn decode_entry_ack(body: &str) -> Result<GatewayReply<()>, GatewayError> {
    let parsed: EntryAckBody = parse_body(body)?;
    match parsed.status.as_deref() {
        Some("ok") => Ok(GatewayReply::Success(())),
        Some("error") => Ok(error_reply(parsed.code, parsed.message, parsed.error)),
        None if parsed.error.is_some() => Ok(error_reply(parsed.code, parsed.message, parsed.error)),
        Some(other) => Err(GatewayError::MalformedResponse(format!(
            "unknown status `{other}`"
        ))),
        None => Err(GatewayError::MalformedResponse(format!(
            "response has no `status` field; body: {}",
            preview(body)
        ))),
    }
}

/// Decode a chat response: `{"reply": text}` or an error body.
pub fn decode_chat_reply(body: &str) -> Result<GatewayReply<String>, GatewayError> {
    let parsed: ChatReplyBody = parse_body(body)?;
    if parsed.status.as_deref() == Some("error") || parsed.error.is_some() {
        return Ok(error_reply(parsed.code, parsed.message, parsed.error));
    }
    match parsed.reply {
        Some(reply) => Ok(GatewayReply::Success(reply)),
        None => Err(GatewayError::MalformedResponse(format!(
            "response has no `reply` field; body: {}",
            preview(body)
        ))),
    }
}

fn preview(body: &str) -> String {
    if body.chars().count() > BODY_PREVIEW_CHARS {
        let cut: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        body.to_string()
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Opt-in retry of transient failures. `max_retries == 0` means a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        delay_ms: 0,
    };

    fn strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(self.delay_ms.max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

// ============================================================================
// WebhookGatewayClient
// ============================================================================

#[derive(Debug, Default)]
struct DeliveredKeys {
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl DeliveredKeys {
    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn insert(&mut self, key: String) {
        if self.keys.insert(key.clone()) {
            self.order.push_back(key);
            while self.order.len() > DELIVERED_KEY_CAPACITY {
                if let Some(oldest) = self.order.pop_front() {
                    self.keys.remove(&oldest);
                }
            }
        }
    }
}

/// Dedup bookkeeping. The outer lock is only held for map updates; a per-key lock serializes
/// notifications for the same entry state while distinct states proceed in parallel.
#[derive(Debug, Default)]
struct NotifyState {
    delivered: DeliveredKeys,
    in_flight: HashMap<String, Arc<Mutex<()>>>,
}

#[derive(Clone)]
pub struct WebhookGatewayClient {
    client: Client,
    chat_url: String,
    entry_update_url: String,
    bearer_token: String,
    retry: RetryPolicy,
    notify_state: Arc<Mutex<NotifyState>>,
}

impl std::fmt::Debug for WebhookGatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookGatewayClient")
            .field("chat_url", &self.chat_url)
            .field("entry_update_url", &self.entry_update_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl WebhookGatewayClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            chat_url: config.chat_url.clone(),
            entry_update_url: config.entry_update_url.clone(),
            bearer_token: config.bearer_token.clone(),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                delay_ms: config.retry_delay_ms,
            },
            notify_state: Arc::new(Mutex::new(NotifyState::default())),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Per-key lock for `key`, or `None` when that state is already acknowledged.
    async fn claim(&self, key: &str) -> Option<Arc<Mutex<()>>> {
        let mut state = self.notify_state.lock().await;
        if state.delivered.contains(key) {
            return None;
        }
        Some(
            state
                .in_flight
                .entry(key.to_string())
                .or_default()
                .clone(),
        )
    }

    /// Called while still holding the per-key lock so a waiter sees the outcome.
    async fn release(&self, key: &str, slot: &Arc<Mutex<()>>, delivered: bool) {
        let mut state = self.notify_state.lock().await;
        let ours = state
            .in_flight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        // Waiters on a delivered key re-check `delivered`, so its slot can go at once. A failed
        // slot stays while anyone besides the map and this caller holds it.
        if ours && (delivered || Arc::strong_count(slot) <= 2) {
            state.in_flight.remove(key);
        }
        if delivered {
            state.delivered.insert(key.to_string());
        }
    }

    async fn is_delivered(&self, key: &str) -> bool {
        self.notify_state.lock().await.delivered.contains(key)
    }

    async fn post_once<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        idempotency_key: &str,
    ) -> Result<(StatusCode, String), GatewayError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.bearer_token)
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::error!(status = status.as_u16(), url = %url, "Gateway rejected bearer credential");
            return Err(GatewayError::Unauthenticated {
                status: status.as_u16(),
            });
        }

        let text = response.text().await?;
        Ok((status, text))
    }

    /// One POST + decode. Non-success statuses are upstream failures, carrying the engine's
    /// own message when the error body can be decoded.
    async fn exchange<B, T>(
        &self,
        url: &str,
        body: &B,
        idempotency_key: &str,
        decode: fn(&str) -> Result<GatewayReply<T>, GatewayError>,
    ) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
        T: Send,
    {
        let (status, text) = self.post_once(url, body, idempotency_key).await?;

        if !status.is_success() {
            let message = match decode(&text) {
                Ok(GatewayReply::Error { code, message }) => {
                    return GatewayReply::<T>::Error { code, message }
                        .into_result(Some(status.as_u16()));
                }
                _ if text.trim().is_empty() => status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
                _ => preview(&text),
            };
            return Err(GatewayError::UpstreamFailure {
                status: Some(status.as_u16()),
                message,
            });
        }

        decode(&text)?.into_result(None)
    }

    async fn exchange_with_retry<B, T>(
        &self,
        url: &str,
        body: &B,
        idempotency_key: &str,
        decode: fn(&str) -> Result<GatewayReply<T>, GatewayError>,
    ) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
        T: Send,
    {
        if self.retry.max_retries == 0 {
            return self.exchange(url, body, idempotency_key, decode).await;
        }

        RetryIf::spawn(
            self.retry.strategy(),
            || self.exchange(url, body, idempotency_key, decode),
            |e: &GatewayError| {
                let transient = e.is_transient();
                if transient {
                    tracing::warn!(error = %e, key = %idempotency_key, "Retrying gateway call");
                }
                transient
            },
        )
        .await
    }
}

#[async_trait]
impl Gateway for WebhookGatewayClient {
    async fn notify_entry_changed(
        &self,
        entry: &JournalEntry,
    ) -> Result<Acknowledgement, GatewayError> {
        let key = entry.idempotency_key();

        let Some(slot) = self.claim(&key).await else {
            tracing::debug!(entry_id = %entry.id, "Entry state already acknowledged, skipping");
            return Ok(Acknowledgement::AlreadyDelivered);
        };

        // A duplicate of the same state waits here for the first outcome.
        let guard = slot.lock().await;
        if self.is_delivered(&key).await {
            self.release(&key, &slot, false).await;
            drop(guard);
            tracing::debug!(entry_id = %entry.id, "Entry state acknowledged while waiting, skipping");
            return Ok(Acknowledgement::AlreadyDelivered);
        }

        tracing::info!(entry_id = %entry.id, entry_date = %entry.entry_date, "Sending entry notification");
        let payload = EntryChangedPayload::from(entry);
        let result = self
            .exchange_with_retry(&self.entry_update_url, &payload, &key, decode_entry_ack)
            .await;
        self.release(&key, &slot, result.is_ok()).await;
        drop(guard);

        match result {
            Ok(()) => Ok(Acknowledgement::Delivered),
            Err(e) => {
                tracing::error!(entry_id = %entry.id, error = %e, "Entry notification failed");
                Err(e)
            }
        }
    }

    async fn send_chat_message(&self, request: &ChatRequest) -> Result<String, GatewayError> {
        tracing::info!(
            session_id = %request.session_id,
            request_id = %request.request_id,
            history = request.history.len(),
            "Sending chat message"
        );
        let key = request.request_id.to_string();
        let result = self
            .exchange_with_retry(&self.chat_url, request, &key, decode_chat_reply)
            .await;
        if let Err(e) = &result {
            tracing::error!(
                session_id = %request.session_id,
                request_id = %request.request_id,
                error = %e,
                "Chat message failed"
            );
        }
        result
    }
}
