use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chat_store::address::normalize_recipient;
use chat_store::{
    Chat, Contact, ListChatsParams, ListMessagesParams, Message, SearchContactsParams,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::response::{ok, AuthStatus, Envelope, HealthResponse, InfoMessage, ReadyResponse};
use super::ApiState;
use crate::app::SendReceipt;
use crate::error::ApiError;
use crate::qr;
use crate::sync::{Readiness, SyncStatus};

pub const DEFAULT_LIMIT: usize = 20;
pub const DEFAULT_PAGE: usize = 0;

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

/// Raw query string values. Numbers are parsed by hand so that garbage
/// falls back to defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub chat_jid: Option<String>,
    pub query: Option<String>,
    pub limit: Option<String>,
    pub page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MediaQuery {
    pub chat_jid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub message: String,
}

/// Non-negative integer or `default`.
pub fn parse_count(raw: Option<&str>, default: usize) -> usize {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v
            .parse::<i64>()
            .ok()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(default),
        None => default,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl ApiState {
    fn pagination(&self, params: &ListQuery) -> (usize, usize) {
        let limit = parse_count(params.limit.as_deref(), DEFAULT_LIMIT).min(self.max_messages);
        let page = parse_count(params.page.as_deref(), DEFAULT_PAGE);
        (limit, page)
    }

    /// Oldest message timestamp the API may expose, if limited.
    fn after(&self) -> Option<DateTime<Utc>> {
        if self.max_hours == 0 {
            return None;
        }
        let window = TimeDelta::try_hours(i64::try_from(self.max_hours).ok()?)?;
        Utc::now().checked_sub_signed(window)
    }
}

// ── Probes ───────────────────────────────────────────────────────

pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn readyz(State(state): State<ApiState>) -> (StatusCode, Json<ReadyResponse>) {
    match state.coordinator.readiness() {
        Readiness::Ready => (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready".to_string(),
                reason: None,
            }),
        ),
        Readiness::NotReady(reason) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not_ready".to_string(),
                reason: Some(reason.to_string()),
            }),
        ),
    }
}

// ── Messages, chats, contacts ────────────────────────────────────

pub async fn list_messages(
    State(state): State<ApiState>,
    Query(params): Query<ListQuery>,
) -> ApiResult<Vec<Message>> {
    let (limit, page) = state.pagination(&params);
    let messages = state.app.store().list_messages(&ListMessagesParams {
        chat_jid: non_empty(params.chat_jid),
        query: None,
        limit,
        page,
        patterns: state.filter.patterns(),
        after: state.after(),
    })?;
    Ok(ok(messages))
}

pub async fn search_messages(
    State(state): State<ApiState>,
    Query(params): Query<ListQuery>,
) -> ApiResult<Vec<Message>> {
    let (limit, page) = state.pagination(&params);
    let query = non_empty(params.query)
        .ok_or_else(|| ApiError::validation("query parameter required"))?;

    let messages = state.app.store().list_messages(&ListMessagesParams {
        chat_jid: None,
        query: Some(query),
        limit,
        page,
        patterns: state.filter.patterns(),
        after: state.after(),
    })?;
    Ok(ok(messages))
}

pub async fn list_chats(
    State(state): State<ApiState>,
    Query(params): Query<ListQuery>,
) -> ApiResult<Vec<Chat>> {
    let (limit, page) = state.pagination(&params);
    let chats = state.app.store().list_chats(&ListChatsParams {
        query: non_empty(params.query),
        limit,
        page,
        patterns: state.filter.patterns(),
    })?;
    Ok(ok(chats))
}

pub async fn search_contacts(
    State(state): State<ApiState>,
    Query(params): Query<ListQuery>,
) -> ApiResult<Vec<Contact>> {
    let query = non_empty(params.query)
        .ok_or_else(|| ApiError::validation("query parameter required"))?;

    let contacts = state.app.store().search_contacts(&SearchContactsParams {
        query,
        patterns: state.filter.patterns(),
    })?;
    Ok(ok(contacts))
}

pub async fn send_message(State(state): State<ApiState>, body: Bytes) -> ApiResult<SendReceipt> {
    let request: SendRequest =
        serde_json::from_slice(&body).map_err(|_| ApiError::validation("invalid JSON body"))?;
    if request.to.trim().is_empty() || request.message.is_empty() {
        return Err(ApiError::validation("'to' and 'message' fields are required"));
    }

    let recipient = normalize_recipient(&request.to);
    if !state.filter.is_allowed(&recipient) {
        return Err(ApiError::PermissionDenied("recipient not allowed".to_string()));
    }

    let receipt = state.app.send_text(&recipient, &request.message).await?;
    Ok(ok(receipt))
}

pub async fn media(
    State(state): State<ApiState>,
    Path(message_id): Path<String>,
    Query(params): Query<MediaQuery>,
) -> Result<Response, ApiError> {
    let chat_jid = non_empty(params.chat_jid);
    let media = state
        .app
        .media_file(&message_id, chat_jid.as_deref())
        .await?;

    let file = tokio::fs::File::open(&media.path)
        .await
        .map_err(|e| ApiError::internal(format!("open {}: {}", media.path.display(), e)))?;
    let length = file.metadata().await.ok().map(|m| m.len());
    debug!("Streaming {} for message {}", media.path.display(), message_id);

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&media.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}

// ── Session ──────────────────────────────────────────────────────

pub async fn auth_status(State(state): State<ApiState>) -> Json<Envelope<AuthStatus>> {
    ok(AuthStatus {
        authenticated: state.app.is_authenticated(),
        connected: state.app.is_connected(),
    })
}

pub async fn qr_image(State(state): State<ApiState>) -> Result<Response, ApiError> {
    if state.app.is_authenticated() {
        return Ok(ok(InfoMessage {
            message: "already authenticated".to_string(),
        })
        .into_response());
    }

    let code = state.coordinator.current_qr();
    if code.is_empty() {
        return Err(ApiError::Unavailable(
            "no QR code available, try again shortly".to_string(),
        ));
    }

    let png = qr::render_png(&code)
        .map_err(|e| ApiError::internal(format!("failed to generate QR code image: {e}")))?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

pub async fn sync_status(State(state): State<ApiState>) -> Json<Envelope<SyncStatus>> {
    ok(state.coordinator.status())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_fall_back_to_default() {
        assert_eq!(parse_count(None, 20), 20);
        assert_eq!(parse_count(Some(""), 20), 20);
        assert_eq!(parse_count(Some("abc"), 20), 20);
        assert_eq!(parse_count(Some("-5"), 20), 20);
        assert_eq!(parse_count(Some("0"), 20), 0);
        assert_eq!(parse_count(Some(" 7 "), 20), 7);
    }
}
