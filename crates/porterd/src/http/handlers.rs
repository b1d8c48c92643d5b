//! API handlers.

use super::error::{ApiError, ApiResult};
use crate::gatekeeper::{FrameResult, Gatekeeper, StatusPoll};
use crate::messaging::strip_channel_prefix;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub type AppState = Arc<Gatekeeper>;

fn parse_session_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid session id {raw:?}")))
}

// --- Health ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// --- Frames ---

#[derive(Debug, Serialize)]
pub struct FrameResponse {
    pub results: Vec<FrameResult>,
}

/// Classify one still frame, submitted as raw image bytes.
pub async fn ingest_frame(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<FrameResponse>> {
    let results = state.ingest_frame(&body).await?;
    Ok(Json(FrameResponse { results }))
}

// --- Identities ---

#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub name: String,
}

pub async fn enroll(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<EnrollResponse>)> {
    state.enroll(&name, &body).await?;
    Ok((StatusCode::CREATED, Json(EnrollResponse { name })))
}

pub async fn list_identities(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.store().identity_names().await?))
}

pub async fn remove_identity(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.store().remove(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

pub async fn rename_identity(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<StatusCode> {
    state.store().rename(&name, &request.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Attendance and visitor projections ---

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

#[derive(Debug, Serialize)]
pub struct TodayEntry {
    pub name: String,
    pub time: String,
}

pub async fn attendance_today(State(state): State<AppState>) -> ApiResult<Json<Vec<TodayEntry>>> {
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let entries = state.store().todays_entries(&today).await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|(name, time)| TodayEntry { name, time })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct AttendanceEntry {
    pub name: String,
    pub date: String,
    pub time: String,
}

pub async fn attendance_recent(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<AttendanceEntry>>> {
    let records = state.store().recent_attendance(query.limit).await?;
    Ok(Json(
        records
            .into_iter()
            .map(|r| AttendanceEntry {
                name: r.name,
                date: r.date,
                time: r.time,
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct VisitorEntry {
    pub name: String,
    pub whom: String,
    pub status: String,
    pub date: String,
    pub time: String,
}

pub async fn visitors_recent(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<VisitorEntry>>> {
    let records = state.store().recent_visitors(query.limit).await?;
    Ok(Json(
        records
            .into_iter()
            .map(|r| VisitorEntry {
                name: r.name,
                whom: r.whom,
                status: r.status,
                date: r.date,
                time: r.time,
            })
            .collect(),
    ))
}

// --- Conversation ---

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub session_id: String,
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let session_id = match request.session_id.as_deref() {
        Some(raw) => Some(parse_session_id(raw)?),
        None => None,
    };

    let (reply, id) = state.converse(session_id, &request.message).await;
    Ok(Json(ChatResponse {
        reply,
        session_id: id.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
}

pub async fn chat_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<StatusResponse>> {
    let id = parse_session_id(&query.session_id)?;
    let response = match state.status(id).await? {
        StatusPoll::Pending => StatusResponse {
            resolved: false,
            reply: None,
        },
        StatusPoll::Resolved(text) => StatusResponse {
            resolved: true,
            reply: Some(text),
        },
    };
    Ok(Json(response))
}

// --- Provider webhooks ---

/// Inbound reply from the messaging provider (form-encoded).
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Body")]
    pub body: String,
}

/// Always 200: the provider retries non-2xx deliveries.
pub async fn inbound_reply(
    State(state): State<AppState>,
    Form(message): Form<InboundMessage>,
) -> StatusCode {
    let sender = strip_channel_prefix(&message.from);
    tracing::info!(sender, "inbound reply received");
    state.receive_reply(sender, &message.body);
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct DeliveryStatus {
    #[serde(rename = "MessageSid")]
    pub message_sid: String,
    #[serde(rename = "MessageStatus")]
    pub message_status: String,
    #[serde(rename = "To", default)]
    pub to: Option<String>,
}

/// Informational only; log and acknowledge.
pub async fn delivery_status(Form(status): Form<DeliveryStatus>) -> StatusCode {
    tracing::info!(
        sid = %status.message_sid,
        status = %status.message_status,
        to = ?status.to,
        "delivery status update"
    );
    StatusCode::OK
}
