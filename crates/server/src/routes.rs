//! HTTP route handlers.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bms_shared::{Namespace, ProblemDetails, RealtimeEvent};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// problem+json error response.
#[derive(Debug)]
pub struct Problem(pub ProblemDetails);

impl Problem {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self(ProblemDetails::bad_request(detail))
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self(ProblemDetails::unauthorized(detail))
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self(ProblemDetails::not_found(detail))
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            Json(self.0),
        )
            .into_response()
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

pub fn parse_namespace(raw: &str) -> Result<Namespace, Problem> {
    raw.parse().map_err(|e: bms_shared::ProtocolError| Problem::not_found(e.to_string()))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub rooms: usize,
}

/// Liveness probe
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        rooms: state.hub.room_count().await,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub branch_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub id: String,
    pub delivered: usize,
}

/// Publish an event into a room. Backend services call this after a write.
pub async fn publish_event(
    State(state): State<AppState>,
    Path((namespace, room)): Path<(String, String)>,
    headers: HeaderMap,
    Json(payload): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), Problem> {
    let namespace = parse_namespace(&namespace)?;
    let token = bearer_token(&headers).unwrap_or_default();
    if !state.config.accepts(&token) {
        return Err(Problem::unauthorized("missing or invalid bearer token"));
    }
    if payload.event_type.trim().is_empty() {
        return Err(Problem::bad_request("event type must not be empty"));
    }

    let mut event = RealtimeEvent::new(payload.event_type, payload.branch_id);
    event.user_id = payload.user_id;
    event.data = payload.data;
    let id = event.id.clone();

    let delivered = state.hub.publish(namespace, &room, event).await;
    tracing::debug!("Published {} to /{} {} ({} socket(s))", id, namespace, room, delivered);

    Ok((StatusCode::ACCEPTED, Json(PublishResponse { id, delivered })))
}
