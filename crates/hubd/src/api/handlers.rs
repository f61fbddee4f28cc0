//! HTTP request handlers.
//!
//! Each handler parses its input, calls the coordinator and renders the
//! outcome as JSON. Nothing here decides policy.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use hub_core::{DeviceId, Target};

use crate::config::{LiveCaptureConfig, LiveCaptureUpdate};
use crate::coordinator::{
    FilePlayRequest, LiveStartRequest, RelayAction, ServerInfo, SessionCoordinator,
};
use crate::registry::DeviceSessionView;
use crate::router::{DeliveryReport, RouteError};
use crate::supervisor::{RelayInfo, StartOutcome, SupervisorError};

// ============================================================================
// Errors
// ============================================================================

/// Rejections produced by the handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
        }
    }
}

fn parse_target(target: Option<&str>) -> Result<Target, ApiError> {
    target
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing target".to_string()))?
        .parse()
        .map_err(|e: hub_core::DomainError| ApiError::BadRequest(e.to_string()))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ClientsResponse {
    clients: Vec<DeviceId>,
}

#[derive(Debug, Serialize)]
pub struct LiveStatusResponse {
    running: bool,
}

#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    target: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TargetBody {
    target: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LiveStartBody {
    target: Option<String>,
    rtp_ip: Option<String>,
    rtp_port: Option<u16>,
    frame_ms: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct FilePlayBody {
    target: Option<String>,
    url: Option<String>,
    store_policy: Option<String>,
}

// ============================================================================
// Rendering
// ============================================================================

fn delivery_json(result: &Result<DeliveryReport, RouteError>) -> Value {
    match result {
        Ok(report) => json!({
            "ok": true,
            "delivered": report.delivered,
            "skipped": report.skipped,
        }),
        Err(e) => json!({ "ok": false, "error": e.to_string() }),
    }
}

fn start_json(result: &Result<StartOutcome, SupervisorError>) -> Value {
    match result {
        Ok(outcome) => {
            let mut value = serde_json::to_value(outcome).unwrap_or(Value::Null);
            if let Value::Object(map) = &mut value {
                map.insert("ok".to_string(), Value::Bool(true));
            }
            value
        }
        Err(e) => json!({ "ok": false, "error": e.to_string() }),
    }
}

fn stop_json(result: &Result<Vec<DeviceId>, SupervisorError>) -> Value {
    match result {
        Ok(stopped) => json!({ "ok": true, "stopped": stopped }),
        Err(e) => json!({ "ok": false, "error": e.to_string() }),
    }
}

fn delivery_response(result: Result<DeliveryReport, RouteError>) -> Json<Value> {
    Json(json!({ "notified": delivery_json(&result) }))
}

// ============================================================================
// Query Endpoints
// ============================================================================

/// GET /api/clients
pub async fn clients(State(coordinator): State<SessionCoordinator>) -> Json<ClientsResponse> {
    Json(ClientsResponse {
        clients: coordinator.devices().await,
    })
}

/// GET /api/sessions
pub async fn sessions(
    State(coordinator): State<SessionCoordinator>,
) -> Json<Vec<DeviceSessionView>> {
    Json(coordinator.sessions().await)
}

/// GET /api/server_info
pub async fn server_info(State(coordinator): State<SessionCoordinator>) -> Json<ServerInfo> {
    Json(coordinator.server_info())
}

/// GET /api/live_config
pub async fn get_live_config(
    State(coordinator): State<SessionCoordinator>,
) -> Json<LiveCaptureConfig> {
    Json(coordinator.live_config().await)
}

/// POST /api/live_config
///
/// Answers `{ok: true, config}` with the settings now in effect.
pub async fn set_live_config(
    State(coordinator): State<SessionCoordinator>,
    Json(update): Json<LiveCaptureUpdate>,
) -> Json<Value> {
    let config = coordinator.update_live_config(update).await;
    Json(json!({ "ok": true, "config": config }))
}

/// GET /api/live_status?target=<id|all>
///
/// A missing or empty target means all relays.
pub async fn live_status(
    State(coordinator): State<SessionCoordinator>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<LiveStatusResponse>, ApiError> {
    let target = match query.target.as_deref().map(str::trim) {
        None | Some("") => Target::All,
        Some(t) => parse_target(Some(t))?,
    };
    let status = coordinator.live_status(&target).await;
    Ok(Json(LiveStatusResponse {
        running: status.running,
    }))
}

/// GET /api/relays
pub async fn relays(State(coordinator): State<SessionCoordinator>) -> Json<Vec<RelayInfo>> {
    Json(coordinator.relays().await)
}

// ============================================================================
// Intent Endpoints
// ============================================================================

/// POST /api/send {target, payload}
///
/// Replies `{ok: true}` once the payload was handed to the coordinator,
/// whatever the delivery outcome.
pub async fn send(
    State(coordinator): State<SessionCoordinator>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let target = body.get("target").and_then(Value::as_str);
    let payload = body.get("payload").filter(|p| p.is_object()).cloned();

    let (Some(target), Some(payload)) = (target, payload) else {
        return Err(ApiError::BadRequest("missing target or payload".to_string()));
    };
    let target = parse_target(Some(target))?;

    let outcome = coordinator.send_raw(&target, payload).await;
    debug!(
        route = %target,
        notified = outcome.notified.is_ok(),
        relay = ?outcome.relay.as_ref().map(relay_action_json),
        "Raw send handled"
    );
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/live_start {target, rtp_ip, rtp_port, frame_ms?}
pub async fn live_start(
    State(coordinator): State<SessionCoordinator>,
    Json(body): Json<LiveStartBody>,
) -> Result<Json<Value>, ApiError> {
    let target = parse_target(body.target.as_deref())?;
    let rtp_ip = body
        .rtp_ip
        .filter(|ip| !ip.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing rtp_ip".to_string()))?;
    let rtp_port = body
        .rtp_port
        .filter(|&p| p > 0)
        .ok_or_else(|| ApiError::BadRequest("missing rtp_port".to_string()))?;

    let outcome = coordinator
        .live_start(
            &target,
            LiveStartRequest {
                rtp_ip,
                rtp_port,
                frame_ms: body.frame_ms,
            },
        )
        .await;

    Ok(Json(json!({
        "notified": delivery_json(&outcome.notified),
        "relay": start_json(&outcome.relay),
    })))
}

/// POST /api/live_stop {target}
pub async fn live_stop(
    State(coordinator): State<SessionCoordinator>,
    Json(body): Json<TargetBody>,
) -> Result<Json<Value>, ApiError> {
    let target = parse_target(body.target.as_deref())?;
    let outcome = coordinator.live_stop(&target).await;

    Ok(Json(json!({
        "notified": delivery_json(&outcome.notified),
        "relay": stop_json(&outcome.stopped),
    })))
}

/// POST /api/file_play {target, url, store_policy?}
pub async fn file_play(
    State(coordinator): State<SessionCoordinator>,
    Json(body): Json<FilePlayBody>,
) -> Result<Json<Value>, ApiError> {
    let target = parse_target(body.target.as_deref())?;
    let url = body
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing url".to_string()))?;

    let result = coordinator
        .file_play(
            &target,
            FilePlayRequest {
                url,
                store_policy: body.store_policy,
            },
        )
        .await;
    Ok(delivery_response(result))
}

/// POST /api/file_stop {target}
pub async fn file_stop(
    State(coordinator): State<SessionCoordinator>,
    Json(body): Json<TargetBody>,
) -> Result<Json<Value>, ApiError> {
    let target = parse_target(body.target.as_deref())?;
    Ok(delivery_response(coordinator.file_stop(&target).await))
}

/// POST /api/status_req {target}
pub async fn status_req(
    State(coordinator): State<SessionCoordinator>,
    Json(body): Json<TargetBody>,
) -> Result<Json<Value>, ApiError> {
    let target = parse_target(body.target.as_deref())?;
    Ok(delivery_response(coordinator.status_req(&target).await))
}

/// POST /api/disconnect {target}
pub async fn disconnect(
    State(coordinator): State<SessionCoordinator>,
    Json(body): Json<TargetBody>,
) -> Result<Json<Value>, ApiError> {
    let target = parse_target(body.target.as_deref())?;
    Ok(delivery_response(coordinator.disconnect(&target).await))
}

/// Renders a raw-send relay action.
pub fn relay_action_json(action: &RelayAction) -> Value {
    match action {
        RelayAction::Started(result) => start_json(result),
        RelayAction::Stopped(result) => stop_json(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target(Some("all")).unwrap(), Target::All);
        assert_eq!(parse_target(Some(" hall ")).unwrap(), Target::device("hall"));
        assert!(parse_target(Some("")).is_err());
        assert!(parse_target(None).is_err());
    }

    #[test]
    fn test_delivery_json() {
        let ok = delivery_json(&Ok(DeliveryReport {
            delivered: vec![DeviceId::new("a")],
            skipped: vec![],
        }));
        assert_eq!(ok["ok"], true);
        assert_eq!(ok["delivered"][0], "a");

        let err = delivery_json(&Err(RouteError::NotConnected(DeviceId::new("b"))));
        assert_eq!(err["ok"], false);
        assert_eq!(err["error"], "device not connected: b");
    }

    #[test]
    fn test_relay_action_json() {
        let started = relay_action_json(&RelayAction::Started(Ok(StartOutcome::AlreadyRunning)));
        assert_eq!(started["ok"], true);
        assert_eq!(started["outcome"], "already_running");

        let stopped = relay_action_json(&RelayAction::Stopped(Ok(vec![DeviceId::new("all")])));
        assert_eq!(stopped["stopped"][0], "all");
    }
}
