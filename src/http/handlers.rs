//! Axum HTTP handlers for the web server

use std::{convert::Infallible, time::Duration};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use crate::{
    auth::{request_origin, Identity},
    errors::AppError,
    http::{MESSAGES_PATH, SSE_PATH},
    session::SessionError,
    AppState,
};

pub const NO_TRANSPORT_BODY: &str = "No transport found for sessionId";
pub const HANDLING_ERROR_BODY: &str = "Error handling message";

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub sse_endpoint: &'static str,
    pub messages_endpoint: &'static str,
}

/// OAuth protected resource metadata (RFC 9728).
#[derive(Debug, Serialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    pub authorization_servers: Vec<String>,
    pub bearer_methods_supported: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        sse_endpoint: SSE_PATH,
        messages_endpoint: MESSAGES_PATH,
    })
}

pub async fn protected_resource_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Json<ProtectedResourceMetadata> {
    let origin = request_origin(&headers, &uri);

    Json(ProtectedResourceMetadata {
        resource: format!("{origin}{SSE_PATH}"),
        authorization_servers: state
            .authorization_server
            .iter()
            .map(|server| server.to_string())
            .collect(),
        bearer_methods_supported: vec!["header"],
    })
}

/// Opens a session and streams its outbound messages until the client goes away.
///
/// The first event is the MCP `endpoint` handshake telling the client where to post.
pub async fn sse_endpoint(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session = state.sessions.open();
    let session_id = session.session_id().to_string();
    info!(session_id = %session_id, subject = %identity.subject, "event stream opened");

    let handshake = tokio_stream::once(Ok::<_, Infallible>(
        Event::default()
            .event("endpoint")
            .data(format!("{MESSAGES_PATH}?sessionId={session_id}")),
    ));
    let messages = session.filter_map(move |message| {
        match Event::default().event("message").json_data(&message) {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                error!(session_id = %session_id, error = %err, "failed to encode outbound message");
                None
            }
        }
    });

    Sse::new(handshake.chain(messages)).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

pub async fn messages_endpoint(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let message: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return AppError::bad_request("invalid_json", "message body must be valid JSON")
                .into_response()
        }
    };

    let Some(session_id) = query.session_id.filter(|id| !id.trim().is_empty()) else {
        warn!(subject = %identity.subject, "message posted without sessionId");
        return (StatusCode::NOT_FOUND, NO_TRANSPORT_BODY).into_response();
    };

    match state.sessions.route(&session_id, &identity, message).await {
        Ok(()) => (StatusCode::OK, "Accepted").into_response(),
        Err(SessionError::UnknownSession(_)) => {
            warn!(session_id = %session_id, subject = %identity.subject, "message for unknown session");
            (StatusCode::NOT_FOUND, NO_TRANSPORT_BODY).into_response()
        }
        Err(err @ (SessionError::StreamClosed(_) | SessionError::StreamStalled(_))) => {
            error!(session_id = %session_id, error = %err, "failed to deliver message response");
            (StatusCode::INTERNAL_SERVER_ERROR, HANDLING_ERROR_BODY).into_response()
        }
    }
}
