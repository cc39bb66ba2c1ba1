use std::time::Instant;

use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::http::MESSAGES_PATH;

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let has_authorization = request.headers().contains_key(header::AUTHORIZATION);
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    // For the SSE endpoint this covers the handshake only; the stream outlives it.
    let elapsed_ms = started_at.elapsed().as_millis();

    info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = elapsed_ms,
        "request summary"
    );

    match status {
        StatusCode::UNAUTHORIZED => {
            warn!(method = %method, path = %path, has_authorization, "authentication failure");
        }
        StatusCode::NOT_FOUND if path == MESSAGES_PATH => {
            warn!(path = %path, "message rejected: no live session");
        }
        _ => {}
    }

    response
}
