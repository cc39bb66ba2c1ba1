//! Bearer-token gate for the MCP endpoints
//!
//! Every protected request is re-authenticated: the `Authorization` header is parsed,
//! the token is handed to the configured [`TokenVerifier`], and the resolved
//! [`Identity`] is attached to the request extensions for the wrapped handler.

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeaderRejection,
    TypedHeader,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{errors::ErrorResponse, AppState};

pub const RESOURCE_METADATA_PATH: &str = "/.well-known/oauth-protected-resource";

/// The caller resolved from a verified bearer token. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject: String,
    pub scopes: Vec<String>,
}

impl Identity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            scopes: Vec::new(),
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,
    #[error("authorization scheme must be Bearer")]
    MalformedScheme,
    #[error("bearer token is empty")]
    EmptyToken,
    #[error("bearer token must not contain whitespace")]
    MalformedToken,
    #[error("bearer token was rejected")]
    VerificationRejected,
    #[error("verified token carries no subject claim")]
    MissingSubject,
    #[error("identity provider error: {0}")]
    Provider(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_token",
            Self::MalformedScheme => "invalid_scheme",
            Self::EmptyToken => "empty_token",
            Self::MalformedToken => "malformed_token",
            Self::VerificationRejected => "invalid_token",
            Self::MissingSubject => "missing_subject",
            Self::Provider(_) => "verification_failed",
        }
    }
}

/// Resolves a bearer token to an [`Identity`].
///
/// Implementations are chosen once at startup and shared by every request.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str, request: &Parts) -> Result<Identity, AuthError>;
}

/// Accepts any token and resolves it to a fixed identity.
#[derive(Debug, Clone)]
pub struct StaticVerifier {
    identity: Identity,
}

impl StaticVerifier {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl TokenVerifier for StaticVerifier {
    async fn verify(&self, _token: &str, _request: &Parts) -> Result<Identity, AuthError> {
        Ok(self.identity.clone())
    }
}

/// Accepts exactly one pre-shared API token.
#[derive(Debug, Clone)]
pub struct SharedTokenVerifier {
    api_token: String,
    identity: Identity,
}

impl SharedTokenVerifier {
    pub fn new(api_token: impl Into<String>, identity: Identity) -> Self {
        Self {
            api_token: api_token.into(),
            identity,
        }
    }
}

#[async_trait]
impl TokenVerifier for SharedTokenVerifier {
    async fn verify(&self, token: &str, _request: &Parts) -> Result<Identity, AuthError> {
        if constant_time_eq(token, &self.api_token) {
            Ok(self.identity.clone())
        } else {
            Err(AuthError::VerificationRejected)
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

pub async fn require_bearer_token(
    State(state): State<AppState>,
    auth_header: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request_origin(request.headers(), request.uri());
    let (mut parts, body) = request.into_parts();

    match authenticate(state.verifier.as_ref(), auth_header, &parts).await {
        Ok(identity) => {
            debug!(subject = %identity.subject, "bearer token accepted");
            parts.extensions.insert(identity);
            next.run(Request::from_parts(parts, body)).await
        }
        Err(err) => {
            warn!(code = err.code(), error = %err, "bearer authentication rejected");
            unauthorized(&origin, &err)
        }
    }
}

async fn authenticate(
    verifier: &dyn TokenVerifier,
    auth_header: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    parts: &Parts,
) -> Result<Identity, AuthError> {
    let token = match auth_header {
        Ok(TypedHeader(_)) => raw_bearer_credentials(&parts.headers).unwrap_or_default(),
        Err(rejection) if rejection.is_missing() => return Err(AuthError::MissingHeader),
        Err(_) => return Err(classify_rejected_header(&parts.headers)),
    };

    if token.trim().is_empty() {
        return Err(AuthError::EmptyToken);
    }
    if token.contains(char::is_whitespace) {
        return Err(AuthError::MalformedToken);
    }

    let identity = verifier.verify(token, parts).await?;
    if identity.subject.trim().is_empty() {
        return Err(AuthError::VerificationRejected);
    }

    Ok(identity)
}

// Credentials after the `Bearer ` prefix, untrimmed. `Bearer::token` strips leading spaces.
fn raw_bearer_credentials(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.get("Bearer ".len()..))
}

// The typed header refuses both foreign schemes and a bare "Bearer"; tell them apart.
fn classify_rejected_header(headers: &HeaderMap) -> AuthError {
    let bare_bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("bearer"));

    if bare_bearer {
        AuthError::EmptyToken
    } else {
        AuthError::MalformedScheme
    }
}

/// Origin (`scheme://host`) the client used to reach us.
pub fn request_origin(headers: &HeaderMap, uri: &Uri) -> String {
    if let (Some(scheme), Some(authority)) = (uri.scheme_str(), uri.authority()) {
        return format!("{scheme}://{authority}");
    }

    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("localhost");

    format!("{scheme}://{host}")
}

pub fn resource_metadata_url(origin: &str) -> String {
    format!("{origin}{RESOURCE_METADATA_PATH}")
}

fn unauthorized(origin: &str, err: &AuthError) -> Response {
    let challenge = format!("Bearer resource_metadata={}", resource_metadata_url(origin));

    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        Json(ErrorResponse {
            code: err.code().to_string(),
            message: err.to_string(),
            details: json!({}),
        }),
    )
        .into_response()
}
