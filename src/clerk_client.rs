use std::time::Duration;

use async_trait::async_trait;
use axum::http::request::Parts;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    auth::{AuthError, Identity, TokenVerifier},
    errors::AppError,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Looks up user records by identity subject.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Value, AppError>;
}

/// Directory used when no identity provider is configured; echoes the subject back.
#[derive(Debug, Default)]
pub struct StaticUserDirectory;

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn get_user(&self, user_id: &str) -> Result<Value, AppError> {
        Ok(json!({ "id": user_id }))
    }
}

#[derive(Debug, Deserialize)]
struct TokenVerification {
    subject: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    revoked: bool,
    #[serde(default)]
    expired: bool,
}

/// Clerk backend API client: verifies OAuth access tokens and fetches users.
#[derive(Debug, Clone)]
pub struct ClerkClient {
    http: reqwest::Client,
    api_url: String,
    secret_key: String,
}

impl ClerkClient {
    pub fn new(api_url: impl Into<String>, secret_key: impl Into<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::internal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            api_url: api_url.into(),
            secret_key: secret_key.into(),
        })
    }
}

#[async_trait]
impl TokenVerifier for ClerkClient {
    async fn verify(&self, token: &str, _request: &Parts) -> Result<Identity, AuthError> {
        let response = self
            .http
            .post(format!("{}/oauth_applications/access_tokens/verify", self.api_url))
            .bearer_auth(&self.secret_key)
            .json(&json!({ "access_token": token }))
            .send()
            .await
            .map_err(|err| AuthError::Provider(err.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            debug!(status = status.as_u16(), "clerk rejected access token");
            return Err(AuthError::VerificationRejected);
        }
        if !status.is_success() {
            return Err(AuthError::Provider(format!(
                "token verification returned {status}"
            )));
        }

        let verification: TokenVerification = response
            .json()
            .await
            .map_err(|err| AuthError::Provider(format!("invalid verification payload: {err}")))?;

        identity_from_verification(verification)
    }
}

fn identity_from_verification(verification: TokenVerification) -> Result<Identity, AuthError> {
    if verification.revoked || verification.expired {
        return Err(AuthError::VerificationRejected);
    }

    let subject = verification
        .subject
        .map(|subject| subject.trim().to_string())
        .filter(|subject| !subject.is_empty())
        .ok_or(AuthError::MissingSubject)?;

    Ok(Identity::new(subject).with_scopes(verification.scopes))
}

#[async_trait]
impl UserDirectory for ClerkClient {
    async fn get_user(&self, user_id: &str) -> Result<Value, AppError> {
        validate_user_id(user_id)?;

        let response = self
            .http
            .get(format!("{}/users/{user_id}", self.api_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|err| AppError::internal(format!("user lookup failed: {err}")))?;

        match response.status() {
            status if status.is_success() => response
                .json::<Value>()
                .await
                .map_err(|err| AppError::internal(format!("invalid user payload: {err}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!("clerk refused the configured secret key");
                Err(AppError::unauthorized(
                    "directory_unauthorized",
                    "identity provider rejected the server credentials",
                ))
            }
            status => Err(AppError::internal(format!(
                "user lookup for {user_id} returned {status}"
            ))),
        }
    }
}

fn validate_user_id(user_id: &str) -> Result<(), AppError> {
    let valid = !user_id.is_empty()
        && user_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');

    if valid {
        Ok(())
    } else {
        Err(AppError::bad_request(
            "invalid_user_id",
            "user id contains disallowed characters",
        ))
    }
}
