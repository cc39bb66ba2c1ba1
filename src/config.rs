use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

pub const DEFAULT_CLERK_API_URL: &str = "https://api.clerk.com/v1";
pub const DEFAULT_STUB_SUBJECT: &str = "user_123";
pub const DEFAULT_SESSION_BUFFER: usize = 32;
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 5_000;

/// How inbound bearer tokens are resolved to an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Every well-formed bearer token resolves to the stub subject.
    Stub,
    /// The token must equal `MCP_API_TOKEN`.
    Token { api_token: String },
    /// The token is verified against the Clerk backend API.
    Clerk { secret_key: String, api_url: String },
}

impl AuthMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stub => "stub",
            Self::Token { .. } => "token",
            Self::Clerk { .. } => "clerk",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub auth_mode: AuthMode,
    pub stub_subject: String,
    pub authorization_server: Option<String>,
    pub session_buffer: usize,
    pub delivery_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_API_TOKEN is required and must not be empty")]
    MissingApiToken,
    #[error("CLERK_SECRET_KEY is required when MCP_AUTH_MODE=clerk")]
    MissingClerkSecret,
    #[error("MCP_AUTH_MODE must be one of: stub, token, clerk")]
    InvalidAuthMode,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("MCP_SESSION_BUFFER must be a positive integer")]
    InvalidSessionBuffer,
    #[error("MCP_DELIVERY_TIMEOUT_MS must be a positive integer")]
    InvalidDeliveryTimeout,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let auth_mode = match non_empty("MCP_AUTH_MODE")
            .map(|mode| mode.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("token") => AuthMode::Token {
                api_token: non_empty("MCP_API_TOKEN").ok_or(ConfigError::MissingApiToken)?,
            },
            Some("stub") => AuthMode::Stub,
            Some("clerk") => AuthMode::Clerk {
                secret_key: non_empty("CLERK_SECRET_KEY")
                    .ok_or(ConfigError::MissingClerkSecret)?,
                api_url: non_empty("CLERK_API_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| DEFAULT_CLERK_API_URL.to_string()),
            },
            Some(_) => return Err(ConfigError::InvalidAuthMode),
        };

        let bind_addr = non_empty("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = non_empty("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);
        let session_buffer = non_empty("MCP_SESSION_BUFFER")
            .map(|value| {
                value
                    .parse::<usize>()
                    .ok()
                    .filter(|buffer| *buffer > 0)
                    .ok_or(ConfigError::InvalidSessionBuffer)
            })
            .transpose()?
            .unwrap_or(DEFAULT_SESSION_BUFFER);
        let delivery_timeout_ms = non_empty("MCP_DELIVERY_TIMEOUT_MS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .ok()
                    .filter(|millis| *millis > 0)
                    .ok_or(ConfigError::InvalidDeliveryTimeout)
            })
            .transpose()?
            .unwrap_or(DEFAULT_DELIVERY_TIMEOUT_MS);

        let config = Self {
            bind_addr,
            bind_port,
            auth_mode,
            stub_subject: non_empty("MCP_STUB_SUBJECT")
                .unwrap_or_else(|| DEFAULT_STUB_SUBJECT.to_string()),
            authorization_server: non_empty("MCP_AUTHORIZATION_SERVER"),
            session_buffer,
            delivery_timeout: Duration::from_millis(delivery_timeout_ms),
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn parse_defaults() {
        let config = parse(&[("MCP_API_TOKEN", "abc")]).expect("config should parse");
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 8080);
        assert_eq!(
            config.auth_mode,
            AuthMode::Token {
                api_token: "abc".to_string()
            }
        );
        assert_eq!(config.stub_subject, DEFAULT_STUB_SUBJECT);
        assert_eq!(config.session_buffer, DEFAULT_SESSION_BUFFER);
        assert_eq!(
            config.delivery_timeout,
            Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS)
        );
        assert!(config.authorization_server.is_none());
    }

    #[test]
    fn missing_token_fails() {
        let err = parse(&[]).expect_err("expected missing token error");
        assert!(matches!(err, ConfigError::MissingApiToken));
    }

    #[test]
    fn stub_mode_needs_no_secret() {
        let config = parse(&[("MCP_AUTH_MODE", "STUB"), ("MCP_STUB_SUBJECT", "user_42")])
            .expect("config should parse");
        assert_eq!(config.auth_mode, AuthMode::Stub);
        assert_eq!(config.stub_subject, "user_42");
    }

    #[test]
    fn clerk_mode_requires_secret_key() {
        let err = parse(&[("MCP_AUTH_MODE", "clerk")]).expect_err("expected missing secret");
        assert!(matches!(err, ConfigError::MissingClerkSecret));
    }

    #[test]
    fn clerk_mode_trims_api_url() {
        let config = parse(&[
            ("MCP_AUTH_MODE", "clerk"),
            ("CLERK_SECRET_KEY", "sk_test_1"),
            ("CLERK_API_URL", "http://localhost:9000/v1/"),
        ])
        .expect("config should parse");
        assert_eq!(
            config.auth_mode,
            AuthMode::Clerk {
                secret_key: "sk_test_1".to_string(),
                api_url: "http://localhost:9000/v1".to_string(),
            }
        );
    }

    #[test]
    fn unknown_auth_mode_fails() {
        let err = parse(&[("MCP_AUTH_MODE", "basic")]).expect_err("expected invalid mode");
        assert!(matches!(err, ConfigError::InvalidAuthMode));
    }

    #[test]
    fn invalid_port_fails() {
        let err = parse(&[("MCP_API_TOKEN", "abc"), ("BIND_PORT", "99999")])
            .expect_err("expected invalid port");
        assert!(matches!(err, ConfigError::InvalidPort));
    }

    #[test]
    fn zero_session_buffer_fails() {
        let err = parse(&[("MCP_API_TOKEN", "abc"), ("MCP_SESSION_BUFFER", "0")])
            .expect_err("expected invalid buffer");
        assert!(matches!(err, ConfigError::InvalidSessionBuffer));
    }

    #[test]
    fn delivery_timeout_is_parsed_in_millis() {
        let config = parse(&[("MCP_API_TOKEN", "abc"), ("MCP_DELIVERY_TIMEOUT_MS", "250")])
            .expect("config should parse");
        assert_eq!(config.delivery_timeout, Duration::from_millis(250));

        let err = parse(&[("MCP_API_TOKEN", "abc"), ("MCP_DELIVERY_TIMEOUT_MS", "soon")])
            .expect_err("expected invalid timeout");
        assert!(matches!(err, ConfigError::InvalidDeliveryTimeout));
    }
}
