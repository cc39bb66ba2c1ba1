//! Per-session SSE transport registry
//!
//! A session is created when a client opens the event stream and lives exactly as long as
//! that stream. Messages posted for a session are handed to the [`MessageHandler`] and any
//! response is pushed back down the session's stream.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::Stream;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Identity;

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Processes one inbound protocol message for a session.
///
/// Returns the message to push back to the client, or `None` when nothing should be sent
/// (notifications).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, session_id: &str, identity: &Identity, message: Value)
        -> Option<Value>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no transport found for session {0}")]
    UnknownSession(String),
    #[error("event stream for session {0} is closed")]
    StreamClosed(String),
    #[error("event stream for session {0} is not draining")]
    StreamStalled(String),
}

#[derive(Clone)]
struct SessionTransport {
    outbound: mpsc::Sender<Value>,
}

pub struct SessionRegistry {
    sessions: DashMap<String, SessionTransport>,
    handler: Arc<dyn MessageHandler>,
    buffer: usize,
    delivery_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(handler: Arc<dyn MessageHandler>, buffer: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            handler,
            buffer: buffer.max(1),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    /// How long `route` waits for room in a full session buffer before giving up.
    pub fn with_delivery_timeout(mut self, delivery_timeout: Duration) -> Self {
        self.delivery_timeout = delivery_timeout;
        self
    }

    /// Registers a new session and returns its id together with the outbound stream.
    ///
    /// Dropping the returned stream closes the session.
    pub fn open(self: &Arc<Self>) -> SessionStream {
        let (outbound, inbound) = mpsc::channel(self.buffer);
        let session_id = Uuid::new_v4().to_string();

        self.sessions
            .insert(session_id.clone(), SessionTransport { outbound });
        info!(session_id = %session_id, open_sessions = self.sessions.len(), "session opened");

        SessionStream {
            session_id: session_id.clone(),
            messages: ReceiverStream::new(inbound),
            _guard: SessionGuard {
                registry: Arc::clone(self),
                session_id,
            },
        }
    }

    /// Forwards `message` into the session's transport.
    pub async fn route(
        &self,
        session_id: &str,
        identity: &Identity,
        message: Value,
    ) -> Result<(), SessionError> {
        // Clone the handle out so no map guard is held across an await.
        let transport = self
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;

        let Some(response) = self.handler.handle(session_id, identity, message).await else {
            return Ok(());
        };

        match transport
            .outbound
            .send_timeout(response, self.delivery_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => {
                Err(SessionError::StreamClosed(session_id.to_string()))
            }
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(
                    session_id = %session_id,
                    timeout_ms = self.delivery_timeout.as_millis() as u64,
                    "session buffer full, dropping response"
                );
                Err(SessionError::StreamStalled(session_id.to_string()))
            }
        }
    }

    /// Removes the session. Returns `false` when it was already gone.
    pub fn close(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            info!(session_id = %session_id, open_sessions = self.sessions.len(), "session closed");
        } else {
            debug!(session_id = %session_id, "close for unknown session ignored");
        }
        removed
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

struct SessionGuard {
    registry: Arc<SessionRegistry>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.close(&self.session_id);
    }
}

/// Outbound messages for one session. The session is removed when this is dropped.
pub struct SessionStream {
    session_id: String,
    messages: ReceiverStream<Value>,
    _guard: SessionGuard,
}

impl SessionStream {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Stream for SessionStream {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.messages).poll_next(cx)
    }
}
