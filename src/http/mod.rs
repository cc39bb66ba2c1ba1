//! HTTP transport layer for the Model Context Protocol
//!
//! The SSE stream endpoint, the per-session message endpoint, and public metadata endpoints.

pub mod handlers;

pub const SSE_PATH: &str = "/api/sse";
pub const MESSAGES_PATH: &str = "/api/messages";
