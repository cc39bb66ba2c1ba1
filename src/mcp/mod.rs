//! Model Context Protocol engine
//!
//! JSON-RPC decoding and method routing for messages arriving on a session, plus the
//! response envelopes pushed back down the session stream.

pub mod rpc;
pub mod server;
