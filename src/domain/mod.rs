//! Storefront tools exposed over the MCP protocol
//!
//! The tool registry plus the concrete tools and the catalog they serve.

pub mod catalog;
pub mod dispatcher;
pub mod tools;
