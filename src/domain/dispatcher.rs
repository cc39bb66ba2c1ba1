//! Named tool registry and invocation
//!
//! Tools are registered once at startup. A call deserializes the arguments into the tool's
//! typed parameters and validates them before anything executes; failures raised by the
//! tool itself become an error content part instead of a protocol error.

use async_trait::async_trait;
use rust_mcp_sdk::schema::{CallToolResult, ContentBlock, TextContent, Tool};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::{auth::Identity, errors::AppError};

#[async_trait]
pub trait McpTool: Send + Sync + 'static {
    type Params: DeserializeOwned + Send;

    fn definition(&self) -> Tool;

    /// Range and shape rules the schema alone cannot express.
    fn validate(&self, _params: &Self::Params) -> Result<(), AppError> {
        Ok(())
    }

    async fn execute(
        &self,
        identity: &Identity,
        params: Self::Params,
    ) -> Result<CallToolResult, AppError>;
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(AppError),
}

#[async_trait]
trait RegisteredTool: Send + Sync {
    fn definition(&self) -> Tool;

    async fn invoke(
        &self,
        identity: &Identity,
        arguments: Value,
    ) -> Result<CallToolResult, DispatchError>;
}

struct Registered<T>(T);

#[async_trait]
impl<T: McpTool> RegisteredTool for Registered<T> {
    fn definition(&self) -> Tool {
        self.0.definition()
    }

    async fn invoke(
        &self,
        identity: &Identity,
        arguments: Value,
    ) -> Result<CallToolResult, DispatchError> {
        let params: T::Params = serde_json::from_value(arguments).map_err(|_| {
            DispatchError::InvalidParameters(AppError::bad_request(
                "invalid_arguments",
                "tool arguments do not match the input schema",
            ))
        })?;
        self.0
            .validate(&params)
            .map_err(DispatchError::InvalidParameters)?;

        match self.0.execute(identity, params).await {
            Ok(result) => Ok(result),
            Err(err) => {
                let tool = self.0.definition().name;
                error!(tool = %tool, subject = %identity.subject, error = ?err, "tool execution failed");
                Ok(tool_error_result(&err))
            }
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<(String, Box<dyn RegisteredTool>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: McpTool>(mut self, tool: T) -> Self {
        let name = tool.definition().name;
        if let Some(index) = self.tools.iter().position(|(existing, _)| *existing == name) {
            warn!(tool = %name, "replacing previously registered tool");
            self.tools.remove(index);
        }
        self.tools.push((name, Box::new(Registered(tool))));
        self
    }

    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.iter().map(|(_, tool)| tool.definition()).collect()
    }

    pub async fn call(
        &self,
        name: &str,
        identity: &Identity,
        arguments: Value,
    ) -> Result<CallToolResult, DispatchError> {
        let tool = self
            .tools
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, tool)| tool)
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))?;

        tool.invoke(identity, arguments).await
    }
}

pub fn text_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(text.into(), None, None))],
        is_error: None,
        meta: None,
        structured_content: None,
    }
}

pub fn tool_error_result(err: &AppError) -> CallToolResult {
    let message = match err {
        AppError::BadRequest { message, .. } | AppError::Unauthorized { message, .. } => {
            (*message).to_string()
        }
        AppError::Internal { message, .. } => message.clone(),
    };

    CallToolResult {
        is_error: Some(true),
        ..text_result(format!("Error: {message}"))
    }
}
