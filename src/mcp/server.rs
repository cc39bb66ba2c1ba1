//! The central Model Context Protocol engine
//!
//! Decodes JSON-RPC messages arriving on a session, negotiates `initialize`, and routes
//! `tools/*` calls into the [`ToolRegistry`]. Every handled action is audit-logged.

use async_trait::async_trait;
use rust_mcp_sdk::schema::{
    CallToolRequest, CallToolRequestParams, Implementation, InitializeRequest, InitializeResult,
    JsonrpcMessage, JsonrpcRequest, ListToolsRequest, ListToolsResult, PingRequest,
    ProtocolVersion, ServerCapabilities, ServerCapabilitiesTools,
};
use serde_json::{json, Value};
use tracing::info;

use crate::{
    auth::Identity,
    domain::dispatcher::{DispatchError, ToolRegistry},
    errors::AppError,
    mcp::rpc::{
        app_error_to_json_rpc, is_json_rpc_error, json_rpc_error, json_rpc_error_with_data,
        json_rpc_result, request_id_to_value, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    },
    session::MessageHandler,
};

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";

/// Who is calling and over which session.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub session_id: &'a str,
    pub identity: &'a Identity,
}

pub struct McpServer {
    tools: ToolRegistry,
}

impl McpServer {
    pub fn new(tools: ToolRegistry) -> Self {
        Self { tools }
    }

    pub async fn handle_message(&self, ctx: CallContext<'_>, payload: Value) -> Option<Value> {
        let batch = match payload {
            Value::Array(batch) => batch,
            single => return self.handle_json_rpc_value(ctx, single).await,
        };

        if batch.is_empty() {
            return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
        }

        let mut responses = Vec::new();
        for item in batch {
            if let Some(response) = self.handle_json_rpc_value(ctx, item).await {
                responses.push(response);
            }
        }

        if responses.is_empty() {
            None
        } else {
            Some(Value::Array(responses))
        }
    }

    pub async fn handle_json_rpc_value(&self, ctx: CallContext<'_>, payload: Value) -> Option<Value> {
        if !payload.is_object() {
            return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
        }

        let request_id = payload.get("id").cloned();
        let parsed: JsonrpcMessage = match serde_json::from_value(payload) {
            Ok(message) => message,
            Err(_) => return Some(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request")),
        };

        match parsed {
            JsonrpcMessage::Request(request) => {
                if let Err(error_response) = validate_request_shape(&request) {
                    return Some(error_response);
                }

                let request_id = request_id_to_value(request.id);
                if request.method.trim().is_empty() {
                    return Some(json_rpc_error(Some(request_id), INVALID_REQUEST, "Invalid Request"));
                }

                Some(
                    self.handle_json_rpc_request(
                        ctx,
                        Some(request_id),
                        request.method,
                        request.params.map(Value::Object),
                    )
                    .await,
                )
            }
            JsonrpcMessage::Notification(notification) => {
                info!(
                    session_id = %ctx.session_id,
                    method = %notification.method,
                    "mcp notification received"
                );
                None
            }
            JsonrpcMessage::ResultResponse(_) | JsonrpcMessage::ErrorResponse(_) => {
                Some(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request"))
            }
        }
    }

    pub async fn handle_json_rpc_request(
        &self,
        ctx: CallContext<'_>,
        id: Option<Value>,
        method: String,
        params: Option<Value>,
    ) -> Value {
        let audit_params = redact_audit_params(params.as_ref());

        let response = match method.as_str() {
            "initialize" => match negotiate_protocol_version(params.as_ref()) {
                Ok(version) => json_rpc_result(
                    id,
                    serde_json::to_value(initialize_result(version))
                        .expect("initialize result serialization"),
                ),
                Err(err) => app_error_to_json_rpc(id, err),
            },
            "ping" => json_rpc_result(id, json!({})),
            "tools/list" => json_rpc_result(
                id,
                serde_json::to_value(ListToolsResult {
                    meta: None,
                    next_cursor: None,
                    tools: self.tools.definitions(),
                })
                .expect("tools list result serialization"),
            ),
            "tools/call" => self.handle_tools_call(ctx, id, params).await,
            _ => json_rpc_error(id, METHOD_NOT_FOUND, "Method not found"),
        };

        info!(
            session_id = %ctx.session_id,
            subject = %ctx.identity.subject,
            method = %method,
            params = %audit_params,
            outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
            "mcp action audited"
        );

        response
    }

    async fn handle_tools_call(
        &self,
        ctx: CallContext<'_>,
        id: Option<Value>,
        params: Option<Value>,
    ) -> Value {
        let Some(raw_params) = params else {
            return json_rpc_error(id, INVALID_PARAMS, "Invalid params");
        };

        let tool_call: CallToolRequestParams = match serde_json::from_value(raw_params) {
            Ok(value) => value,
            Err(_) => return json_rpc_error(id, INVALID_PARAMS, "Invalid params"),
        };
        let arguments = Value::Object(tool_call.arguments.unwrap_or_default());

        match self
            .tools
            .call(&tool_call.name, ctx.identity, arguments)
            .await
        {
            Ok(result) => json_rpc_result(
                id,
                serde_json::to_value(result).expect("tool result serialization"),
            ),
            Err(DispatchError::InvalidParameters(err)) => app_error_to_json_rpc(id, err),
            Err(DispatchError::UnknownTool(name)) => json_rpc_error_with_data(
                id,
                METHOD_NOT_FOUND,
                "Method not found",
                Some(json!({
                    "code": "tool_not_found",
                    "message": "unknown tool name",
                    "details": {
                        "name": name,
                    },
                })),
            ),
        }
    }
}

#[async_trait]
impl MessageHandler for McpServer {
    async fn handle(&self, session_id: &str, identity: &Identity, message: Value) -> Option<Value> {
        self.handle_message(
            CallContext {
                session_id,
                identity,
            },
            message,
        )
        .await
    }
}

fn initialize_result(version: ProtocolVersion) -> InitializeResult {
    InitializeResult {
        server_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(false),
            }),
            resources: None,
            prompts: None,
            ..Default::default()
        },
        protocol_version: version.into(),
        instructions: None,
        meta: None,
    }
}

pub fn validate_request_shape(request: &JsonrpcRequest) -> Result<(), Value> {
    let payload = serde_json::to_value(request).expect("jsonrpc request serialization");
    let request_id = Some(request_id_to_value(request.id.clone()));

    let valid = match request.method.as_str() {
        "tools/call" => serde_json::from_value::<CallToolRequest>(payload).is_ok(),
        "tools/list" => serde_json::from_value::<ListToolsRequest>(payload).is_ok(),
        "ping" => serde_json::from_value::<PingRequest>(payload).is_ok(),
        "initialize" => serde_json::from_value::<InitializeRequest>(payload).is_ok(),
        _ => true,
    };

    if valid {
        Ok(())
    } else {
        Err(json_rpc_error(request_id, INVALID_PARAMS, "Invalid params"))
    }
}

pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<ProtocolVersion, AppError> {
    let offered_version = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| {
            AppError::bad_request(
                "invalid_protocol_version",
                "initialize params.protocolVersion is required",
            )
        })?;

    if offered_version != SUPPORTED_PROTOCOL_VERSION {
        return Err(AppError::bad_request(
            "unsupported_protocol_version",
            "unsupported initialize protocolVersion",
        ));
    }

    Ok(ProtocolVersion::V2024_11_05)
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}
