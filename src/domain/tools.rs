//! Tools exposed via Model Context Protocol
//!
//! `get_clerk_user_info`, `roll_dice` and `get_guitar_list`. Each typed params struct
//! doubles as the tool's input schema.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use rust_mcp_sdk::{
    macros,
    schema::{CallToolResult, Tool},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    auth::Identity,
    clerk_client::UserDirectory,
    domain::{
        catalog::guitars,
        dispatcher::{text_result, McpTool, ToolRegistry},
    },
    errors::AppError,
};

pub const MIN_DICE_SIDES: u32 = 2;

#[macros::mcp_tool(
    name = "get_clerk_user_info",
    description = "Returns user data about the Clerk user that authorized this tool call"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetClerkUserInfoTool {}

#[macros::mcp_tool(
    name = "roll_dice",
    description = "Rolls an N-sided die and returns the result"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct RollDiceTool {
    /// Number of sides on the die, at least 2
    #[json_schema(minimum = 2)]
    pub sides: u32,
}

#[macros::mcp_tool(
    name = "get_guitar_list",
    description = "Get the list of guitars sold in the store"
)]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetGuitarListTool {}

pub fn build_tool_registry(directory: Arc<dyn UserDirectory>) -> ToolRegistry {
    ToolRegistry::new()
        .register(UserInfo { directory })
        .register(RollDice)
        .register(GuitarList)
}

pub struct UserInfo {
    directory: Arc<dyn UserDirectory>,
}

#[async_trait]
impl McpTool for UserInfo {
    type Params = GetClerkUserInfoTool;

    fn definition(&self) -> Tool {
        GetClerkUserInfoTool::tool()
    }

    async fn execute(
        &self,
        identity: &Identity,
        _params: GetClerkUserInfoTool,
    ) -> Result<CallToolResult, AppError> {
        if identity.subject.trim().is_empty() {
            return Err(AppError::unauthorized(
                "user_not_authenticated",
                "user not authenticated",
            ));
        }

        let user = self.directory.get_user(&identity.subject).await?;
        let text = serde_json::to_string(&user)
            .map_err(|err| AppError::internal(format!("failed to encode user record: {err}")))?;

        Ok(CallToolResult {
            structured_content: user.as_object().cloned(),
            ..text_result(text)
        })
    }
}

pub struct RollDice;

#[async_trait]
impl McpTool for RollDice {
    type Params = RollDiceTool;

    fn definition(&self) -> Tool {
        RollDiceTool::tool()
    }

    fn validate(&self, params: &RollDiceTool) -> Result<(), AppError> {
        if params.sides < MIN_DICE_SIDES {
            return Err(AppError::bad_request(
                "invalid_sides",
                "sides must be an integer of at least 2",
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        _identity: &Identity,
        params: RollDiceTool,
    ) -> Result<CallToolResult, AppError> {
        let value = roll(params.sides);

        Ok(CallToolResult {
            structured_content: Some(serde_json::Map::from_iter([
                ("value".to_string(), json!(value)),
                ("sides".to_string(), json!(params.sides)),
                (
                    "rolled_at_utc".to_string(),
                    json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
                ),
            ])),
            ..text_result(format!("You rolled a {value}"))
        })
    }
}

fn roll(sides: u32) -> u32 {
    rand::thread_rng().gen_range(1..=sides)
}

pub struct GuitarList;

#[async_trait]
impl McpTool for GuitarList {
    type Params = GetGuitarListTool;

    fn definition(&self) -> Tool {
        GetGuitarListTool::tool()
    }

    async fn execute(
        &self,
        _identity: &Identity,
        _params: GetGuitarListTool,
    ) -> Result<CallToolResult, AppError> {
        let catalog = guitars();
        let listing = serde_json::to_value(catalog)
            .map_err(|err| AppError::internal(format!("failed to encode catalog: {err}")))?;

        Ok(CallToolResult {
            structured_content: Some(serde_json::Map::from_iter([
                ("total".to_string(), json!(catalog.len())),
                ("guitars".to_string(), listing.clone()),
            ])),
            ..text_result(listing.to_string())
        })
    }
}
