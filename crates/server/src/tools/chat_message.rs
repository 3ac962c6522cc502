//! chat_message tool implementation.
//!
//! Feeds one chat message through the command dispatcher.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::commands::{Dispatcher, Role};
use crate::present::Presentation;
use crate::tools::json_result;

/// Input parameters for the chat_message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChatMessageParams {
    /// The message text, e.g. `/analyze https://example.com` or plain text containing links.
    pub text: String,

    /// Role of the sender (default: user).
    #[serde(default)]
    pub role: Role,
}

/// Output structure for the chat_message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChatMessageOutput {
    /// Whether the message produced a reply.
    pub handled: bool,
    pub reply: Option<Presentation>,
}

/// Usage and permission problems come back as tool errors for the chat;
/// pipeline failures become MCP errors.
pub async fn chat_message_impl(
    dispatcher: &Dispatcher,
    params: ChatMessageParams,
) -> Result<CallToolResult, McpError> {
    match dispatcher.dispatch(&params.text, params.role).await {
        Ok(reply) => json_result(&ChatMessageOutput { handled: reply.is_some(), reply }),
        Err(e) if e.is_user_facing() => {
            Ok(CallToolResult::error(vec![Content::text(e.to_string())]))
        }
        Err(e) => Err(e.into()),
    }
}
