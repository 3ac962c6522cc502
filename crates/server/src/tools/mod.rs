//! MCP tool implementations.
//!
//! This module contains all tools exposed by the linkscope server.

pub mod cache;
pub mod chat_message;
pub mod web_analyze;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

pub use chat_message::{ChatMessageParams, chat_message_impl};
pub use web_analyze::{WebAnalyzeParams, analyze_impl};

/// Successful tool result carrying `output` as pretty JSON.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output).map_err(|e| {
        linkscope_core::Error::InvalidInput(format!("Failed to serialize output: {e}"))
    })?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
