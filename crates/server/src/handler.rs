//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use crate::app::App;
use crate::commands::Dispatcher;
use crate::tools::{
    ChatMessageParams, WebAnalyzeParams, analyze_impl,
    cache::{clear_impl, stats_impl},
    chat_message_impl,
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult,
        PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for linkscope.
#[derive(Clone)]
pub struct LinkscopeServer {
    tool_router: ToolRouter<Self>,
    app: Arc<App>,
    dispatcher: Arc<Dispatcher>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl LinkscopeServer {
    pub fn new(app: Arc<App>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(app.clone()));
        Self { tool_router: Self::tool_router(), app, dispatcher }
    }

    /// Handle one chat message: `/command` text or plain text with links.
    #[tool(
        description = "Handle a chat message. Runs chat commands such as /analyze, /export and /help, or analyzes links in plain text. Returns the reply text plus screenshot and export file paths."
    )]
    async fn chat_message(
        &self,
        params: Parameters<ChatMessageParams>,
    ) -> Result<CallToolResult, McpError> {
        chat_message_impl(&self.dispatcher, params.0).await
    }

    /// Analyze a batch of URLs.
    #[tool(
        description = "Fetch, extract, and summarize web pages, optionally with screenshots. Returns one result per distinct URL in input order; failures are reported per URL."
    )]
    async fn web_analyze(
        &self,
        params: Parameters<WebAnalyzeParams>,
    ) -> Result<CallToolResult, McpError> {
        analyze_impl(&self.app, params.0).await
    }

    #[tool(
        description = "Report result cache, persistent cache, screenshot store, and activity counters."
    )]
    async fn cache_stats(&self) -> Result<CallToolResult, McpError> {
        stats_impl(&self.app).await
    }

    #[tool(description = "Remove every cached analysis result and screenshot.")]
    async fn cache_clear(&self) -> Result<CallToolResult, McpError> {
        clear_impl(&self.app).await
    }
}

impl ServerHandler for LinkscopeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "linkscope".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some("Send chat text to chat_message, or URLs to web_analyze.".into()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::app;

    #[test]
    fn test_lists_every_tool() {
        let t = app();
        let server = LinkscopeServer::new(t.app.clone());
        let mut names: Vec<String> = server
            .tool_router
            .list_all()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();
        names.sort();
        assert_eq!(names, ["cache_clear", "cache_stats", "chat_message", "web_analyze"]);
    }

    #[test]
    fn test_server_info() {
        let t = app();
        let info = LinkscopeServer::new(t.app.clone()).get_info();
        assert_eq!(info.server_info.name, "linkscope");
    }
}
