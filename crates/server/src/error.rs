//! Chat command errors.
//!
//! Usage mistakes are reported back to the chat as text; pipeline and cache
//! errors surface as MCP errors.

use rmcp::model::ErrorData as McpError;

use crate::commands::Role;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// No command or alias matched.
    #[error("Unknown command: /{0}. Send /help for the command list.")]
    Unknown(String),

    /// The caller's role is below the command's requirement.
    #[error("/{command} requires the {required} role.")]
    Forbidden { command: String, required: Role },

    /// The command was recognised but its arguments were not.
    #[error("Usage: {0}")]
    Usage(String),

    #[error(transparent)]
    Failed(#[from] linkscope_core::Error),
}

impl CommandError {
    /// Whether the error should be shown to the chat user rather than the host.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, CommandError::Failed(_))
    }
}

impl From<CommandError> for McpError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Failed(inner) => inner.into(),
            other => linkscope_core::Error::InvalidInput(other.to_string()).into(),
        }
    }
}
