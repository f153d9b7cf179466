//! Error Types for the runtime adapters

use mcp_chat_core::{AgentError, InvocationError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// JSON-RPC "invalid params"
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC "method not found"
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The server answered with a JSON-RPC error object
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The session is gone (process exited, stream closed, session expired)
    #[error("Connection closed: {0}")]
    Closed(String),

    /// Could not write to or read from the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// The HTTP endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// No response within the request timeout
    #[error("Request '{method}' timed out after {secs}s")]
    Timeout { method: String, secs: u64 },

    /// Message did not match the expected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RuntimeError {
    /// True when the session itself can no longer carry requests
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::Closed(_) | Self::Transport(_) | Self::Io(_) => true,
            Self::Http(e) => e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Classify a failed `tools/call` for the invoker
    pub fn into_invocation_error(self, tool: &str) -> InvocationError {
        if self.is_connection_lost() {
            return InvocationError::ProviderUnavailable(self.to_string());
        }
        match self {
            Self::Rpc { code, message } if message.to_lowercase().contains("unknown tool") => {
                tracing::debug!(code, tool, "Server reports unknown tool");
                InvocationError::UnknownTool(tool.to_string())
            }
            Self::Rpc {
                code: INVALID_PARAMS,
                message,
            } => InvocationError::MalformedArguments {
                tool: tool.to_string(),
                reason: message,
            },
            other => InvocationError::ProviderError {
                tool: tool.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<RuntimeError> for AgentError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Config(msg) => Self::Config(msg),
            other if other.is_connection_lost() => Self::ProviderUnavailable(other.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_params_maps_to_malformed_arguments() {
        let err = RuntimeError::Rpc {
            code: INVALID_PARAMS,
            message: "missing field 'text'".into(),
        };
        assert_eq!(err.into_invocation_error("echo").kind(), "MalformedArguments");
    }

    #[test]
    fn test_unknown_tool_message() {
        let err = RuntimeError::Rpc {
            code: INVALID_PARAMS,
            message: "Unknown tool: weather".into(),
        };
        assert_eq!(
            err.into_invocation_error("weather"),
            InvocationError::UnknownTool("weather".into())
        );
    }

    #[test]
    fn test_closed_is_unavailable() {
        let err = RuntimeError::Closed("server exited".into());
        assert!(!err.into_invocation_error("echo").is_recoverable());

        let agent: AgentError = RuntimeError::Closed("gone".into()).into();
        assert!(agent.is_session_fatal());
    }
}
