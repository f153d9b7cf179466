//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Loop-level and transport-level failures.
///
/// These are always surfaced to the caller. Tool-level failures are
/// [`InvocationError`]s and are fed back to the model instead.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Tool-provider session not initialized or transport down
    #[error("Tool provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Model endpoint transport, auth or status failure
    #[error("Model endpoint error: {0}")]
    Endpoint(String),

    /// Model response item outside the known shapes
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    /// Liveness guard tripped
    #[error("Round limit ({0}) exceeded before the model produced a final answer")]
    RoundLimitExceeded(usize),

    /// A round took longer than the configured timeout
    #[error("Round {round} timed out after {secs}s")]
    Timeout { round: usize, secs: u64 },

    /// Turn was cancelled by the caller
    #[error("Turn cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if a fresh turn could reasonably succeed after this error
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Endpoint(_) | Self::Timeout { .. } | Self::Cancelled | Self::Io(_)
        )
    }

    /// Whether the tool-provider session should be considered lost
    pub const fn is_session_fatal(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::ProviderUnavailable(_) => {
                "The tool server is unavailable. Restart the session to reconnect.".into()
            }
            Self::Endpoint(msg) => format!("The model service encountered an error: {msg}"),
            Self::MalformedResponse(_) => {
                "The model returned a response that could not be understood.".into()
            }
            Self::RoundLimitExceeded(n) => format!(
                "The model kept calling tools for {n} rounds without answering. Try a simpler query."
            ),
            Self::Timeout { .. } => "The request took too long. Please try again.".into(),
            Self::Cancelled => "Cancelled.".into(),
            Self::Config(msg) => format!("Configuration problem: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// Failure of a single tool invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    /// Name not present in the current catalog snapshot
    #[error("no tool named '{0}' in the current catalog")]
    UnknownTool(String),

    /// Arguments were not a JSON object or the provider rejected them
    #[error("malformed arguments for '{tool}': {reason}")]
    MalformedArguments { tool: String, reason: String },

    /// The tool ran and failed
    #[error("tool '{tool}' failed: {message}")]
    ProviderError { tool: String, message: String },

    /// The session could not carry the call at all
    #[error("tool provider unavailable: {0}")]
    ProviderUnavailable(String),
}

impl InvocationError {
    /// Stable kind label, used when encoding the error into a tool result
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "UnknownTool",
            Self::MalformedArguments { .. } => "MalformedArguments",
            Self::ProviderError { .. } => "ProviderError",
            Self::ProviderUnavailable(_) => "ProviderUnavailable",
        }
    }

    /// Whether the model can be told about this failure and carry on
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ProviderUnavailable(_))
    }

    /// Text placed in the `ToolCallResult` the model sees
    pub fn to_tool_output(&self) -> String {
        format!("[{}] {}", self.kind(), self)
    }
}

impl From<InvocationError> for AgentError {
    fn from(err: InvocationError) -> Self {
        match err {
            InvocationError::ProviderUnavailable(msg) => Self::ProviderUnavailable(msg),
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_output_encodes_kind() {
        let err = InvocationError::UnknownTool("nope".into());
        let text = err.to_tool_output();
        assert!(text.starts_with("[UnknownTool]"));
        assert!(text.contains("nope"));
    }

    #[test]
    fn test_unavailable_escalates() {
        let err: AgentError = InvocationError::ProviderUnavailable("pipe closed".into()).into();
        assert!(err.is_session_fatal());
        assert!(!InvocationError::ProviderUnavailable(String::new()).is_recoverable());
    }
}
