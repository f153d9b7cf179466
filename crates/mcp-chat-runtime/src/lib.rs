//! # mcp-chat-runtime
//!
//! Concrete collaborators for the `mcp-chat-core` orchestration loop.
//!
//! ## Tool providers
//!
//! - **MCP over stdio**: spawn a `.py`/`.js` server script as a child process
//! - **MCP over Streamable HTTP**: connect to a running server by URL
//! - **MCP over HTTP+SSE**: the older two-endpoint HTTP transport, picked by
//!   URL path or as a fallback when Streamable HTTP is refused
//!
//! ## Model gateways
//!
//! - **OpenAI** Responses API (also Azure OpenAI's v1 endpoint)
//! - **Ollama** (feature `ollama`, on by default): local inference
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mcp_chat_runtime::{McpOptions, McpSession, OpenAiGateway, ServerCommand};
//!
//! let command = ServerCommand::from_script("weather/server.py")?;
//! let session = McpSession::connect_stdio(&command, &McpOptions::default()).await?;
//! let gateway = OpenAiGateway::from_env(GenerationOptions::default())?;
//! let orchestrator = Orchestrator::builder()
//!     .gateway(Arc::new(gateway))
//!     .provider(Arc::new(session))
//!     .build()?;
//! ```

pub mod error;
pub mod mcp;
pub mod openai;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use error::RuntimeError;
pub use mcp::{
    HttpTransport, McpOptions, McpSession, McpTransport, ServerCommand, SseTransport,
    StdioTransport,
};
#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaGateway};
pub use openai::{OpenAiConfig, OpenAiGateway};

// Re-export core types for convenience
pub use mcp_chat_core::{
    AgentError, ChatSession, Conversation, GenerationOptions, HistoryMode, ModelGateway,
    Orchestrator, Result, ToolProvider,
};
