//! # mcp-chat-core
//!
//! Conversation orchestration between a model endpoint and an external tool
//! provider (an MCP server).
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │ Conversation │  │ ToolCatalog  │  │    ModelGateway     │  │
//! │  │  (append-    │──│ ToolInvoker  │──│     (Strategy)      │  │
//! │  │   only log)  │  │              │  │                     │  │
//! │  └──────────────┘  └──────┬───────┘  └─────────────────────┘  │
//! └───────────────────────────┼───────────────────────────────────┘
//!                             │
//!                       ToolProvider (MCP session)
//! ```
//!
//! The `ModelGateway` and `ToolProvider` traits are the seams: concrete
//! endpoints and transports live in `mcp-chat-runtime`.

pub mod catalog;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod invoker;
pub mod orchestrator;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{
    CatalogSnapshot, ToolCatalog, ToolContent, ToolDescriptor, ToolOutput, ToolProvider,
};
pub use conversation::{Conversation, ConversationId, ConversationItem};
pub use error::{AgentError, InvocationError, Result};
pub use gateway::{GenerationOptions, ModelGateway, ModelResponse, OutputItem, TokenUsage};
pub use invoker::ToolInvoker;
pub use orchestrator::{LoopConfig, Orchestrator, OrchestratorBuilder, TurnState, TurnSummary};
pub use session::{ChatSession, HistoryMode, SessionStats};
