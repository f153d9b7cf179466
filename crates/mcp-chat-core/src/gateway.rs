//! Model Gateway
//!
//! Common interface over model endpoints (OpenAI Responses, Ollama, ...).
//! Endpoint-specific item type strings are decoded once, inside the gateway,
//! into [`OutputItem`]; nothing past this boundary compares type strings.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mcp_chat_core::gateway::{ModelGateway, GenerationOptions};
//!
//! let gateway = OpenAiGateway::from_env(options)?;
//! let response = gateway.submit(&conversation, snapshot.descriptors()).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::ToolDescriptor;
use crate::conversation::{Conversation, ConversationItem};
use crate::error::Result;

/// Per-request generation settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4.1", "llama3.2")
    pub model: String,

    /// System-level instructions sent alongside the input
    #[serde(default)]
    pub instructions: Option<String>,

    /// Sampling temperature; endpoint default when unset
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Cap on generated tokens; endpoint default when unset
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4.1".into(),
            instructions: None,
            temperature: None,
            max_output_tokens: None,
        }
    }
}

impl GenerationOptions {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// One classified item of model output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    FinalText {
        text: String,
    },
    ToolCallRequest {
        call_id: String,
        tool_name: String,
        arguments: String,
    },
}

impl OutputItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self::FinalText { text: text.into() }
    }

    pub fn tool_call(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::ToolCallRequest {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments: arguments.into(),
        }
    }

    pub const fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCallRequest { .. })
    }

    /// The conversation item this output becomes once committed
    pub fn to_conversation_item(&self) -> ConversationItem {
        match self {
            Self::FinalText { text } => ConversationItem::model_text(text.clone()),
            Self::ToolCallRequest {
                call_id,
                tool_name,
                arguments,
            } => ConversationItem::tool_request(call_id.clone(), tool_name.clone(), arguments.clone()),
        }
    }
}

/// Token usage statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// Result of one request/response round trip
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Output items in the order the endpoint returned them
    pub items: Vec<OutputItem>,

    /// Model that produced the response
    pub model: String,

    /// Token usage (if reported)
    pub usage: Option<TokenUsage>,
}

impl ModelResponse {
    pub fn new(items: Vec<OutputItem>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.items.iter().any(OutputItem::is_tool_call)
    }

    /// Concatenation of all text items, in order
    pub fn text(&self) -> String {
        self.items
            .iter()
            .filter_map(|item| match item {
                OutputItem::FinalText { text } => Some(text.as_str()),
                OutputItem::ToolCallRequest { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Strategy trait for model endpoints
///
/// Implementations perform exactly one round trip per `submit` call and
/// never loop internally.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Send the conversation and tool list, classify the output items.
    ///
    /// Fails with `Endpoint` on transport/auth failure and
    /// `MalformedResponse` if any item has an unknown shape.
    async fn submit(
        &self,
        conversation: &Conversation,
        tools: &[ToolDescriptor],
    ) -> Result<ModelResponse>;

    /// Check if the endpoint is reachable and configured
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Provider name for logs (e.g., "openai")
    fn name(&self) -> &str;

    /// Model id requests are sent with
    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert_eq!(opts.model, "gpt-4.1");
        assert!(opts.temperature.is_none());
        assert_eq!(GenerationOptions::with_model("llama3.2").model, "llama3.2");
    }

    #[test]
    fn test_response_text_skips_tool_calls() {
        let response = ModelResponse::new(vec![
            OutputItem::text("Checking."),
            OutputItem::tool_call("c1", "echo", "{}"),
            OutputItem::text("Done."),
        ]);
        assert!(response.has_tool_calls());
        assert_eq!(response.text(), "Checking.\nDone.");
    }
}
