//! Conversation State
//!
//! Append-only log of everything exchanged during a chat session. Items are
//! never removed or edited; the only way in is [`Conversation::push`] (single
//! item) or [`Conversation::extend`] (a committed batch).

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique conversation identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry in the conversation log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    /// Text typed by the user
    UserMessage { text: String },

    /// Text produced by the model
    ModelText { text: String },

    /// The model asked for a tool to be run
    ToolCallRequest {
        call_id: String,
        tool_name: String,
        /// Raw JSON argument text as emitted by the model
        arguments: String,
    },

    /// Outcome of a tool call, success or encoded error
    ToolCallResult { call_id: String, output: String },
}

impl ConversationItem {
    pub fn user(text: impl Into<String>) -> Self {
        Self::UserMessage { text: text.into() }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self::ModelText { text: text.into() }
    }

    pub fn tool_request(
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

    pub fn tool_result(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ToolCallResult {
            call_id: call_id.into(),
            output: output.into(),
        }
    }

    /// Call id for tool requests and results
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCallRequest { call_id, .. } | Self::ToolCallResult { call_id, .. } => {
                Some(call_id)
            }
            _ => None,
        }
    }

    pub const fn is_tool_request(&self) -> bool {
        matches!(self, Self::ToolCallRequest { .. })
    }

    pub const fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolCallResult { .. })
    }
}

impl fmt::Display for ConversationItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserMessage { text } => write!(f, "user: {text}"),
            Self::ModelText { text } => write!(f, "model: {text}"),
            Self::ToolCallRequest {
                call_id,
                tool_name,
                arguments,
            } => write!(f, "[Calling tool {tool_name} with args {arguments}] (call {call_id})"),
            Self::ToolCallResult { call_id, output } => {
                write!(f, "[Result for call {call_id}] {output}")
            }
        }
    }
}

/// Ordered, append-only conversation history
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    id: ConversationId,
    created_at: DateTime<Utc>,
    items: Vec<ConversationItem>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: ConversationId::new(),
            created_at: Utc::now(),
            items: Vec::new(),
        }
    }

    pub const fn id(&self) -> &ConversationId {
        &self.id
    }

    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Append one item
    pub fn push(&mut self, item: ConversationItem) {
        self.items.push(item);
    }

    /// Append a batch in order
    pub fn extend(&mut self, items: impl IntoIterator<Item = ConversationItem>) {
        self.items.extend(items);
    }

    /// All items, oldest first
    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    pub fn last(&self) -> Option<&ConversationItem> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn tool_request_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_tool_request()).count()
    }

    pub fn tool_result_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_tool_result()).count()
    }

    /// Call ids of requests that have no result yet, in request order.
    ///
    /// Empty whenever the conversation is in a state that may be submitted.
    pub fn unresolved_calls(&self) -> Vec<&str> {
        let resolved: HashSet<&str> = self
            .items
            .iter()
            .filter(|i| i.is_tool_result())
            .filter_map(ConversationItem::call_id)
            .collect();

        self.items
            .iter()
            .filter(|i| i.is_tool_request())
            .filter_map(ConversationItem::call_id)
            .filter(|id| !resolved.contains(id))
            .collect()
    }

    /// Plain-text rendering, one item per line
    pub fn transcript(&self) -> String {
        self.items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let mut conv = Conversation::new();
        conv.push(ConversationItem::user("Hi"));
        conv.extend([
            ConversationItem::tool_request("1", "echo", r#"{"text":"hi"}"#),
            ConversationItem::tool_result("1", "hi"),
        ]);
        conv.push(ConversationItem::model_text("hi"));

        assert_eq!(conv.len(), 4);
        assert_eq!(conv.tool_request_count(), 1);
        assert_eq!(conv.tool_result_count(), 1);
        assert!(conv.unresolved_calls().is_empty());
        assert_eq!(conv.last(), Some(&ConversationItem::model_text("hi")));
    }

    #[test]
    fn test_unresolved_calls() {
        let mut conv = Conversation::new();
        conv.push(ConversationItem::tool_request("a", "echo", "{}"));
        conv.push(ConversationItem::tool_request("b", "echo", "{}"));
        conv.push(ConversationItem::tool_result("a", "ok"));

        assert_eq!(conv.unresolved_calls(), vec!["b"]);
    }

    #[test]
    fn test_item_serialization_tag() {
        let item = ConversationItem::tool_result("7", "done");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "tool_call_result");
        assert_eq!(json["call_id"], "7");
    }

    #[test]
    fn test_transcript() {
        let mut conv = Conversation::new();
        conv.push(ConversationItem::user("What tools are available?"));
        conv.push(ConversationItem::model_text("Just echo."));

        let transcript = conv.transcript();
        assert_eq!(transcript, "user: What tools are available?\nmodel: Just echo.");
    }
}
