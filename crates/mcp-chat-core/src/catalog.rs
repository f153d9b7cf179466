//! Tool Catalog
//!
//! The tool provider is an external session (an MCP server) that can list
//! tools and run them. [`ToolCatalog`] takes a fresh snapshot of what the
//! provider offers; the snapshot is re-taken every turn because the provider
//! may add or remove tools at any time.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, InvocationError, Result};

/// A callable tool as advertised by the provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique within a snapshot
    pub name: String,

    /// Human-readable description (shown to the model)
    #[serde(default)]
    pub description: String,

    /// JSON Schema for the arguments object
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// One block of tool output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
    Image { mime_type: String },
    Resource { uri: String, text: Option<String> },
}

/// Normalized result of a tool call
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ToolContent>,

    /// Provider flagged the call as failed
    #[serde(default)]
    pub is_error: bool,

    /// Structured result, if the provider returned one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
            structured: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(text)
        }
    }

    /// Render every block into the single string handed back to the model
    pub fn render(&self) -> String {
        let parts: Vec<String> = self
            .content
            .iter()
            .map(|block| match block {
                ToolContent::Text { text } => text.clone(),
                ToolContent::Image { mime_type } => format!("[image: {mime_type}]"),
                ToolContent::Resource { uri, text } => match text {
                    Some(text) => format!("[resource {uri}]\n{text}"),
                    None => format!("[resource {uri}]"),
                },
            })
            .collect();

        if parts.is_empty() {
            return self
                .structured
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_default();
        }
        parts.join("\n")
    }
}

/// External tool-provider session
///
/// Transports (child-process stdio, HTTP) implement this; the core only
/// needs these operations.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Perform the protocol handshake. Must succeed before anything else.
    async fn initialize(&self) -> Result<()>;

    /// Enumerate the tools currently offered
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Run a tool with an already-parsed arguments object
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Map<String, Value>,
    ) -> std::result::Result<ToolOutput, InvocationError>;

    /// Release the session
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Short label for logs
    fn name(&self) -> &str;
}

/// The tools offered by the provider at one point in time
#[derive(Clone, Debug, Default)]
pub struct CatalogSnapshot {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl CatalogSnapshot {
    /// Build from provider output; later duplicates of a name are dropped
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        let mut snapshot = Self::default();
        for descriptor in descriptors {
            if snapshot.index.contains_key(&descriptor.name) {
                tracing::warn!(
                    tool = %descriptor.name,
                    "Provider listed a tool name twice, keeping the first"
                );
                continue;
            }
            snapshot
                .index
                .insert(descriptor.name.clone(), snapshot.tools.len());
            snapshot.tools.push(descriptor);
        }
        snapshot
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Descriptors in provider order
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn by_name(&self) -> BTreeMap<&str, &ToolDescriptor> {
        self.tools.iter().map(|t| (t.name.as_str(), t)).collect()
    }
}

/// Order-insensitive: tool names are the identity, not position
impl PartialEq for CatalogSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.by_name() == other.by_name()
    }
}

/// Lists tools from a provider session
#[derive(Clone)]
pub struct ToolCatalog {
    provider: Arc<dyn ToolProvider>,
}

impl ToolCatalog {
    pub fn new(provider: Arc<dyn ToolProvider>) -> Self {
        Self { provider }
    }

    /// Query the provider for its current tools
    pub async fn list(&self) -> Result<CatalogSnapshot> {
        let descriptors = self.provider.list_tools().await.map_err(|e| match e {
            AgentError::ProviderUnavailable(msg) => AgentError::ProviderUnavailable(msg),
            other => AgentError::ProviderUnavailable(other.to_string()),
        })?;

        let snapshot = CatalogSnapshot::from_descriptors(descriptors);
        tracing::debug!(provider = self.provider.name(), tools = snapshot.len(), "Listed tools");
        Ok(snapshot)
    }

    pub fn provider(&self) -> &Arc<dyn ToolProvider> {
        &self.provider
    }
}
