//! Ollama Gateway
//!
//! Implementation of `ModelGateway` for local Ollama inference.
//!
//! Chat requests go straight to `/api/chat` since native tool calling is not
//! in ollama-rs; the client is still used for health checks and model listing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use mcp_chat_core::{
    AgentError, Conversation, ConversationItem, GenerationOptions, ModelGateway, ModelResponse,
    OutputItem, Result, TokenUsage, ToolDescriptor,
};
use ollama_rs::Ollama;
use serde_json::{json, Map, Value};

/// Ollama gateway configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 120,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST")
            .unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self {
            host,
            port,
            ..Default::default()
        }
    }

    fn chat_url(&self) -> String {
        format!("{}:{}/api/chat", self.host.trim_end_matches('/'), self.port)
    }
}

/// Ollama model gateway
pub struct OllamaGateway {
    client: Ollama,
    http: reqwest::Client,
    config: OllamaConfig,
    options: GenerationOptions,
}

impl OllamaGateway {
    /// Create from configuration
    pub fn from_config(config: OllamaConfig, options: GenerationOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client: Ollama::new(&config.host, config.port),
            http,
            config,
            options,
        })
    }

    /// Create from environment variables
    pub fn from_env(options: GenerationOptions) -> Result<Self> {
        Self::from_config(OllamaConfig::from_env(), options)
    }

    /// Names of the locally pulled models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| AgentError::Endpoint(e.to_string()))?;

        Ok(models.into_iter().map(|m| m.name).collect())
    }
}

/// Convert the conversation to Ollama chat messages.
///
/// Consecutive tool requests fold into one assistant message; results carry
/// the tool name because Ollama has no call ids.
fn convert_messages(conversation: &Conversation, instructions: Option<&str>) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut names: HashMap<&str, &str> = HashMap::new();
    let mut open_calls = false;

    if let Some(system) = instructions {
        messages.push(json!({ "role": "system", "content": system }));
    }

    for item in conversation.items() {
        match item {
            ConversationItem::UserMessage { text } => {
                messages.push(json!({ "role": "user", "content": text }));
                open_calls = false;
            }
            ConversationItem::ModelText { text } => {
                messages.push(json!({ "role": "assistant", "content": text }));
                open_calls = false;
            }
            ConversationItem::ToolCallRequest {
                call_id,
                tool_name,
                arguments,
            } => {
                names.insert(call_id, tool_name);
                let call = json!({
                    "function": { "name": tool_name, "arguments": arguments_object(arguments) }
                });

                let last = messages.last_mut().filter(|_| open_calls);
                match last.and_then(|m| m.get_mut("tool_calls")).and_then(Value::as_array_mut) {
                    Some(calls) => calls.push(call),
                    None => {
                        messages.push(json!({ "role": "assistant", "content": "", "tool_calls": [call] }));
                        open_calls = true;
                    }
                }
            }
            ConversationItem::ToolCallResult { call_id, output } => {
                let mut message = json!({ "role": "tool", "content": output });
                if let Some(name) = names.get(call_id.as_str()) {
                    message["tool_name"] = json!(name);
                }
                messages.push(message);
                open_calls = false;
            }
        }
    }
    messages
}

/// Ollama expects arguments as an object, not a JSON string
fn arguments_object(arguments: &str) -> Value {
    match serde_json::from_str::<Value>(arguments) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(Map::new()),
    }
}

fn convert_tool(tool: &ToolDescriptor) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

pub fn build_request(
    conversation: &Conversation,
    tools: &[ToolDescriptor],
    options: &GenerationOptions,
) -> Value {
    let mut body = json!({
        "model": options.model,
        "messages": convert_messages(conversation, options.instructions.as_deref()),
        "tools": tools.iter().map(convert_tool).collect::<Vec<_>>(),
        "stream": false,
    });

    let mut model_options = Map::new();
    if let Some(temperature) = options.temperature {
        model_options.insert("temperature".into(), json!(temperature));
    }
    if let Some(max) = options.max_output_tokens {
        model_options.insert("num_predict".into(), json!(max));
    }
    if !model_options.is_empty() {
        body["options"] = Value::Object(model_options);
    }
    body
}

/// Convert an `/api/chat` reply to a model response
pub fn parse_response(body: &Value) -> Result<ModelResponse> {
    if let Some(error) = body.get("error").and_then(Value::as_str) {
        return Err(AgentError::Endpoint(error.to_string()));
    }

    let message = body
        .get("message")
        .ok_or_else(|| AgentError::MalformedResponse("chat reply has no message".into()))?;

    let mut items = Vec::new();
    if let Some(content) = message.get("content").and_then(Value::as_str) {
        if !content.is_empty() {
            items.push(OutputItem::text(content));
        }
    }

    for call in message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        let function = call
            .get("function")
            .ok_or_else(|| AgentError::MalformedResponse("tool call without function".into()))?;
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::MalformedResponse("tool call without name".into()))?;
        let arguments = match function.get("arguments") {
            Some(Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
            None => "{}".to_string(),
        };
        let call_id = format!("call_{}", uuid::Uuid::new_v4().simple());
        items.push(OutputItem::tool_call(call_id, name, arguments));
    }

    let count = |key: &str| {
        body.get(key)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    };
    let usage = match (count("prompt_eval_count"), count("eval_count")) {
        (None, None) => None,
        (input, output) => {
            let (input, output) = (input.unwrap_or(0), output.unwrap_or(0));
            Some(TokenUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            })
        }
    };

    Ok(ModelResponse {
        items,
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        usage,
    })
}

#[async_trait]
impl ModelGateway for OllamaGateway {
    async fn submit(
        &self,
        conversation: &Conversation,
        tools: &[ToolDescriptor],
    ) -> Result<ModelResponse> {
        let body = build_request(conversation, tools, &self.options);
        tracing::debug!(model = %self.options.model, tools = tools.len(), "Submitting to Ollama");

        let response = self
            .http
            .post(self.config.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Endpoint(format!("Request failed: {e}")))?;

        let status = response.status();
        let reply: Value = response
            .json()
            .await
            .map_err(|e| AgentError::MalformedResponse(format!("Failed to parse response: {e}")))?;

        if !status.is_success() {
            let detail = reply
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("no detail");
            return Err(AgentError::Endpoint(format!("HTTP {status} from Ollama: {detail}")));
        }

        parse_response(&reply)
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.options.model
    }
}
