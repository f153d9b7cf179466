//! OpenAI Responses API gateway
//!
//! Implementation of `ModelGateway` for `POST {base_url}/responses`, also
//! used for Azure OpenAI through its OpenAI-compatible v1 endpoint.

use std::time::Duration;

use async_trait::async_trait;
use mcp_chat_core::{
    AgentError, Conversation, ConversationItem, GenerationOptions, ModelGateway, ModelResponse,
    OutputItem, Result, TokenUsage, ToolDescriptor,
};
use serde_json::{json, Map, Value};

/// OpenAI endpoint configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API root, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    pub api_key: Option<String>,

    /// Query parameters appended to every request
    pub query: Vec<(String, String)>,

    /// Send the key as `api-key` in addition to bearer auth (Azure)
    pub api_key_header: bool,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            query: Vec::new(),
            api_key_header: false,
            timeout_secs: 120,
        }
    }
}

impl OpenAiConfig {
    /// Read `OPENAI_API_KEY` and `OPENAI_BASE_URL`
    pub fn from_env() -> Self {
        let base_url = std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| Self::default().base_url);

        Self {
            base_url,
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            ..Default::default()
        }
    }

    /// Read `AZURE_OPENAI_ENDPOINT` and `AZURE_OPENAI_API_KEY`
    pub fn azure_from_env() -> Result<Self> {
        let endpoint = std::env::var("AZURE_OPENAI_ENDPOINT")
            .map_err(|_| AgentError::Config("AZURE_OPENAI_ENDPOINT is not set".into()))?;
        Ok(Self::azure(&endpoint, std::env::var("AZURE_OPENAI_API_KEY").ok()))
    }

    pub fn azure(endpoint: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: format!("{}/openai/v1", endpoint.trim_end_matches('/')),
            api_key,
            query: vec![("api-version".into(), "preview".into())],
            api_key_header: true,
            ..Default::default()
        }
    }

    fn responses_url(&self) -> String {
        format!("{}/responses", self.base_url.trim_end_matches('/'))
    }
}

/// OpenAI Responses API gateway
pub struct OpenAiGateway {
    client: reqwest::Client,
    config: OpenAiConfig,
    options: GenerationOptions,
    name: &'static str,
}

impl OpenAiGateway {
    pub fn new(config: OpenAiConfig, options: GenerationOptions) -> Result<Self> {
        if config.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(AgentError::Config(
                "no API key configured for the model endpoint".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("Failed to create HTTP client: {e}")))?;

        let name = if config.api_key_header { "azure" } else { "openai" };
        Ok(Self {
            client,
            config,
            options,
            name,
        })
    }

    pub fn from_env(options: GenerationOptions) -> Result<Self> {
        Self::new(OpenAiConfig::from_env(), options)
    }

    pub fn azure_from_env(options: GenerationOptions) -> Result<Self> {
        Self::new(OpenAiConfig::azure_from_env()?, options)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, url).query(&self.config.query);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
            if self.config.api_key_header {
                request = request.header("api-key", key);
            }
        }
        request
    }
}

/// Encode one conversation item as Responses API input
fn encode_item(item: &ConversationItem) -> Value {
    match item {
        ConversationItem::UserMessage { text } => json!({ "role": "user", "content": text }),
        ConversationItem::ModelText { text } => json!({ "role": "assistant", "content": text }),
        ConversationItem::ToolCallRequest {
            call_id,
            tool_name,
            arguments,
        } => json!({
            "type": "function_call",
            "call_id": call_id,
            "name": tool_name,
            "arguments": arguments,
        }),
        ConversationItem::ToolCallResult { call_id, output } => json!({
            "type": "function_call_output",
            "call_id": call_id,
            "output": output,
        }),
    }
}

fn encode_tool(tool: &ToolDescriptor) -> Value {
    json!({
        "type": "function",
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.input_schema,
    })
}

/// Build the request body for one round
pub fn build_request(
    conversation: &Conversation,
    tools: &[ToolDescriptor],
    options: &GenerationOptions,
) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(options.model));
    body.insert(
        "input".into(),
        Value::Array(conversation.items().iter().map(encode_item).collect()),
    );
    body.insert(
        "tools".into(),
        Value::Array(tools.iter().map(encode_tool).collect()),
    );
    if let Some(instructions) = &options.instructions {
        body.insert("instructions".into(), json!(instructions));
    }
    if let Some(temperature) = options.temperature {
        body.insert("temperature".into(), json!(temperature));
    }
    if let Some(max) = options.max_output_tokens {
        body.insert("max_output_tokens".into(), json!(max));
    }
    Value::Object(body)
}

/// Classify the `output` array of a Responses API reply
pub fn parse_response(body: &Value) -> Result<ModelResponse> {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string);
        return Err(AgentError::Endpoint(message));
    }

    let output = body
        .get("output")
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::MalformedResponse("response has no output array".into()))?;

    let mut items = Vec::with_capacity(output.len());
    for item in output {
        match item.get("type").and_then(Value::as_str) {
            Some("message") => items.push(OutputItem::text(message_text(item)?)),
            Some("function_call") => {
                let field = |key: &str| {
                    item.get(key).and_then(Value::as_str).ok_or_else(|| {
                        AgentError::MalformedResponse(format!("function_call without '{key}'"))
                    })
                };
                items.push(OutputItem::tool_call(
                    field("call_id")?,
                    field("name")?,
                    item.get("arguments")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                ));
            }
            Some(other) => {
                return Err(AgentError::MalformedResponse(format!(
                    "unsupported output item type '{other}'"
                )))
            }
            None => {
                return Err(AgentError::MalformedResponse(
                    "output item without a type".into(),
                ))
            }
        }
    }

    let usage = body.get("usage").map(|u| {
        let count = |key: &str| {
            u.get(key)
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0)
        };
        TokenUsage {
            input_tokens: count("input_tokens"),
            output_tokens: count("output_tokens"),
            total_tokens: count("total_tokens"),
        }
    });

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

fn message_text(item: &Value) -> Result<String> {
    let parts = item
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::MalformedResponse("message without content".into()))?;

    let mut text = String::new();
    for part in parts {
        let field = match part.get("type").and_then(Value::as_str) {
            Some("output_text") => "text",
            Some("refusal") => "refusal",
            other => {
                return Err(AgentError::MalformedResponse(format!(
                    "unsupported message content part {other:?}"
                )))
            }
        };
        text.push_str(part.get(field).and_then(Value::as_str).unwrap_or_default());
    }
    Ok(text)
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn submit(
        &self,
        conversation: &Conversation,
        tools: &[ToolDescriptor],
    ) -> Result<ModelResponse> {
        let body = build_request(conversation, tools, &self.options);
        tracing::debug!(
            gateway = self.name,
            model = %self.options.model,
            items = conversation.len(),
            tools = tools.len(),
            "Submitting conversation"
        );

        let response = self
            .request(reqwest::Method::POST, self.config.responses_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Endpoint(format!("request timed out after {}s", self.config.timeout_secs))
                } else {
                    AgentError::Endpoint(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::Endpoint(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            // The error envelope carries a better message than the status line.
            let detail = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text);
            return Err(AgentError::Endpoint(format!("HTTP {status}: {detail}")));
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| AgentError::MalformedResponse(format!("response is not JSON: {e}")))?;
        let parsed = parse_response(&body)?;

        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                input = usage.input_tokens,
                output = usage.output_tokens,
                "Token usage"
            );
        }
        Ok(parsed)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.config.base_url.trim_end_matches('/'));
        match self.request(reqwest::Method::GET, url).send().await {
            Ok(response) if response.status().is_success() => Ok(true),
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Model endpoint health check failed");
                Ok(false)
            }
            Err(e) => {
                tracing::warn!("Model endpoint health check failed: {}", e);
                Ok(false)
            }
        }
    }

    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        &self.options.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_tool() -> ToolDescriptor {
        ToolDescriptor::new(
            "echo",
            "Echo the text back",
            json!({"type": "object", "properties": {"text": {"type": "string"}}}),
        )
    }

    #[test]
    fn test_build_request_encodes_items_and_tools() {
        let mut conv = Conversation::new();
        conv.push(ConversationItem::user("say hi"));
        conv.push(ConversationItem::tool_request("1", "echo", r#"{"text":"hi"}"#));
        conv.push(ConversationItem::tool_result("1", "hi"));

        let options = GenerationOptions {
            instructions: Some("Be brief.".into()),
            ..Default::default()
        };
        let body = build_request(&conv, &[echo_tool()], &options);

        assert_eq!(body["model"], "gpt-4.1");
        assert_eq!(body["instructions"], "Be brief.");
        assert!(body.get("temperature").is_none());

        let input = body["input"].as_array().unwrap();
        assert_eq!(input[0], json!({"role": "user", "content": "say hi"}));
        assert_eq!(input[1]["type"], "function_call");
        assert_eq!(input[1]["name"], "echo");
        assert_eq!(input[2], json!({"type": "function_call_output", "call_id": "1", "output": "hi"}));

        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["parameters"]["properties"]["text"]["type"], "string");
    }

    #[test]
    fn test_parse_mixed_output_preserves_order() {
        let body = json!({
            "model": "gpt-4.1-2025-04-14",
            "output": [
                {"type": "message", "role": "assistant",
                 "content": [{"type": "output_text", "text": "Let me check."}]},
                {"type": "function_call", "call_id": "call_1", "name": "get_alerts",
                 "arguments": "{\"state\":\"CA\"}"}
            ],
            "usage": {"input_tokens": 52, "output_tokens": 18, "total_tokens": 70}
        });

        let response = parse_response(&body).unwrap();
        assert_eq!(
            response.items,
            vec![
                OutputItem::text("Let me check."),
                OutputItem::tool_call("call_1", "get_alerts", "{\"state\":\"CA\"}"),
            ]
        );
        assert_eq!(response.model, "gpt-4.1-2025-04-14");
        assert_eq!(response.usage.unwrap().total_tokens, 70);
    }

    #[test]
    fn test_refusal_is_text() {
        let body = json!({"output": [{"type": "message",
            "content": [{"type": "refusal", "refusal": "I can't help with that."}]}]});
        assert_eq!(parse_response(&body).unwrap().text(), "I can't help with that.");
    }

    #[test]
    fn test_unknown_item_is_malformed() {
        let body = json!({"output": [{"type": "web_search_call", "id": "ws_1"}]});
        assert!(matches!(
            parse_response(&body),
            Err(AgentError::MalformedResponse(_))
        ));

        let missing = json!({"output": [{"type": "function_call", "name": "echo"}]});
        assert!(matches!(
            parse_response(&missing),
            Err(AgentError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_error_envelope_is_endpoint_error() {
        let body = json!({"error": {"message": "Incorrect API key provided"}, "output": []});
        match parse_response(&body) {
            Err(AgentError::Endpoint(msg)) => assert!(msg.contains("API key")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_azure_config() {
        let config = OpenAiConfig::azure("https://myres.openai.azure.com/", Some("k".into()));
        assert_eq!(config.base_url, "https://myres.openai.azure.com/openai/v1");
        assert_eq!(config.responses_url(), "https://myres.openai.azure.com/openai/v1/responses");
        assert_eq!(config.query, vec![("api-version".to_string(), "preview".to_string())]);

        let gateway = OpenAiGateway::new(config, GenerationOptions::default()).unwrap();
        assert_eq!(gateway.name(), "azure");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = OpenAiGateway::new(OpenAiConfig::default(), GenerationOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
