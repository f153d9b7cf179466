//! Stub collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::catalog::{ToolDescriptor, ToolOutput, ToolProvider};
use crate::conversation::{Conversation, ConversationItem};
use crate::error::{AgentError, InvocationError, Result};
use crate::gateway::{ModelGateway, ModelResponse, OutputItem};

/// In-memory tool provider offering `echo(text)`.
///
/// Arguments understood by `echo`: `text` (returned verbatim), `fail`
/// (returned as an error result), `delay_ms` (sleep before answering).
pub struct StubProvider {
    tools: Mutex<Vec<ToolDescriptor>>,
    available: AtomicBool,
    calls: Mutex<Vec<String>>,
    completions: Mutex<Vec<String>>,
}

impl StubProvider {
    pub fn with_echo() -> Self {
        Self {
            tools: Mutex::new(vec![ToolDescriptor::new(
                "echo",
                "Echo the given text",
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            )]),
            available: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            completions: Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Tool names in the order calls started
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// `text` arguments in the order calls finished
    pub fn completions(&self) -> Vec<String> {
        self.completions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolProvider for StubProvider {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(AgentError::ProviderUnavailable("stub is down".into()));
        }
        Ok(self.tools.lock().unwrap().clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> std::result::Result<ToolOutput, InvocationError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(InvocationError::ProviderUnavailable("stub is down".into()));
        }
        self.calls.lock().unwrap().push(name.to_string());

        if let Some(ms) = arguments.get("delay_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if let Some(reason) = arguments.get("fail").and_then(Value::as_str) {
            return Ok(ToolOutput::error(reason));
        }

        let text = arguments
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.completions.lock().unwrap().push(text.clone());
        Ok(ToolOutput::text(text))
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Gateway that replays a fixed script of responses.
///
/// Once the script runs out, `repeat` is returned forever (or an endpoint
/// error if none is set).
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<ModelResponse>>>,
    repeat: Option<ModelResponse>,
    submissions: Mutex<Vec<Vec<ConversationItem>>>,
    submit_count: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(script: Vec<Result<ModelResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            submissions: Mutex::new(Vec::new()),
            submit_count: AtomicUsize::new(0),
        }
    }

    pub fn from_items(rounds: Vec<Vec<OutputItem>>) -> Self {
        Self::new(rounds.into_iter().map(|items| Ok(ModelResponse::new(items))).collect())
    }

    pub fn repeating(response: ModelResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::new(Vec::new())
        }
    }

    pub fn submit_count(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    /// Conversation contents as seen by each submit call
    pub fn submissions(&self) -> Vec<Vec<ConversationItem>> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn submit(
        &self,
        conversation: &Conversation,
        _tools: &[ToolDescriptor],
    ) -> Result<ModelResponse> {
        self.submit_count.fetch_add(1, Ordering::SeqCst);
        self.submissions
            .lock()
            .unwrap()
            .push(conversation.items().to_vec());

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            None => self
                .repeat
                .clone()
                .ok_or_else(|| AgentError::Endpoint("script exhausted".into())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "stub-model"
    }
}
