//! Orchestration Loop
//!
//! Drives one turn of a conversation: submit to the model, run whatever tools
//! it asks for, feed the results back, repeat until it answers in plain text.
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            ▼                              │ batch committed
//!     AwaitingModel ──tool calls──▶ DispatchingTools
//!        │      │
//!   text │      │ endpoint error / round limit / cancel / timeout
//!        ▼      ▼
//!      Done   Failed
//! ```
//!
//! A batch of tool calls is resolved completely before it is appended, so
//! every `ToolCallRequest` in the log has its `ToolCallResult` right after it
//! and a cancelled or failed batch leaves nothing behind.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::catalog::{CatalogSnapshot, ToolCatalog, ToolOutput, ToolProvider};
use crate::conversation::{Conversation, ConversationItem};
use crate::error::{AgentError, InvocationError, Result};
use crate::gateway::{ModelGateway, OutputItem, TokenUsage};
use crate::invoker::ToolInvoker;

/// Default cap on model round trips per turn
pub const DEFAULT_MAX_ROUNDS: usize = 8;

/// Loop configuration
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Maximum model submissions in one turn
    pub max_rounds: usize,

    /// Wall-clock budget for one round (submit plus tool dispatch)
    pub round_timeout: Option<Duration>,

    /// Run the tool calls of one response concurrently
    pub parallel_tool_calls: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            round_timeout: None,
            parallel_tool_calls: false,
        }
    }
}

/// States of a single turn
#[derive(Debug)]
pub enum TurnState {
    AwaitingModel,
    DispatchingTools(Vec<OutputItem>),
    Done(String),
    Failed(AgentError),
}

impl TurnState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::AwaitingModel => "awaiting_model",
            Self::DispatchingTools(_) => "dispatching_tools",
            Self::Done(_) => "done",
            Self::Failed(_) => "failed",
        }
    }
}

/// What a successful turn produced
#[derive(Clone, Debug, Default)]
pub struct TurnSummary {
    /// Final text, text items joined with newlines
    pub text: String,

    /// Model submissions made
    pub rounds: usize,

    /// Tool calls dispatched across all rounds
    pub tool_calls: usize,

    /// Summed token usage over all rounds that reported it
    pub usage: TokenUsage,
}

/// Drives turns against one model gateway and one tool-provider session
pub struct Orchestrator {
    gateway: Arc<dyn ModelGateway>,
    catalog: ToolCatalog,
    invoker: ToolInvoker,
    config: LoopConfig,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        provider: Arc<dyn ToolProvider>,
        config: LoopConfig,
    ) -> Self {
        Self {
            gateway,
            catalog: ToolCatalog::new(provider.clone()),
            invoker: ToolInvoker::new(provider),
            config,
        }
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Run one turn for `query`, appending everything to `conversation`
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        query: &str,
    ) -> Result<TurnSummary> {
        self.run_turn_cancellable(conversation, query, &CancellationToken::new())
            .await
    }

    /// Like [`run_turn`](Self::run_turn), abandoning in-flight work once
    /// `cancel` fires.
    ///
    /// On any error the conversation keeps the partial transcript, which
    /// never contains a request without its result.
    pub async fn run_turn_cancellable(
        &self,
        conversation: &mut Conversation,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnSummary> {
        let conv_id = conversation.id().short().to_string();

        let unresolved = conversation.unresolved_calls();
        if !unresolved.is_empty() {
            return Err(AgentError::Config(format!(
                "conversation has tool calls without results: {}",
                unresolved.join(", ")
            )));
        }

        // One snapshot per turn; every round validates against it.
        let snapshot = guarded(cancel, None, 0, self.catalog.list()).await?;
        tracing::debug!(conversation = %conv_id, tools = ?snapshot.names(), "Catalog ready");

        conversation.push(ConversationItem::user(query));

        let mut summary = TurnSummary::default();
        let mut deadline = None;
        let mut state = TurnState::AwaitingModel;

        loop {
            tracing::trace!(
                conversation = %conv_id,
                round = summary.rounds,
                state = state.label(),
                "Turn state"
            );

            state = match state {
                TurnState::AwaitingModel => {
                    summary.rounds += 1;
                    let round = summary.rounds;
                    deadline = self.config.round_timeout.map(|t| Instant::now() + t);

                    tracing::debug!(
                        conversation = %conv_id,
                        round,
                        model = self.gateway.model(),
                        "Submitting to model"
                    );

                    let submitted = guarded(
                        cancel,
                        deadline.zip(self.config.round_timeout),
                        round,
                        self.gateway.submit(conversation, snapshot.descriptors()),
                    )
                    .await;

                    match submitted {
                        Err(e) => TurnState::Failed(e),
                        Ok(response) => {
                            if let Some(usage) = &response.usage {
                                summary.usage.input_tokens += usage.input_tokens;
                                summary.usage.output_tokens += usage.output_tokens;
                                summary.usage.total_tokens += usage.total_tokens;
                            }

                            if !response.has_tool_calls() {
                                if response.items.is_empty() {
                                    tracing::warn!(
                                        conversation = %conv_id,
                                        round,
                                        "Model returned no output items"
                                    );
                                }
                                let text = response.text();
                                conversation.extend(
                                    response.items.iter().map(OutputItem::to_conversation_item),
                                );
                                TurnState::Done(text)
                            } else if round >= self.config.max_rounds {
                                tracing::warn!(
                                    conversation = %conv_id,
                                    round,
                                    "Round limit reached with tool calls pending"
                                );
                                // Keep what the model said; its pending calls are never run.
                                conversation.extend(
                                    response
                                        .items
                                        .iter()
                                        .filter(|item| !item.is_tool_call())
                                        .map(OutputItem::to_conversation_item),
                                );
                                let limit = self.config.max_rounds;
                                TurnState::Failed(AgentError::RoundLimitExceeded(limit))
                            } else {
                                TurnState::DispatchingTools(response.items)
                            }
                        }
                    }
                }

                TurnState::DispatchingTools(items) => {
                    let round = summary.rounds;
                    let requested = items.iter().filter(|i| i.is_tool_call()).count();
                    tracing::debug!(
                        conversation = %conv_id,
                        round,
                        requested,
                        "Dispatching tool calls"
                    );

                    let dispatched = guarded(
                        cancel,
                        deadline.zip(self.config.round_timeout),
                        round,
                        self.dispatch(&snapshot, &items),
                    )
                    .await;

                    match dispatched {
                        Ok(batch) => {
                            summary.tool_calls += requested;
                            conversation.extend(batch);
                            TurnState::AwaitingModel
                        }
                        Err(e) => TurnState::Failed(e),
                    }
                }

                TurnState::Done(text) => {
                    tracing::info!(
                        conversation = %conv_id,
                        rounds = summary.rounds,
                        tool_calls = summary.tool_calls,
                        "Turn complete"
                    );
                    summary.text = text;
                    return Ok(summary);
                }

                TurnState::Failed(error) => {
                    tracing::warn!(
                        conversation = %conv_id,
                        rounds = summary.rounds,
                        error = %error,
                        "Turn failed"
                    );
                    return Err(error);
                }
            };
        }
    }

    /// Resolve every tool call in `items` and build the batch to append.
    ///
    /// Text items keep their position; each request is followed by its
    /// result. Batch order follows `items`, not completion order.
    async fn dispatch(
        &self,
        snapshot: &CatalogSnapshot,
        items: &[OutputItem],
    ) -> Result<Vec<ConversationItem>> {
        let calls: Vec<(&str, &str, &str)> = items
            .iter()
            .filter_map(|item| match item {
                OutputItem::ToolCallRequest {
                    call_id,
                    tool_name,
                    arguments,
                } => Some((call_id.as_str(), tool_name.as_str(), arguments.as_str())),
                OutputItem::FinalText { .. } => None,
            })
            .collect();

        let outcomes: Vec<std::result::Result<ToolOutput, InvocationError>> =
            if self.config.parallel_tool_calls {
                join_all(
                    calls
                        .iter()
                        .map(|(_, name, args)| self.invoker.invoke(snapshot, name, args)),
                )
                .await
            } else {
                let mut outcomes = Vec::with_capacity(calls.len());
                for (_, name, args) in &calls {
                    let outcome = self.invoker.invoke(snapshot, name, args).await;
                    let fatal = matches!(&outcome, Err(e) if !e.is_recoverable());
                    outcomes.push(outcome);
                    if fatal {
                        break;
                    }
                }
                outcomes
            };

        let mut outcomes = calls.iter().zip(outcomes);
        let mut batch = Vec::with_capacity(items.len() + calls.len());

        for item in items {
            if !item.is_tool_call() {
                batch.push(item.to_conversation_item());
                continue;
            }

            let Some(((call_id, tool_name, _), outcome)) = outcomes.next() else {
                return Err(AgentError::Other("tool dispatch ended early".into()));
            };

            let output = match outcome {
                Ok(output) => output.render(),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(
                        tool = %tool_name,
                        call_id = %call_id,
                        error = %e,
                        "Tool call failed, reporting to model"
                    );
                    e.to_tool_output()
                }
                Err(e) => return Err(e.into()),
            };

            batch.push(item.to_conversation_item());
            batch.push(ConversationItem::tool_result(*call_id, output));
        }

        Ok(batch)
    }

    pub const fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<dyn ModelGateway> {
        &self.gateway
    }

    pub const fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }
}

/// Await `fut` unless `cancel` fires or the round deadline passes first.
async fn guarded<T>(
    cancel: &CancellationToken,
    deadline: Option<(Instant, Duration)>,
    round: usize,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    let bounded = async {
        match deadline {
            Some((at, budget)) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| AgentError::Timeout {
                    round,
                    secs: budget.as_secs(),
                })?,
            None => fut.await,
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AgentError::Cancelled),
        result = bounded => result,
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    gateway: Option<Arc<dyn ModelGateway>>,
    provider: Option<Arc<dyn ToolProvider>>,
    config: LoopConfig,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            gateway: None,
            provider: None,
            config: LoopConfig::default(),
        }
    }

    pub fn gateway(mut self, gateway: Arc<dyn ModelGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub const fn max_rounds(mut self, max: usize) -> Self {
        self.config.max_rounds = max;
        self
    }

    pub const fn round_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.round_timeout = timeout;
        self
    }

    pub const fn parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.config.parallel_tool_calls = parallel;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let gateway = self
            .gateway
            .ok_or_else(|| AgentError::Config("Model gateway is required".into()))?;
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Tool provider is required".into()))?;
        if self.config.max_rounds == 0 {
            return Err(AgentError::Config("max_rounds must be at least 1".into()));
        }

        Ok(Orchestrator::new(gateway, provider, self.config))
    }
}
