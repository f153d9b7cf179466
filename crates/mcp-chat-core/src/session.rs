//! Session Management
//!
//! A chat session pairs one orchestrator with the conversation it drives.
//! Turns take `&mut self`, so two conversations can never interleave over the
//! same provider session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::conversation::Conversation;
use crate::error::Result;
use crate::orchestrator::{Orchestrator, TurnSummary};

/// How long a conversation lives
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    /// One conversation for the whole session
    #[default]
    Session,
    /// A fresh conversation for every query
    PerQuery,
}

/// Running counters for a session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionStats {
    pub turns: usize,
    pub failed_turns: usize,
    pub tool_calls: usize,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionStats {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            turns: 0,
            failed_turns: 0,
            tool_calls: 0,
            started_at: now,
            updated_at: now,
        }
    }

    /// Duration since creation
    pub fn duration(&self) -> chrono::Duration {
        self.updated_at - self.started_at
    }
}

/// A single interactive session over one provider session
pub struct ChatSession {
    orchestrator: Arc<Orchestrator>,
    conversation: Conversation,
    mode: HistoryMode,
    stats: SessionStats,
    active: bool,
}

impl ChatSession {
    pub fn new(orchestrator: Arc<Orchestrator>, mode: HistoryMode) -> Self {
        Self {
            orchestrator,
            conversation: Conversation::new(),
            mode,
            stats: SessionStats::new(),
            active: true,
        }
    }

    /// Run one turn. In per-query mode the previous conversation is dropped
    /// first.
    pub async fn ask(&mut self, query: &str, cancel: &CancellationToken) -> Result<TurnSummary> {
        if self.mode == HistoryMode::PerQuery {
            self.conversation = Conversation::new();
        }

        let outcome = self
            .orchestrator
            .run_turn_cancellable(&mut self.conversation, query, cancel)
            .await;

        self.stats.turns += 1;
        self.stats.updated_at = Utc::now();
        match &outcome {
            Ok(summary) => self.stats.tool_calls += summary.tool_calls,
            Err(_) => self.stats.failed_turns += 1,
        }
        outcome
    }

    /// Start over with an empty conversation
    pub fn reset(&mut self) {
        self.conversation = Conversation::new();
    }

    /// Close the provider session
    pub async fn end(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.orchestrator.catalog().provider().close().await
    }

    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub const fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub const fn mode(&self) -> HistoryMode {
        self.mode
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }
}
