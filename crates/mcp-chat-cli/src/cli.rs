//! Command-line arguments

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use mcp_chat_core::orchestrator::DEFAULT_MAX_ROUNDS;
use mcp_chat_core::HistoryMode;

#[derive(Parser, Debug)]
#[command(name = "mcp-chat")]
#[command(about = "Chat with a model that can call tools on an MCP server", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Server script (.py or .js) to spawn, or an http(s):// MCP endpoint
    pub target: String,

    /// HTTP transport for URL targets
    #[arg(long, value_enum, default_value_t = HttpTransportKind::Auto)]
    pub transport: HttpTransportKind,

    /// Model endpoint to talk to
    #[arg(long, value_enum, default_value_t = Provider::Openai)]
    pub provider: Provider,

    /// Model id (defaults to OPENAI_MODEL, then the provider default)
    #[arg(long)]
    pub model: Option<String>,

    /// System instructions sent with every request
    #[arg(long)]
    pub instructions: Option<String>,

    /// Model round trips allowed per query
    #[arg(long, default_value_t = DEFAULT_MAX_ROUNDS)]
    pub max_rounds: usize,

    /// Abort a round that takes longer than this
    #[arg(long)]
    pub round_timeout_secs: Option<u64>,

    /// Run the tool calls of one model response concurrently
    #[arg(long)]
    pub parallel_tools: bool,

    /// Start every query with an empty conversation
    #[arg(long)]
    pub fresh_per_query: bool,

    /// Print the conversation after each answer
    #[arg(long)]
    pub show_transcript: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Openai,
    Azure,
    Ollama,
}

/// How to speak MCP to an http(s) target
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum HttpTransportKind {
    /// Legacy HTTP+SSE when the path ends in `/sse`, otherwise Streamable
    /// HTTP with a legacy fallback
    Auto,
    StreamableHttp,
    Sse,
}

/// Where the MCP server lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Script(PathBuf),
    Url(String),
}

impl Cli {
    pub fn server_target(&self) -> Target {
        if self.target.starts_with("http://") || self.target.starts_with("https://") {
            Target::Url(self.target.clone())
        } else {
            Target::Script(PathBuf::from(&self.target))
        }
    }

    pub const fn history_mode(&self) -> HistoryMode {
        if self.fresh_per_query {
            HistoryMode::PerQuery
        } else {
            HistoryMode::Session
        }
    }

    pub fn round_timeout(&self) -> Option<Duration> {
        self.round_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["mcp-chat", "weather.py"]).unwrap();
        assert_eq!(cli.provider, Provider::Openai);
        assert_eq!(cli.max_rounds, DEFAULT_MAX_ROUNDS);
        assert_eq!(cli.history_mode(), HistoryMode::Session);
        assert!(cli.round_timeout().is_none());
        assert_eq!(cli.server_target(), Target::Script(PathBuf::from("weather.py")));
        assert_eq!(cli.transport, HttpTransportKind::Auto);
    }

    #[test]
    fn test_url_target_and_flags() {
        let cli = Cli::try_parse_from([
            "mcp-chat",
            "http://localhost:8000/mcp",
            "--provider",
            "azure",
            "--max-rounds",
            "3",
            "--round-timeout-secs",
            "30",
            "--fresh-per-query",
            "--parallel-tools",
        ])
        .unwrap();

        assert_eq!(cli.server_target(), Target::Url("http://localhost:8000/mcp".into()));
        assert_eq!(cli.provider, Provider::Azure);
        assert_eq!(cli.max_rounds, 3);
        assert_eq!(cli.round_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cli.history_mode(), HistoryMode::PerQuery);
        assert!(cli.parallel_tools);
    }

    #[test]
    fn test_transport_flag() {
        let cli = Cli::try_parse_from([
            "mcp-chat",
            "http://localhost:8000/events",
            "--transport",
            "sse",
        ])
        .unwrap();
        assert_eq!(cli.transport, HttpTransportKind::Sse);

        let cli = Cli::try_parse_from([
            "mcp-chat",
            "http://localhost:8000/mcp",
            "--transport",
            "streamable-http",
        ])
        .unwrap();
        assert_eq!(cli.transport, HttpTransportKind::StreamableHttp);

        assert!(Cli::try_parse_from(["mcp-chat", "s.py", "--transport", "websocket"]).is_err());
    }

    #[test]
    fn test_target_required() {
        assert!(Cli::try_parse_from(["mcp-chat"]).is_err());
        assert!(Cli::try_parse_from(["mcp-chat", "s.py", "--provider", "bedrock"]).is_err());
    }
}
