//! mcp-chat
//!
//! Interactive client: connects to one MCP server, then answers queries with
//! a model that may call the server's tools.

mod cli;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mcp_chat_core::{ChatSession, GenerationOptions, ModelGateway, Orchestrator, ToolProvider};
use mcp_chat_runtime::{McpOptions, McpSession, OllamaGateway, OpenAiGateway, ServerCommand};

use crate::cli::{Cli, HttpTransportKind, Provider, Target};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they never interleave with answers
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();
    let args = Cli::parse();

    let gateway = build_gateway(&args)?;
    match gateway.health_check().await {
        Ok(true) => tracing::info!("✓ Connected to {} ({})", gateway.name(), gateway.model()),
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ {} endpoint not reachable - queries will fail", gateway.name());
        }
    }

    let provider = connect(&args).await?;
    let snapshot = provider
        .list_tools()
        .await
        .context("Failed to list server tools")?;
    let names: Vec<_> = snapshot.iter().map(|t| t.name.as_str()).collect();
    println!("\nConnected to server with tools: {names:?}");

    let orchestrator = Orchestrator::builder()
        .gateway(gateway)
        .provider(provider)
        .max_rounds(args.max_rounds)
        .round_timeout(args.round_timeout())
        .parallel_tool_calls(args.parallel_tools)
        .build()?;
    let mut session = ChatSession::new(Arc::new(orchestrator), args.history_mode());

    chat_loop(&mut session, args.show_transcript).await?;

    if let Err(e) = session.end().await {
        tracing::warn!(error = %e, "Failed to close the MCP session cleanly");
    }
    let stats = session.stats();
    tracing::info!(
        turns = stats.turns,
        failed = stats.failed_turns,
        tool_calls = stats.tool_calls,
        "Session ended"
    );
    Ok(())
}

fn build_gateway(args: &Cli) -> anyhow::Result<Arc<dyn ModelGateway>> {
    let model = args
        .model
        .clone()
        .or_else(|| std::env::var("OPENAI_MODEL").ok().filter(|m| !m.is_empty()));

    let mut options = match (&model, args.provider) {
        (Some(model), _) => GenerationOptions::with_model(model.clone()),
        (None, Provider::Ollama) => GenerationOptions::with_model("llama3.2"),
        (None, _) => GenerationOptions::default(),
    };
    options.instructions.clone_from(&args.instructions);

    let gateway: Arc<dyn ModelGateway> = match args.provider {
        Provider::Openai => Arc::new(OpenAiGateway::from_env(options)?),
        Provider::Azure => Arc::new(OpenAiGateway::azure_from_env(options)?),
        Provider::Ollama => Arc::new(OllamaGateway::from_env(options)?),
    };
    Ok(gateway)
}

async fn connect(args: &Cli) -> anyhow::Result<Arc<dyn ToolProvider>> {
    let options = McpOptions::default();
    let session = match args.server_target() {
        Target::Script(path) => {
            let command = ServerCommand::from_script(&path)?;
            McpSession::connect_stdio(&command, &options)
                .await
                .with_context(|| format!("Failed to start MCP server {}", path.display()))?
        }
        Target::Url(url) => {
            let connected = match args.transport {
                HttpTransportKind::Auto => McpSession::connect_url(&url, &options).await,
                HttpTransportKind::StreamableHttp => McpSession::connect_http(&url, &options).await,
                HttpTransportKind::Sse => McpSession::connect_sse(&url, &options).await,
            };
            connected.with_context(|| format!("Failed to connect to MCP server at {url}"))?
        }
    };

    if let Some(info) = session.server_info() {
        tracing::info!("✓ MCP server {} {}", info.name, info.version);
    }
    let provider: Arc<dyn ToolProvider> = Arc::new(session);
    Ok(provider)
}

async fn chat_loop(session: &mut ChatSession, show_transcript: bool) -> anyhow::Result<()> {
    println!("\nMCP Client Started!");
    println!("Type your queries or 'quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\nQuery: ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("quit") {
            break;
        }

        let cancel = CancellationToken::new();
        let outcome = {
            let turn = session.ask(query, &cancel);
            tokio::pin!(turn);

            // Ctrl-C abandons the current turn, not the session.
            tokio::select! {
                outcome = &mut turn => outcome,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    turn.await
                }
            }
        };

        match outcome {
            Ok(summary) => {
                println!("\n{}", summary.text);
                tracing::debug!(
                    rounds = summary.rounds,
                    tool_calls = summary.tool_calls,
                    "Turn complete"
                );
            }
            Err(e) => {
                println!("\nError: {}", e.user_message());
                tracing::warn!(error = %e, "Turn failed");
                if e.is_session_fatal() {
                    break;
                }
            }
        }

        if show_transcript {
            println!("\n{}", session.conversation().transcript());
        }
    }
    Ok(())
}
