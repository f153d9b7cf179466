//! Child-process stdio transport
//!
//! Newline-delimited JSON-RPC over the server's stdin/stdout. A background
//! task reads stdout and routes responses to waiting requests by id, so
//! several requests may be in flight at once.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use super::pending::{wait_for_reply, PendingRequests};
use super::protocol::{
    parse_incoming, reply_to_server_request, IncomingMessage, JsonRpcNotification, JsonRpcRequest,
};
use super::McpTransport;
use crate::error::{Result, RuntimeError};

/// How to start the server process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ServerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
        }
    }

    /// Pick the interpreter from the script extension (`.py` or `.js`)
    pub fn from_script(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let program = match path.extension().and_then(|e| e.to_str()) {
            Some("py") => "python",
            Some("js") => "node",
            _ => {
                return Err(RuntimeError::Config(format!(
                    "Server script must be a .py or .js file: {}",
                    path.display()
                )))
            }
        };
        Ok(Self::new(program, vec![path.display().to_string()]))
    }

    /// Replace the interpreter chosen by [`from_script`](Self::from_script)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct StdioTransport {
    writer: Arc<AsyncMutex<ChildStdin>>,
    pending: Arc<PendingRequests>,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    child: AsyncMutex<Option<Child>>,
    reader: JoinHandle<()>,
    request_timeout: Option<Duration>,
    label: String,
}

impl StdioTransport {
    /// Spawn the server and start reading its stdout
    pub fn spawn(command: &ServerCommand, request_timeout: Option<Duration>) -> Result<Self> {
        let label = command.display();
        tracing::info!(command = %label, "Starting MCP server process");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::Transport(format!("failed to start '{label}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Transport("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Transport("child stdout unavailable".into()))?;

        let writer = Arc::new(AsyncMutex::new(stdin));
        let pending = Arc::new(PendingRequests::default());
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            stdout,
            writer.clone(),
            pending.clone(),
            alive.clone(),
        ));

        Ok(Self {
            writer,
            pending,
            next_id: AtomicU64::new(1),
            alive,
            child: AsyncMutex::new(Some(child)),
            reader,
            request_timeout,
            label,
        })
    }

    async fn write_line(&self, line: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RuntimeError::Closed(format!("'{}' has exited", self.label)))
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.ensure_alive()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let (rx, _guard) = self.pending.register(id)?;

        tracing::trace!(id, method, "-> request");
        self.write_line(line).await?;

        wait_for_reply(rx, self.request_timeout, method, &self.label).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_alive()?;
        let line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        tracing::trace!(method, "-> notification");
        self.write_line(line).await
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "MCP server already exited");
            }
        }
        tracing::info!(command = %self.label, "MCP server stopped");
        Ok(())
    }

    fn label(&self) -> &str {
        &self.label
    }
}

async fn read_loop(
    stdout: ChildStdout,
    writer: Arc<AsyncMutex<ChildStdin>>,
    pending: Arc<PendingRequests>,
    alive: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed reading MCP server output");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_incoming(line) {
            Ok(IncomingMessage::Response(response)) => pending.resolve(response),
            Ok(IncomingMessage::Notification { method }) => {
                tracing::debug!(%method, "MCP notification");
            }
            Ok(IncomingMessage::Request { id, method }) => {
                tracing::debug!(%method, "Server-initiated request");
                let reply = reply_to_server_request(&id, &method).to_string();
                let mut writer = writer.lock().await;
                let written = async {
                    writer.write_all(reply.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = written {
                    tracing::warn!(error = %e, "Failed to answer server request");
                }
            }
            // Servers sometimes print banners on stdout; not fatal.
            Err(e) => tracing::debug!(error = %e, line, "Ignoring non-JSON-RPC output"),
        }
    }

    alive.store(false, Ordering::SeqCst);
    pending.fail_all();
    tracing::info!("MCP server output closed");
}
