//! MCP Tool Provider
//!
//! [`McpSession`] implements the core `ToolProvider` trait on top of an MCP
//! server reached over one of three transports:
//!
//! - [`StdioTransport`]: spawn the server as a child process
//! - [`HttpTransport`]: Streamable HTTP endpoint
//! - [`SseTransport`]: legacy HTTP+SSE (GET event stream, POST endpoint)

mod http;
mod pending;
pub mod protocol;
mod sse;
mod stdio;
#[cfg(test)]
mod test_server;

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::{ServerCommand, StdioTransport};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use mcp_chat_core::{AgentError, InvocationError, ToolDescriptor, ToolOutput, ToolProvider};
use serde_json::{Map, Value};

use crate::error::{Result, RuntimeError};
use protocol::{InitializeResult, ServerInfo};

/// Upper bound on `tools/list` pages, in case a server never stops paging
const MAX_LIST_PAGES: usize = 64;

/// Moves JSON-RPC messages to and from an MCP server
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for its result
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value>;

    /// Send a notification (no response)
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Tear the connection down
    async fn close(&self) -> Result<()>;

    /// Command line or URL, for logs
    fn label(&self) -> &str;
}

/// Connection settings shared by both transports
#[derive(Clone, Debug)]
pub struct McpOptions {
    /// Per-request timeout; `None` waits indefinitely
    pub request_timeout: Option<Duration>,

    /// Extra HTTP headers (HTTP transport only)
    pub headers: HashMap<String, String>,
}

impl Default for McpOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(180)),
            headers: HashMap::new(),
        }
    }
}

/// A live MCP client session
pub struct McpSession {
    transport: Box<dyn McpTransport>,
    initialized: AtomicBool,
    server: RwLock<Option<InitializeResult>>,
}

impl McpSession {
    /// Wrap a transport; call `initialize` before use
    pub fn new(transport: impl McpTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            initialized: AtomicBool::new(false),
            server: RwLock::new(None),
        }
    }

    /// Spawn `command` and complete the handshake
    pub async fn connect_stdio(command: &ServerCommand, options: &McpOptions) -> Result<Self> {
        let session = Self::new(StdioTransport::spawn(command, options.request_timeout)?);
        session.handshake().await?;
        Ok(session)
    }

    /// Connect to a Streamable HTTP endpoint and complete the handshake
    pub async fn connect_http(url: &str, options: &McpOptions) -> Result<Self> {
        let transport = HttpTransport::new(url, &options.headers, options.request_timeout)?;
        let session = Self::new(transport);
        session.handshake().await?;
        Ok(session)
    }

    /// Connect to a legacy HTTP+SSE server and complete the handshake
    pub async fn connect_sse(url: &str, options: &McpOptions) -> Result<Self> {
        let transport =
            SseTransport::connect(url, &options.headers, options.request_timeout).await?;
        let session = Self::new(transport);
        session.handshake().await?;
        Ok(session)
    }

    /// Connect by URL, choosing the HTTP transport.
    ///
    /// A path ending in `/sse` goes straight to the legacy transport. Anything
    /// else tries Streamable HTTP first and falls back to HTTP+SSE when the
    /// server rejects the initialize POST with 400, 404 or 405.
    pub async fn connect_url(url: &str, options: &McpOptions) -> Result<Self> {
        if is_legacy_sse_url(url) {
            return Self::connect_sse(url, options).await;
        }
        match Self::connect_http(url, options).await {
            Err(RuntimeError::Status {
                status: 400 | 404 | 405,
                ..
            }) => {
                tracing::info!(url, "Streamable HTTP refused, retrying as HTTP+SSE");
                Self::connect_sse(url, options).await
            }
            other => other,
        }
    }

    async fn handshake(&self) -> Result<()> {
        let result = self
            .transport
            .request(
                "initialize",
                Some(protocol::initialize_params(env!("CARGO_PKG_VERSION"))),
            )
            .await?;
        let info: InitializeResult = serde_json::from_value(result)?;

        if !info.supports_tools() {
            tracing::warn!(
                server = %info.server_info.name,
                "Server does not advertise the tools capability"
            );
        }
        tracing::info!(
            server = %info.server_info.name,
            version = %info.server_info.version,
            protocol = %info.protocol_version,
            "MCP session initialized"
        );

        self.transport
            .notify("notifications/initialized", None)
            .await?;

        if let Ok(mut slot) = self.server.write() {
            *slot = Some(info);
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Server name/version reported during the handshake
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server
            .read()
            .ok()
            .and_then(|s| s.as_ref().map(|i| i.server_info.clone()))
    }

    /// Usage instructions the server sent during the handshake, if any
    pub fn server_instructions(&self) -> Option<String> {
        self.server
            .read()
            .ok()
            .and_then(|s| s.as_ref().and_then(|i| i.instructions.clone()))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn list_all_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let result = self
                .transport
                .request("tools/list", protocol::tools_list_params(cursor.as_deref()))
                .await?;
            let page = protocol::parse_tools_page(result)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }

        tracing::warn!(pages = MAX_LIST_PAGES, "tools/list kept paginating, truncating");
        Ok(tools)
    }
}

fn is_legacy_sse_url(url: &str) -> bool {
    reqwest::Url::parse(url).is_ok_and(|u| u.path().trim_end_matches('/').ends_with("/sse"))
}

#[async_trait]
impl ToolProvider for McpSession {
    async fn initialize(&self) -> mcp_chat_core::Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        self.handshake().await.map_err(|e| match e {
            RuntimeError::Config(msg) => AgentError::Config(msg),
            other => AgentError::ProviderUnavailable(other.to_string()),
        })
    }

    async fn list_tools(&self) -> mcp_chat_core::Result<Vec<ToolDescriptor>> {
        if !self.is_initialized() {
            return Err(AgentError::ProviderUnavailable(
                "MCP session not initialized".into(),
            ));
        }
        self.list_all_tools()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> std::result::Result<ToolOutput, InvocationError> {
        if !self.is_initialized() {
            return Err(InvocationError::ProviderUnavailable(
                "MCP session not initialized".into(),
            ));
        }

        let result = self
            .transport
            .request("tools/call", Some(protocol::tools_call_params(name, arguments)))
            .await
            .map_err(|e| e.into_invocation_error(name))?;

        Ok(protocol::parse_call_result(&result))
    }

    async fn close(&self) -> mcp_chat_core::Result<()> {
        self.initialized.store(false, Ordering::SeqCst);
        self.transport.close().await.map_err(AgentError::from)
    }

    fn name(&self) -> &str {
        self.transport.label()
    }
}
