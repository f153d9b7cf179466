//! Streamable HTTP transport
//!
//! Every JSON-RPC message is POSTed to a single endpoint. The server answers
//! either with a JSON body or with an event stream that carries the response,
//! possibly preceded by notifications and requests of its own. The session id
//! handed out at `initialize` is echoed back on every later request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;

use super::protocol::{
    parse_incoming, reply_to_server_request, IncomingMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, PROTOCOL_VERSION,
};
use super::McpTransport;
use crate::error::{Result, RuntimeError};

const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_HEADER: &str = "mcp-protocol-version";
pub(super) const EVENT_STREAM: &str = "text/event-stream";

/// Turn user-supplied header pairs into a `HeaderMap`
pub(super) fn header_map(extra_headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in extra_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RuntimeError::Config(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| RuntimeError::Config(format!("invalid header value: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(
        url: impl Into<String>,
        extra_headers: &HashMap<String, String>,
        request_timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut headers = header_map(extra_headers)?;
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            url: url.into(),
            headers,
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().ok().and_then(|s| s.clone())
    }

    async fn post(&self, body: String) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(session) = self.session_id() {
            request = request
                .header(SESSION_HEADER, session)
                .header(PROTOCOL_HEADER, PROTOCOL_VERSION);
        }

        let response = request.send().await?;

        if response.status() == StatusCode::NOT_FOUND && self.session_id().is_some() {
            return Err(RuntimeError::Closed("server expired the MCP session".into()));
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Status { status, body });
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut slot) = self.session_id.write() {
                if slot.as_deref() != Some(session) {
                    tracing::debug!(session, "MCP session established");
                    *slot = Some(session.to_string());
                }
            }
        }

        Ok(response)
    }

    /// Answer a request the server sent on a response stream
    async fn answer_server_request(&self, id: &Value, method: &str) {
        tracing::debug!(%method, "Server-initiated request");
        let reply = reply_to_server_request(id, method).to_string();
        if let Err(e) = self.post(reply).await {
            tracing::warn!(error = %e, %method, "Failed to answer server request");
        }
    }

    /// Read `response` as an event stream until the reply to `id` shows up
    async fn read_stream(&self, response: reqwest::Response, id: u64) -> Result<JsonRpcResponse> {
        let mut events = response.bytes_stream().eventsource();

        while let Some(event) = events.next().await {
            let event = event
                .map_err(|e| RuntimeError::Transport(format!("event stream failed: {e}")))?;
            if event.data.is_empty() {
                continue;
            }

            match parse_incoming(&event.data) {
                Ok(IncomingMessage::Response(response)) if response.id.as_u64() == Some(id) => {
                    return Ok(response);
                }
                Ok(IncomingMessage::Response(response)) => {
                    tracing::debug!(id = %response.id, "Ignoring response to another request");
                }
                Ok(IncomingMessage::Notification { method }) => {
                    tracing::debug!(%method, "MCP notification (stream)");
                }
                Ok(IncomingMessage::Request { id, method }) => {
                    self.answer_server_request(&id, &method).await;
                }
                Err(e) => tracing::debug!(error = %e, "Skipping unparseable event"),
            }
        }

        Err(RuntimeError::Protocol(format!(
            "event stream ended without a response to request {id}"
        )))
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        tracing::trace!(id, method, url = %self.url, "-> request");
        let response = self.post(body).await?;

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(EVENT_STREAM));

        let response = if is_stream {
            self.read_stream(response, id).await?
        } else {
            serde_json::from_str::<JsonRpcResponse>(&response.text().await?)?
        };
        response.into_result()
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let body = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        tracing::trace!(method, "-> notification");
        self.post(body).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(session) = self.session_id() else {
            return Ok(());
        };

        // Servers may refuse explicit termination (405); that is fine.
        let result = self
            .client
            .delete(&self.url)
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session)
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!(error = %e, "Session termination request failed");
        }
        if let Ok(mut slot) = self.session_id.write() {
            *slot = None;
        }
        Ok(())
    }

    fn label(&self) -> &str {
        &self.url
    }
}
