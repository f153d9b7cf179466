//! Legacy HTTP+SSE transport
//!
//! The client keeps a GET event stream open. The server's first `endpoint`
//! event names the URL that accepts POSTed JSON-RPC messages; responses and
//! server requests come back as `message` events on the stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tokio::task::JoinHandle;

use super::http::{header_map, EVENT_STREAM};
use super::pending::{wait_for_reply, PendingRequests};
use super::protocol::{
    parse_incoming, reply_to_server_request, IncomingMessage, JsonRpcNotification, JsonRpcRequest,
};
use super::McpTransport;
use crate::error::{Result, RuntimeError};

type Events = BoxStream<'static, std::result::Result<Event, EventStreamError<reqwest::Error>>>;

/// Where client messages are POSTed
#[derive(Clone)]
struct MessageEndpoint {
    client: reqwest::Client,
    url: Url,
    headers: HeaderMap,
    request_timeout: Option<Duration>,
}

impl MessageEndpoint {
    async fn post(&self, body: String) -> Result<()> {
        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(limit) = self.request_timeout {
            request = request.timeout(limit);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RuntimeError::Closed("server dropped the SSE session".into()));
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Status { status, body });
        }
        Ok(())
    }
}

pub struct SseTransport {
    url: String,
    endpoint: MessageEndpoint,
    pending: Arc<PendingRequests>,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    request_timeout: Option<Duration>,
}

impl SseTransport {
    /// Open the event stream and wait for the server to name its endpoint
    pub async fn connect(
        url: &str,
        extra_headers: &HashMap<String, String>,
        request_timeout: Option<Duration>,
    ) -> Result<Self> {
        let base = Url::parse(url)
            .map_err(|e| RuntimeError::Config(format!("invalid server URL '{url}': {e}")))?;
        let headers = header_map(extra_headers)?;
        // No client-wide timeout: the stream stays open for the whole session.
        let client = reqwest::Client::builder().build()?;

        tracing::info!(url, "Opening MCP event stream");
        let response = client
            .get(base.clone())
            .headers(headers.clone())
            .header(ACCEPT, EVENT_STREAM)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Status { status, body });
        }

        let mut events: Events = response.bytes_stream().eventsource().boxed();
        let announced = match request_timeout {
            Some(limit) => tokio::time::timeout(limit, next_endpoint(&mut events))
                .await
                .map_err(|_| RuntimeError::Timeout {
                    method: "endpoint".into(),
                    secs: limit.as_secs(),
                })??,
            None => next_endpoint(&mut events).await?,
        };
        let endpoint_url = base.join(&announced).map_err(|e| {
            RuntimeError::Protocol(format!("bad endpoint '{announced}' from server: {e}"))
        })?;
        tracing::debug!(endpoint = %endpoint_url, "MCP message endpoint announced");

        let endpoint = MessageEndpoint {
            client,
            url: endpoint_url,
            headers,
            request_timeout,
        };
        let pending = Arc::new(PendingRequests::default());
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(
            events,
            endpoint.clone(),
            pending.clone(),
            alive.clone(),
        ));

        Ok(Self {
            url: url.to_string(),
            endpoint,
            pending,
            next_id: AtomicU64::new(1),
            alive,
            reader,
            request_timeout,
        })
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RuntimeError::Closed(format!("event stream from {} ended", self.url)))
        }
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.ensure_alive()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        let (rx, _guard) = self.pending.register(id)?;

        tracing::trace!(id, method, endpoint = %self.endpoint.url, "-> request");
        self.endpoint.post(body).await?;

        wait_for_reply(rx, self.request_timeout, method, &self.url).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_alive()?;
        let body = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        tracing::trace!(method, "-> notification");
        self.endpoint.post(body).await
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.pending.fail_all();
        tracing::info!(url = %self.url, "MCP event stream closed");
        Ok(())
    }

    fn label(&self) -> &str {
        &self.url
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn next_endpoint(events: &mut Events) -> Result<String> {
    while let Some(event) = events.next().await {
        let event =
            event.map_err(|e| RuntimeError::Transport(format!("event stream failed: {e}")))?;
        if event.event == "endpoint" {
            return Ok(event.data.trim().to_string());
        }
        tracing::debug!(event = %event.event, "Event before endpoint, skipped");
    }
    Err(RuntimeError::Closed(
        "event stream ended before the endpoint was announced".into(),
    ))
}

async fn read_loop(
    mut events: Events,
    endpoint: MessageEndpoint,
    pending: Arc<PendingRequests>,
    alive: Arc<AtomicBool>,
) {
    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "MCP event stream failed");
                break;
            }
        };
        let is_message = event.event.is_empty() || event.event == "message";
        if !is_message || event.data.is_empty() {
            tracing::debug!(event = %event.event, "Skipping event");
            continue;
        }

        match parse_incoming(&event.data) {
            Ok(IncomingMessage::Response(response)) => pending.resolve(response),
            Ok(IncomingMessage::Notification { method }) => {
                tracing::debug!(%method, "MCP notification");
            }
            Ok(IncomingMessage::Request { id, method }) => {
                tracing::debug!(%method, "Server-initiated request");
                let reply = reply_to_server_request(&id, &method).to_string();
                if let Err(e) = endpoint.post(reply).await {
                    tracing::warn!(error = %e, "Failed to answer server request");
                }
            }
            Err(e) => tracing::debug!(error = %e, "Skipping unparseable event"),
        }
    }

    alive.store(false, Ordering::SeqCst);
    pending.fail_all();
    tracing::info!("MCP event stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::test_server::{sse_message, Recorded, Reply, TestServer};
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    type Stream = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

    /// Legacy server: the stream announces `/messages?session_id=7`; POSTed
    /// requests are acknowledged with 202 and answered on the stream.
    fn legacy_server(stream: Stream) -> impl Fn(&Recorded) -> Reply + Send + Sync + 'static {
        move |req| {
            if req.method == "GET" {
                let (tx, reply) = Reply::event_stream();
                tx.send("event: endpoint\ndata: /messages?session_id=7\n\n".into())
                    .unwrap();
                *stream.lock().unwrap() = Some(tx);
                return reply;
            }
            if !req.path.starts_with("/messages") {
                return Reply::status(404);
            }

            let body = req.json();
            let result = match body["method"].as_str() {
                Some("initialize") => json!({
                    "protocolVersion": "2025-03-26",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "legacy", "version": "0.9.0"}
                }),
                Some("tools/list") => json!({"tools": [{"name": "echo"}]}),
                _ => return Reply::status(202),
            };
            if let Some(tx) = stream.lock().unwrap().as_ref() {
                let ping = json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"});
                tx.send(sse_message(&ping)).unwrap();
                let reply = json!({"jsonrpc": "2.0", "id": body["id"], "result": result});
                tx.send(sse_message(&reply)).unwrap();
            }
            Reply::status(202)
        }
    }

    async fn connect(server: &TestServer) -> SseTransport {
        let timeout = Some(Duration::from_secs(5));
        SseTransport::connect(&server.url("/sse"), &HashMap::new(), timeout)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_endpoint_handshake_and_stream_replies() {
        let server = TestServer::start(legacy_server(Stream::default())).await;

        let sse = connect(&server).await;
        let result = sse.request("initialize", None).await.unwrap();
        assert_eq!(result["serverInfo"]["name"], "legacy");
        sse.notify("notifications/initialized", None).await.unwrap();
        let listed = sse.request("tools/list", None).await.unwrap();
        assert_eq!(listed["tools"][0]["name"], "echo");

        let posts: Vec<_> = server
            .requests()
            .into_iter()
            .filter(|r| r.method == "POST")
            .collect();
        assert!(posts.iter().all(|r| r.path == "/messages?session_id=7"));
        assert!(posts
            .iter()
            .any(|r| r.json() == json!({"jsonrpc": "2.0", "id": "srv-1", "result": {}})));

        sse.close().await.unwrap();
        let err = sse.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Closed(_)));
    }

    #[tokio::test]
    async fn test_stream_end_closes_session() {
        let stream = Stream::default();
        let server = TestServer::start(legacy_server(stream.clone())).await;

        let sse = connect(&server).await;
        drop(stream.lock().unwrap().take());

        // The reader notices the end of the stream shortly after.
        for _ in 0..50 {
            if !sse.alive.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let err = sse.request("initialize", None).await.unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_refused_stream_reports_status() {
        let server = TestServer::start(|_| Reply::status(405)).await;
        let err = SseTransport::connect(&server.url("/sse"), &HashMap::new(), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::Status { status: 405, .. }));
    }
}
