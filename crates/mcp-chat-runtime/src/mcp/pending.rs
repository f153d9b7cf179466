//! Request/response correlation for transports whose replies arrive on a
//! separate reader task (stdio and legacy HTTP+SSE).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use super::protocol::JsonRpcResponse;
use crate::error::{Result, RuntimeError};

/// In-flight requests keyed by JSON-RPC id
#[derive(Default)]
pub(super) struct PendingRequests {
    waiters: Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
}

impl PendingRequests {
    /// Register `id` before the request is written, so a fast reply cannot be
    /// missed. The guard drops the entry if the caller gives up early.
    pub(super) fn register(
        self: &Arc<Self>,
        id: u64,
    ) -> Result<(oneshot::Receiver<JsonRpcResponse>, PendingGuard)> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .map_err(|_| RuntimeError::Transport("pending map poisoned".into()))?
            .insert(id, tx);
        let guard = PendingGuard {
            pending: Arc::clone(self),
            id,
        };
        Ok((rx, guard))
    }

    /// Hand a response to whoever is waiting on its id
    pub(super) fn resolve(&self, response: JsonRpcResponse) {
        let Some(id) = response.id.as_u64() else {
            tracing::warn!(id = %response.id, "Response with non-numeric id");
            return;
        };
        let waiter = self.waiters.lock().ok().and_then(|mut w| w.remove(&id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => tracing::warn!(id, "Response for unknown request id"),
        }
    }

    /// Wake every waiter with a closed error
    pub(super) fn fail_all(&self) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.clear();
        }
    }

    fn remove(&self, id: u64) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(&id);
        }
    }
}

/// Removes the pending entry if the waiting request is dropped early
pub(super) struct PendingGuard {
    pending: Arc<PendingRequests>,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

/// Wait for the reply registered under `rx`, honouring the request timeout
pub(super) async fn wait_for_reply(
    rx: oneshot::Receiver<JsonRpcResponse>,
    request_timeout: Option<Duration>,
    method: &str,
    label: &str,
) -> Result<Value> {
    let response = match request_timeout {
        Some(limit) => tokio::time::timeout(limit, rx)
            .await
            .map_err(|_| RuntimeError::Timeout {
                method: method.to_string(),
                secs: limit.as_secs(),
            })?,
        None => rx.await,
    };

    response
        .map_err(|_| RuntimeError::Closed(format!("'{label}' closed before answering {method}")))?
        .into_result()
}
