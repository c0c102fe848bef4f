//! Usage: Shared test doubles (scripted transport for gateway/domain/app tests).

use crate::gateway::request::{ApiBody, ApiRequest};
use crate::gateway::transport::{Transport, TransportResponse};
use crate::shared::error::{AppError, AppResult};
use crate::shared::mutex_ext::MutexExt;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub bearer: Option<String>,
    pub json_body: Option<serde_json::Value>,
}

enum Scripted {
    Response(TransportResponse),
    Failure(String),
}

/// Transport double with per-path response queues. Every request is
/// recorded; an unscripted path gets a distinctive 599 so a test failure
/// points at the missing script instead of a misleading assertion.
pub struct MockTransport {
    scripted: Mutex<HashMap<String, VecDeque<Scripted>>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    recorded: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Queues one JSON response for `path`. Responses for the same path are
    /// served in the order they were scripted.
    pub fn script_json(&self, path: &str, status: u16, body: serde_json::Value) {
        let body = Bytes::from(serde_json::to_vec(&body).expect("scripted body encodes"));
        self.push(path, Scripted::Response(TransportResponse { status, body }));
    }

    /// Queues a transport-level failure (connection refused, timeout) for
    /// `path`.
    pub fn script_failure(&self, path: &str, message: &str) {
        self.push(path, Scripted::Failure(message.to_string()));
    }

    /// Installs a zero-permit gate on `path`: sends block until the test
    /// calls `add_permits`. Lets a test hold a renewal open while other
    /// callers pile up.
    pub fn gate(&self, path: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates
            .lock_or_recover()
            .insert(path.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.recorded.lock_or_recover().clone()
    }

    /// Number of requests seen for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.recorded
            .lock_or_recover()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    fn push(&self, path: &str, entry: Scripted) {
        self.scripted
            .lock_or_recover()
            .entry(path.to_string())
            .or_default()
            .push_back(entry);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> AppResult<TransportResponse> {
        let json_body = match &request.body {
            ApiBody::Json(value) => Some(value.clone()),
            _ => None,
        };
        self.recorded.lock_or_recover().push(RecordedRequest {
            method: request.method.as_str().to_string(),
            path: request.path.clone(),
            bearer: bearer.map(str::to_string),
            json_body,
        });

        let gate = self.gates.lock_or_recover().get(&request.path).cloned();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| AppError::new("API_TRANSPORT", "test gate closed"))?;
        }

        let next = self
            .scripted
            .lock_or_recover()
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::Failure(message)) => {
                Err(AppError::new("API_TRANSPORT", message))
            }
            None => Ok(TransportResponse {
                status: 599,
                body: Bytes::from_static(b"{\"detail\": \"unscripted path in MockTransport\"}"),
            }),
        }
    }
}
