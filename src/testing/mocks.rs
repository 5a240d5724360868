//! Mock implementations for testing
//!
//! Provides a scripted `MockAgentClient` and a failing `LogStore` so the
//! pipeline can be exercised without external dependencies.

use crate::agents::{AgentCallError, AgentClient};
use crate::signal::{DlqEntry, LogRecord};
use crate::store::{InsertOutcome, LogStore, StoreError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// One recorded agent invocation
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub agent: String,
    pub payload: Value,
    pub trace_id: String,
}

/// Scripted behavior for one invocation of a mocked agent
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Succeed with the given response payload
    Success(Value),
    /// Fail with an HTTP-style status
    Error(u16),
    /// Fail as a connection error
    ConnectError,
    /// Never complete within any reasonable call timeout
    Hang,
}

/// Mock agent client with per-agent scripted responses
///
/// Scripts are consumed front-first; once a script is exhausted (or for
/// unscripted agents) every call succeeds with a canned acknowledgement.
#[derive(Debug, Default)]
pub struct MockAgentClient {
    scripts: Mutex<HashMap<String, Vec<ScriptedResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockAgentClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue scripted responses for an agent
    pub async fn script(&self, agent: &str, responses: Vec<ScriptedResponse>) {
        let mut scripts = self.scripts.lock().await;
        scripts
            .entry(agent.to_string())
            .or_default()
            .extend(responses);
    }

    /// All recorded invocations, in call order
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    /// Number of invocations recorded for one agent
    pub async fn call_count(&self, agent: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.agent == agent)
            .count()
    }

    /// Total invocations across all agents
    pub async fn total_calls(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl AgentClient for MockAgentClient {
    async fn invoke(
        &self,
        agent: &str,
        payload: &Value,
        trace_id: &str,
        timeout: Duration,
    ) -> Result<Value, AgentCallError> {
        self.calls.lock().await.push(RecordedCall {
            agent: agent.to_string(),
            payload: payload.clone(),
            trace_id: trace_id.to_string(),
        });

        let next = {
            let mut scripts = self.scripts.lock().await;
            scripts.get_mut(agent).and_then(|queue| {
                if queue.is_empty() {
                    None
                } else {
                    Some(queue.remove(0))
                }
            })
        };

        match next {
            None => Ok(json!({"status": "ok", "agent": agent})),
            Some(ScriptedResponse::Success(value)) => Ok(value),
            Some(ScriptedResponse::Error(status)) => Err(AgentCallError::Status { status }),
            Some(ScriptedResponse::ConnectError) => {
                Err(AgentCallError::Connect("connection refused".to_string()))
            }
            Some(ScriptedResponse::Hang) => {
                tokio::time::sleep(timeout + Duration::from_secs(60)).await;
                Err(AgentCallError::Timeout)
            }
        }
    }
}

/// Store whose every operation fails as unavailable
#[derive(Debug, Default)]
pub struct UnavailableStore;

impl UnavailableStore {
    fn err<T>() -> Result<T, StoreError> {
        Err(StoreError::Unavailable("mock store offline".to_string()))
    }
}

#[async_trait]
impl LogStore for UnavailableStore {
    async fn insert_if_absent(&self, _record: LogRecord) -> Result<InsertOutcome, StoreError> {
        Self::err()
    }

    async fn get(&self, _message_id: &str) -> Result<Option<LogRecord>, StoreError> {
        Self::err()
    }

    async fn update(&self, _record: LogRecord) -> Result<(), StoreError> {
        Self::err()
    }

    async fn dlq_enqueue(&self, _entry: DlqEntry) -> Result<(), StoreError> {
        Self::err()
    }

    async fn dlq_list_oldest(&self, _limit: usize) -> Result<Vec<DlqEntry>, StoreError> {
        Self::err()
    }

    async fn dlq_resolve(&self, _message_id: &str) -> Result<(), StoreError> {
        Self::err()
    }

    async fn dlq_increment_attempt(&self, _message_id: &str) -> Result<(), StoreError> {
        Self::err()
    }

    async fn dlq_depth(&self) -> Result<usize, StoreError> {
        Self::err()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Self::err()
    }
}
