//! Downstream agent invocation
//!
//! `AgentClient` abstracts the agent call so the dispatch engine can be
//! exercised with mocks; `HttpAgentClient` is the production implementation
//! posting JSON to the configured endpoint per agent with a per-call
//! timeout and an `X-Trace-Id` correlation header.

use crate::config::AgentsSection;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors surfaced by a single agent invocation (one network attempt)
#[derive(Debug, Error)]
pub enum AgentCallError {
    #[error("Agent call timed out")]
    Timeout,

    #[error("Agent returned status {status}")]
    Status { status: u16 },

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("No endpoint configured for agent '{0}'")]
    UnknownAgent(String),

    #[error("Agent response was not valid JSON: {0}")]
    InvalidResponse(String),
}

impl AgentCallError {
    /// Transient errors are eligible for retry; 4xx and configuration
    /// errors are not
    pub fn is_transient(&self) -> bool {
        match self {
            AgentCallError::Timeout | AgentCallError::Connect(_) => true,
            AgentCallError::Status { status } => *status >= 500,
            AgentCallError::UnknownAgent(_) | AgentCallError::InvalidResponse(_) => false,
        }
    }
}

/// Abstraction over downstream agent endpoints
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Invoke an agent with the signal payload, bounded by `timeout`
    async fn invoke(
        &self,
        agent: &str,
        payload: &Value,
        trace_id: &str,
        timeout: Duration,
    ) -> Result<Value, AgentCallError>;
}

/// HTTP implementation posting JSON to per-agent endpoints
pub struct HttpAgentClient {
    endpoints: HashMap<String, String>,
    client: reqwest::Client,
}

impl HttpAgentClient {
    /// Build the client from configured endpoints
    pub fn from_config(config: &AgentsSection) -> Self {
        Self {
            endpoints: config.endpoints.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn invoke(
        &self,
        agent: &str,
        payload: &Value,
        trace_id: &str,
        timeout: Duration,
    ) -> Result<Value, AgentCallError> {
        let endpoint = self
            .endpoints
            .get(agent)
            .ok_or_else(|| AgentCallError::UnknownAgent(agent.to_string()))?;

        debug!(agent, endpoint, trace_id, "invoking agent");

        let response = self
            .client
            .post(endpoint)
            .json(payload)
            .header("X-Trace-Id", trace_id)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentCallError::Timeout
                } else {
                    AgentCallError::Connect(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(agent, status = status.as_u16(), trace_id, "agent returned error status");
            return Err(AgentCallError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AgentCallError::InvalidResponse(e.to_string()))
    }
}
