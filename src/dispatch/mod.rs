//! Bounded-concurrency fan-out and aggregation
//!
//! The dispatch engine invokes the routed agent set concurrently under a
//! process-wide semaphore, gating every call through the circuit breaker
//! and the retry controller. Two aggregation modes: first-success returns
//! on the first winning agent and cancels the rest; aggregate-all waits for
//! every agent and merges responses keyed by agent id.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerDecision, BreakerRegistry, BreakerState};
pub use retry::RetryPolicy;

use crate::agents::{AgentCallError, AgentClient};
use crate::config::{AggregationMode, DispatchSection};
use crate::error::FailureReason;
use crate::signal::{AgentId, AgentOutcome};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Aggregated result of one fan-out
#[derive(Debug, Clone)]
pub struct DispatchResult {
    /// Per-agent outcome, keyed by agent id (order-insensitive merge)
    pub outcomes: HashMap<AgentId, AgentOutcome>,
    /// Merged successful responses keyed by agent id, if any succeeded
    pub response: Option<Value>,
    /// Overall failure reason when no agent succeeded
    pub failure_reason: Option<FailureReason>,
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        self.failure_reason.is_none()
    }
}

/// Fan-out engine with shared breaker state and a global in-flight cap
pub struct DispatchEngine {
    client: Arc<dyn AgentClient>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    call_timeout: Duration,
    request_timeout: Duration,
}

impl DispatchEngine {
    pub fn new(
        client: Arc<dyn AgentClient>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryPolicy,
        config: &DispatchSection,
    ) -> Self {
        Self {
            client,
            breakers,
            retry,
            semaphore: Arc::new(Semaphore::new(config.max_in_flight)),
            call_timeout: Duration::from_millis(config.call_timeout_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }

    /// Invoke the routed agent set and aggregate per the given mode
    pub async fn dispatch(
        &self,
        agents: &[AgentId],
        payload: &Value,
        trace_id: &str,
        mode: AggregationMode,
    ) -> DispatchResult {
        if agents.is_empty() {
            return DispatchResult {
                outcomes: HashMap::new(),
                response: None,
                failure_reason: Some(FailureReason::AllAgentsFailed),
            };
        }

        let deadline =
            tokio::time::Instant::from_std(Instant::now() + self.request_timeout);
        let mut join_set = JoinSet::new();
        for agent in agents {
            let client = self.client.clone();
            let breakers = self.breakers.clone();
            let retry = self.retry.clone();
            let semaphore = self.semaphore.clone();
            let agent = agent.clone();
            let payload = payload.clone();
            let trace_id = trace_id.to_string();
            let call_timeout = self.call_timeout;
            join_set.spawn(async move {
                let outcome = call_agent(
                    client, breakers, retry, semaphore, &agent, payload, trace_id,
                    call_timeout,
                )
                .await;
                (agent, outcome)
            });
        }

        let mut outcomes: HashMap<AgentId, AgentOutcome> = HashMap::new();
        let mut won = false;
        loop {
            let joined = match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                Err(_) => {
                    // Overall deadline: cancel stragglers, they count as failures
                    warn!(trace_id, "request deadline reached, cancelling pending agent calls");
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                    break;
                }
                Ok(None) => break,
                Ok(Some(joined)) => joined,
            };

            let (agent, outcome) = match joined {
                Ok(pair) => pair,
                // Aborted sibling in first-success mode
                Err(_) => continue,
            };

            if won {
                // Winner already finalized the outcome; late results are discarded
                outcomes.insert(agent, AgentOutcome::Cancelled);
                continue;
            }
            let finish_early = mode == AggregationMode::FirstSuccess && outcome.is_success();
            outcomes.insert(agent, outcome);
            if finish_early {
                won = true;
                join_set.abort_all();
            }
        }

        // Agents without a recorded outcome were cancelled or timed out
        for agent in agents {
            if !outcomes.contains_key(agent) {
                let outcome = if won {
                    AgentOutcome::Cancelled
                } else {
                    AgentOutcome::Timeout
                };
                outcomes.insert(agent.clone(), outcome);
            }
        }

        let mut merged = Map::new();
        for (agent, outcome) in &outcomes {
            if let AgentOutcome::Success { response } = outcome {
                merged.insert(agent.clone(), response.clone());
            }
        }

        if merged.is_empty() {
            let all_circuit_open = outcomes
                .values()
                .all(|o| matches!(o, AgentOutcome::CircuitOpen));
            let reason = if all_circuit_open {
                FailureReason::CircuitOpen
            } else {
                FailureReason::AllAgentsFailed
            };
            DispatchResult {
                outcomes,
                response: None,
                failure_reason: Some(reason),
            }
        } else {
            DispatchResult {
                outcomes,
                response: Some(Value::Object(merged)),
                failure_reason: None,
            }
        }
    }

    /// Breaker registry shared with health reporting
    pub fn breakers(&self) -> Arc<BreakerRegistry> {
        self.breakers.clone()
    }
}

/// One gated agent call: semaphore, breaker, then retry loop
#[allow(clippy::too_many_arguments)]
async fn call_agent(
    client: Arc<dyn AgentClient>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    agent: &str,
    payload: Value,
    trace_id: String,
    call_timeout: Duration,
) -> AgentOutcome {
    let started = Instant::now();
    let deadline = started + call_timeout;

    // Backpressure: waiting for a permit consumes the call budget; a
    // saturated semaphore degrades to a timeout rather than unbounded queueing
    let _permit = match tokio::time::timeout(call_timeout, semaphore.acquire_owned()).await {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => {
            return AgentOutcome::Failure {
                reason: FailureReason::AgentFailure,
                message: "dispatch semaphore closed".to_string(),
            }
        }
        Err(_) => {
            crate::observability::metrics().record_agent_call(agent, false, call_timeout);
            return AgentOutcome::Timeout;
        }
    };

    let probe = match breakers.acquire(agent).await {
        BreakerDecision::Reject => {
            debug!(agent, trace_id, "breaker open, short-circuiting call");
            return AgentOutcome::CircuitOpen;
        }
        BreakerDecision::Allow { probe } => probe,
    };

    let result = if let Some(guard) = probe {
        // Single probe attempt, never retried. The guard is held across the
        // call so an abort here reopens the breaker instead of stranding the
        // probe reservation.
        let remaining = deadline.saturating_duration_since(Instant::now());
        let result = client.invoke(agent, &payload, &trace_id, remaining).await;
        match &result {
            Ok(_) => breakers.record_success(agent, true).await,
            Err(_) => breakers.record_failure(agent, true).await,
        }
        drop(guard);
        result
    } else {
        let client = client.clone();
        let breakers = breakers.clone();
        let agent_id = agent.to_string();
        let trace = trace_id.clone();
        retry
            .run(agent, deadline, move |_attempt| {
                let client = client.clone();
                let breakers = breakers.clone();
                let agent = agent_id.clone();
                let payload = payload.clone();
                let trace = trace.clone();
                async move {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match client.invoke(&agent, &payload, &trace, remaining).await {
                        Ok(response) => {
                            breakers.record_success(&agent, false).await;
                            Ok(response)
                        }
                        Err(error) => {
                            breakers.record_failure(&agent, false).await;
                            Err(error)
                        }
                    }
                }
            })
            .await
    };

    let elapsed = started.elapsed();
    match result {
        Ok(response) => {
            crate::observability::metrics().record_agent_call(agent, true, elapsed);
            AgentOutcome::Success { response }
        }
        Err(AgentCallError::Timeout) => {
            crate::observability::metrics().record_agent_call(agent, false, elapsed);
            AgentOutcome::Timeout
        }
        Err(error) => {
            crate::observability::metrics().record_agent_call(agent, false, elapsed);
            AgentOutcome::Failure {
                reason: FailureReason::AgentFailure,
                message: error.to_string(),
            }
        }
    }
}
