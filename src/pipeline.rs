//! Top-level routing pipeline
//!
//! `SignalRouter` composes the canonicalizer, duplicate guard, classifier,
//! routing table and dispatch engine into the single `route` operation.
//! Every call ends in a terminal status: success, already_processed, or
//! routed_to_dlq; nothing is silently dropped. The DLQ replay operation
//! lives in the `dlq` module.

use crate::agents::AgentClient;
use crate::classify::Classifier;
use crate::config::RouterConfig;
use crate::dispatch::{BreakerRegistry, DispatchEngine, DispatchResult, RetryPolicy};
use crate::error::{FailureReason, RouterError, RouterResult};
use crate::identity;
use crate::observability::metrics;
use crate::routing::RoutingTable;
use crate::signal::{
    AgentOutcome, DlqEntry, Kind, LogRecord, MessageId, RecordStatus, RouteOutcome, RouteStatus,
    Signal,
};
use crate::store::{InsertOutcome, LogStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Composed routing pipeline
pub struct SignalRouter {
    pub(crate) classifier: Classifier,
    pub(crate) table: RoutingTable,
    pub(crate) engine: DispatchEngine,
    pub(crate) store: Arc<dyn LogStore>,
}

impl SignalRouter {
    /// Wire the pipeline from configuration with injected collaborators
    pub fn new(
        config: &RouterConfig,
        store: Arc<dyn LogStore>,
        client: Arc<dyn AgentClient>,
    ) -> Self {
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let engine = DispatchEngine::new(
            client,
            breakers,
            RetryPolicy::from_config(&config.retry),
            &config.dispatch,
        );
        Self {
            classifier: Classifier::from_config(&config.classifier),
            table: RoutingTable::from_config(&config.routing),
            engine,
            store,
        }
    }

    /// Breaker registry, shared with health reporting
    pub fn breakers(&self) -> Arc<BreakerRegistry> {
        self.engine.breakers()
    }

    /// Store handle, shared with health reporting
    pub fn store(&self) -> Arc<dyn LogStore> {
        self.store.clone()
    }

    /// Route one signal end to end
    ///
    /// Errors only on `store_unavailable`; every other failure mode is a
    /// terminal `routed_to_dlq` outcome.
    pub async fn route(&self, signal: Signal) -> RouterResult<RouteOutcome> {
        let started = Instant::now();
        let trace_id = signal
            .trace_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        // Identity first; a malformed payload still gets an addressable
        // fallback id so it can land in the DLQ
        let (message_id, identity_error) = match identity::message_id(&signal) {
            Ok(id) => (id, None),
            Err(error) => (identity::fallback_message_id(&signal), Some(error)),
        };

        // Atomic claim: losers short-circuit with the stored outcome and
        // never reach classification or dispatch
        let claim = self
            .store
            .insert_if_absent(LogRecord::pending(message_id.clone(), &signal.sender_id))
            .await
            .map_err(|e| RouterError::store_unavailable(e.to_string()))?;
        if let InsertOutcome::Existing(existing) = claim {
            metrics().record_duplicate();
            info!(message_id, trace_id, "duplicate signal short-circuited");
            return Ok(RouteOutcome {
                status: RouteStatus::AlreadyProcessed,
                message_id,
                kind: existing.kind,
                routed_agents: existing.routed_agents,
                response: existing.response,
                reason: existing.reason,
                trace_id,
            });
        }

        if let Some(error) = identity_error {
            warn!(message_id, trace_id, %error, "unclassifiable payload routed to DLQ");
            return self
                .finalize_dlq(
                    message_id,
                    signal,
                    None,
                    FailureReason::InvalidPayload,
                    Vec::new(),
                    HashMap::new(),
                    trace_id,
                    started,
                )
                .await;
        }

        let kind = self.classifier.classify(&signal);
        metrics().record_signal(kind.as_str());

        let agents = self.table.agents_for(kind).to_vec();
        if agents.is_empty() {
            info!(message_id, trace_id, kind = kind.as_str(),
                "no route for kind, enqueueing to DLQ");
            return self
                .finalize_dlq(
                    message_id,
                    signal,
                    Some(kind),
                    FailureReason::ClassificationUnknown,
                    Vec::new(),
                    HashMap::new(),
                    trace_id,
                    started,
                )
                .await;
        }

        let mode = self.table.mode_for(kind);
        let result = self
            .engine
            .dispatch(&agents, &signal.payload, &trace_id, mode)
            .await;
        metrics().record_request_latency(started.elapsed());

        if result.is_success() {
            self.finalize_success(
                message_id, &signal, kind, agents, result, trace_id, started,
            )
            .await
        } else {
            let reason = result
                .failure_reason
                .unwrap_or(FailureReason::AllAgentsFailed);
            warn!(message_id, trace_id, kind = kind.as_str(), reason = reason.as_str(),
                "dispatch failed, enqueueing to DLQ");
            self.finalize_dlq(
                message_id,
                signal,
                Some(kind),
                reason,
                agents,
                result.outcomes,
                trace_id,
                started,
            )
            .await
        }
    }

    async fn finalize_success(
        &self,
        message_id: MessageId,
        signal: &Signal,
        kind: Kind,
        agents: Vec<String>,
        result: DispatchResult,
        trace_id: String,
        started: Instant,
    ) -> RouterResult<RouteOutcome> {
        let record = LogRecord {
            message_id: message_id.clone(),
            ts: chrono::Utc::now(),
            sender_id: signal.sender_id.clone(),
            status: RecordStatus::Success,
            kind: Some(kind),
            routed_agents: agents.clone(),
            outcomes: result.outcomes,
            response: result.response.clone(),
            reason: None,
            latency_ms: started.elapsed().as_millis() as u64,
        };
        self.store
            .update(record)
            .await
            .map_err(|e| RouterError::store_unavailable(e.to_string()))?;

        info!(message_id, trace_id, kind = kind.as_str(), "signal routed");
        Ok(RouteOutcome {
            status: RouteStatus::Success,
            message_id,
            kind: Some(kind),
            routed_agents: agents,
            response: result.response,
            reason: None,
            trace_id,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize_dlq(
        &self,
        message_id: MessageId,
        signal: Signal,
        kind: Option<Kind>,
        reason: FailureReason,
        agents: Vec<String>,
        outcomes: HashMap<String, AgentOutcome>,
        trace_id: String,
        started: Instant,
    ) -> RouterResult<RouteOutcome> {
        let sender_id = signal.sender_id.clone();
        let entry = DlqEntry::new(message_id.clone(), signal, kind, reason);
        self.store
            .dlq_enqueue(entry)
            .await
            .map_err(|e| RouterError::store_unavailable(e.to_string()))?;
        metrics().record_dlq_enqueued(reason.as_str());
        if let Ok(depth) = self.store.dlq_depth().await {
            metrics().set_dlq_depth(depth as u64);
        }

        let record = LogRecord {
            message_id: message_id.clone(),
            ts: chrono::Utc::now(),
            sender_id,
            status: RecordStatus::RoutedToDlq,
            kind,
            // Routing-table order, not map order
            routed_agents: agents,
            outcomes,
            response: None,
            reason: Some(reason),
            latency_ms: started.elapsed().as_millis() as u64,
        };
        let routed_agents = record.routed_agents.clone();
        self.store
            .update(record)
            .await
            .map_err(|e| RouterError::store_unavailable(e.to_string()))?;

        Ok(RouteOutcome {
            status: RouteStatus::RoutedToDlq,
            message_id,
            kind,
            routed_agents,
            response: None,
            reason: Some(reason),
            trace_id,
        })
    }
}
