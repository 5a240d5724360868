//! Core message types for the routing pipeline
//!
//! Defines the inbound `Signal`, the classification `Kind`, per-agent
//! dispatch outcomes, the durable `LogRecord` and `DlqEntry` rows, and the
//! caller-facing `RouteOutcome` / `ReplayReport` shapes.

use crate::error::FailureReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Deterministic message identity, hex digest over the identity tuple
pub type MessageId = String;

/// Inbound request to be classified and routed
///
/// Identity is derived from `sender_id`, `event_id` (or `user_id` plus
/// `timestamp`), `payload_version` and the canonical payload. `trace_id`
/// and `timestamp` are volatile and excluded from identity computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Sender / tenant identity
    pub sender_id: String,
    /// Stable event identity, preferred identity component when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// End-user identity, combined with `timestamp` when `event_id` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Wall-clock receive time, volatile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Payload schema version, part of the identity tuple
    #[serde(default = "default_payload_version")]
    pub payload_version: String,
    /// Free-form content payload
    pub payload: Value,
    /// Correlation id, volatile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

fn default_payload_version() -> String {
    "1".to_string()
}

impl Signal {
    /// Convenience constructor for a sender and payload
    pub fn new(sender_id: impl Into<String>, payload: Value) -> Self {
        Self {
            sender_id: sender_id.into(),
            event_id: None,
            user_id: None,
            timestamp: None,
            payload_version: default_payload_version(),
            payload,
            trace_id: None,
        }
    }

    /// Set the stable event identity
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Set the correlation id
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// Classification outcome, exactly one per signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Assist,
    Policy,
    Emergency,
    Unknown,
}

impl Kind {
    /// Stable string form used in metrics labels and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Assist => "assist",
            Kind::Policy => "policy",
            Kind::Emergency => "emergency",
            Kind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downstream agent identifier
pub type AgentId = String;

/// Per-agent dispatch result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AgentOutcome {
    /// Agent accepted the signal and returned a response payload
    Success { response: Value },
    /// Agent rejected the signal or the call failed after retries
    Failure {
        reason: FailureReason,
        message: String,
    },
    /// Breaker short-circuited the call without a network attempt
    CircuitOpen,
    /// Call did not complete before its deadline
    Timeout,
    /// Sibling call won in first-success mode before this one finished
    Cancelled,
}

impl AgentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AgentOutcome::Success { .. })
    }

    /// Reason code recorded for non-success outcomes
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            AgentOutcome::Success { .. } | AgentOutcome::Cancelled => None,
            AgentOutcome::Failure { reason, .. } => Some(*reason),
            AgentOutcome::CircuitOpen => Some(FailureReason::CircuitOpen),
            AgentOutcome::Timeout => Some(FailureReason::AgentTimeout),
        }
    }
}

/// Lifecycle status of a durable log record
///
/// A record is claimed as `Pending` before dispatch (the duplicate-guard
/// insert) and finalized in place afterwards. DLQ replay may move a record
/// from `RoutedToDlq` to `Success`, never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Success,
    RoutedToDlq,
}

/// Durable row keyed by message id, created once per unique signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub message_id: MessageId,
    pub ts: DateTime<Utc>,
    pub sender_id: String,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Kind>,
    #[serde(default)]
    pub routed_agents: Vec<AgentId>,
    #[serde(default)]
    pub outcomes: HashMap<AgentId, AgentOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(default)]
    pub latency_ms: u64,
}

impl LogRecord {
    /// Fresh pending record claimed by the duplicate guard before dispatch
    pub fn pending(message_id: MessageId, sender_id: impl Into<String>) -> Self {
        Self {
            message_id,
            ts: Utc::now(),
            sender_id: sender_id.into(),
            status: RecordStatus::Pending,
            kind: None,
            routed_agents: Vec::new(),
            outcomes: HashMap::new(),
            response: None,
            reason: None,
            latency_ms: 0,
        }
    }
}

/// DLQ row keyed by message id, retained until successfully replayed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    pub message_id: MessageId,
    pub signal: Signal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Kind>,
    pub reason: FailureReason,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl DlqEntry {
    pub fn new(message_id: MessageId, signal: Signal, kind: Option<Kind>, reason: FailureReason) -> Self {
        Self {
            message_id,
            signal,
            kind,
            reason,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// Terminal status returned to the caller of `route`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Success,
    AlreadyProcessed,
    RoutedToDlq,
}

/// Aggregated result of one `route` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteOutcome {
    pub status: RouteStatus,
    pub message_id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Kind>,
    #[serde(default)]
    pub routed_agents: Vec<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    pub trace_id: String,
}

/// Per-entry outcome of a DLQ replay pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplayItemOutcome {
    /// Re-dispatch succeeded, entry resolved
    Replayed { kind: Kind },
    /// A successful log record already existed, entry resolved without dispatch
    SkippedDuplicate,
    /// Re-dispatch failed again, attempt counter incremented, entry retained
    Failed { reason: FailureReason },
    /// Dry-run preview of what a real replay would do
    WouldReplay { kind: Kind },
    /// Dry-run preview of a duplicate skip
    WouldSkipDuplicate,
}

/// One replayed (or previewed) DLQ entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayItem {
    pub message_id: MessageId,
    #[serde(flatten)]
    pub outcome: ReplayItemOutcome,
}

/// Summary of one `replay_dlq` invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Entries re-dispatched successfully
    pub processed: usize,
    /// Entries skipped because a successful record already existed
    pub skipped: usize,
    /// Entries that failed again and stay in the queue
    pub failed: usize,
    /// Queue depth after this pass
    pub remaining: usize,
    /// Whether this was a preview with no mutations
    pub dry_run: bool,
    pub items: Vec<ReplayItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signal_defaults_on_deserialize() {
        let signal: Signal = serde_json::from_str(
            r#"{"sender_id":"u1","payload":{"message":"help"}}"#,
        )
        .unwrap();
        assert_eq!(signal.sender_id, "u1");
        assert_eq!(signal.payload_version, "1");
        assert!(signal.event_id.is_none());
        assert!(signal.trace_id.is_none());
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Kind::Emergency).unwrap(), "\"emergency\"");
        let kind: Kind = serde_json::from_str("\"assist\"").unwrap();
        assert_eq!(kind, Kind::Assist);
    }

    #[test]
    fn test_agent_outcome_tagging() {
        let outcome = AgentOutcome::Success {
            response: json!({"ok": true}),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "success");
        assert!(outcome.is_success());
        assert!(outcome.failure_reason().is_none());
    }

    #[test]
    fn test_agent_outcome_failure_reasons() {
        assert_eq!(
            AgentOutcome::Timeout.failure_reason(),
            Some(crate::error::FailureReason::AgentTimeout)
        );
        assert_eq!(
            AgentOutcome::CircuitOpen.failure_reason(),
            Some(crate::error::FailureReason::CircuitOpen)
        );
        assert_eq!(AgentOutcome::Cancelled.failure_reason(), None);
    }

    #[test]
    fn test_pending_record_shape() {
        let record = LogRecord::pending("abc123".to_string(), "tenant-1");
        assert_eq!(record.status, RecordStatus::Pending);
        assert!(record.kind.is_none());
        assert!(record.routed_agents.is_empty());
        assert!(record.outcomes.is_empty());
    }

    #[test]
    fn test_replay_item_flattens_outcome() {
        let item = ReplayItem {
            message_id: "m1".to_string(),
            outcome: ReplayItemOutcome::SkippedDuplicate,
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["message_id"], "m1");
        assert_eq!(value["outcome"], "skipped_duplicate");
    }
}
