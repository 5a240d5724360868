//! Error types for the signal routing pipeline
//!
//! `RouterError` covers internal fault propagation; `FailureReason` is the
//! closed reason taxonomy that gets persisted into log records and DLQ
//! entries and reported to callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for routing operations
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("Dispatch failed: {reason}")]
    DispatchFailed { reason: FailureReason },

    #[error("Store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Agent call failed: {message}")]
    AgentCallFailed { message: String },

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl RouterError {
    /// Create an invalid payload error
    pub fn invalid_payload<S: Into<String>>(message: S) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    /// Create a store unavailable error
    pub fn store_unavailable<S: Into<String>>(message: S) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Create an agent call error
    pub fn agent_call_failed<S: Into<String>>(message: S) -> Self {
        Self::AgentCallFailed {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Map this error to the reason code recorded in the store
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            RouterError::InvalidPayload { .. } => FailureReason::InvalidPayload,
            RouterError::DispatchFailed { reason } => *reason,
            RouterError::StoreUnavailable { .. } => FailureReason::StoreUnavailable,
            RouterError::AgentCallFailed { .. } => FailureReason::AgentFailure,
            RouterError::ConfigError(_)
            | RouterError::SerializationError(_)
            | RouterError::InternalError { .. } => FailureReason::AgentFailure,
        }
    }
}

/// Closed taxonomy of failure reasons persisted with records and DLQ entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Unserializable or malformed input; never retried by dispatch
    InvalidPayload,
    /// No classification rule matched; replay-only recovery
    ClassificationUnknown,
    /// Agent call exceeded its deadline
    AgentTimeout,
    /// Agent returned an error response or the connection failed
    AgentFailure,
    /// Breaker short-circuited the call, no network attempt was made
    CircuitOpen,
    /// Every routed agent failed
    AllAgentsFailed,
    /// Durable store rejected the operation
    StoreUnavailable,
}

impl FailureReason {
    /// Transient reasons are eligible for in-request retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureReason::AgentTimeout | FailureReason::AgentFailure
        )
    }

    /// Stable string form used in metrics labels and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InvalidPayload => "invalid_payload",
            FailureReason::ClassificationUnknown => "classification_unknown",
            FailureReason::AgentTimeout => "agent_timeout",
            FailureReason::AgentFailure => "agent_failure",
            FailureReason::CircuitOpen => "circuit_open",
            FailureReason::AllAgentsFailed => "all_agents_failed",
            FailureReason::StoreUnavailable => "store_unavailable",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for routing operations
pub type RouterResult<T> = Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_payload_constructor() {
        let error = RouterError::invalid_payload("not an object");
        assert!(matches!(error, RouterError::InvalidPayload { .. }));
        assert_eq!(error.to_string(), "Invalid payload: not an object");
        assert_eq!(error.failure_reason(), FailureReason::InvalidPayload);
    }

    #[test]
    fn test_dispatch_failure_keeps_reason() {
        let error = RouterError::DispatchFailed {
            reason: FailureReason::AllAgentsFailed,
        };
        assert_eq!(error.failure_reason(), FailureReason::AllAgentsFailed);
    }

    #[test]
    fn test_store_unavailable_maps_to_reason() {
        let error = RouterError::store_unavailable("connection refused");
        assert_eq!(error.failure_reason(), FailureReason::StoreUnavailable);
    }

    #[test]
    fn test_transient_reasons() {
        assert!(FailureReason::AgentTimeout.is_transient());
        assert!(FailureReason::AgentFailure.is_transient());
        assert!(!FailureReason::CircuitOpen.is_transient());
        assert!(!FailureReason::InvalidPayload.is_transient());
        assert!(!FailureReason::ClassificationUnknown.is_transient());
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&FailureReason::AllAgentsFailed).unwrap();
        assert_eq!(json, "\"all_agents_failed\"");
        let back: FailureReason = serde_json::from_str("\"circuit_open\"").unwrap();
        assert_eq!(back, FailureReason::CircuitOpen);
    }

    #[test]
    fn test_display_matches_serde_form() {
        assert_eq!(FailureReason::AgentTimeout.to_string(), "agent_timeout");
        assert_eq!(
            FailureReason::ClassificationUnknown.to_string(),
            "classification_unknown"
        );
    }
}
