//! Sigroute - deterministic signal routing
//!
//! A routing pipeline that turns inbound signals into agent dispatches:
//! canonical message identity, keyword classification, a deterministic
//! routing table, bounded-concurrency fan-out with circuit breaking and
//! retry, and a dead letter queue with safe replay.
//!
//! # Overview
//!
//! This crate provides the complete routing pipeline, including:
//! - Canonical message-ID derivation over volatile-field-stripped payloads
//! - Priority keyword classification into signal kinds
//! - Per-agent circuit breakers and deadline-aware retry
//! - First-success and aggregate-all fan-out aggregation
//! - DLQ lifecycle with duplicate-safe replay
//!
//! # Quick Start
//!
//! ```rust
//! use sigroute::classify::Classifier;
//! use sigroute::config::ClassifierSection;
//! use sigroute::signal::{Kind, Signal};
//! use serde_json::json;
//!
//! let classifier = Classifier::from_config(&ClassifierSection::default());
//!
//! let signal = Signal::new("user-1", json!({"message": "please help me with this"}));
//! assert_eq!(classifier.classify(&signal), Kind::Assist);
//!
//! let signal = Signal::new("user-2", json!({"message": "URGENT: this is a crisis"}));
//! assert_eq!(classifier.classify(&signal), Kind::Emergency);
//! ```

pub mod agents;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod dlq;
pub mod error;
pub mod health;
pub mod identity;
pub mod observability;
pub mod pipeline;
pub mod routing;
pub mod signal;
pub mod store;
pub mod testing;

// Re-export the main pipeline surface
pub use config::RouterConfig;
pub use error::{FailureReason, RouterError, RouterResult};
pub use pipeline::SignalRouter;
pub use signal::{Kind, RouteOutcome, RouteStatus, Signal};
pub use store::{LogStore, MemoryStore};
