//! Configuration for the routing pipeline
//!
//! TOML-backed configuration with serde defaults for every operational
//! knob: classifier keyword sets, the kind-to-agents routing table, agent
//! endpoints, dispatch concurrency and timeouts, circuit breaker and retry
//! tuning, and the automatic DLQ replay loop.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Top-level configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RouterConfig {
    #[serde(default)]
    pub classifier: ClassifierSection,
    #[serde(default)]
    pub routing: RoutingSection,
    #[serde(default)]
    pub agents: AgentsSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub breaker: BreakerSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub replay: ReplaySection,
    #[serde(default)]
    pub health: HealthSection,
}

/// Keyword sets evaluated in fixed priority order: emergency, policy, assist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSection {
    #[serde(default = "default_emergency_keywords")]
    pub emergency: Vec<String>,
    #[serde(default = "default_policy_keywords")]
    pub policy: Vec<String>,
    #[serde(default = "default_assist_keywords")]
    pub assist: Vec<String>,
}

fn default_emergency_keywords() -> Vec<String> {
    ["urgent", "911", "crisis", "panic", "immediately"]
        .map(String::from)
        .to_vec()
}

fn default_policy_keywords() -> Vec<String> {
    ["policy", "compliance", "consent", "hipaa", "gdpr"]
        .map(String::from)
        .to_vec()
}

fn default_assist_keywords() -> Vec<String> {
    ["help", "assist", "question", "explain", "clarify"]
        .map(String::from)
        .to_vec()
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            emergency: default_emergency_keywords(),
            policy: default_policy_keywords(),
            assist: default_assist_keywords(),
        }
    }
}

/// Kind-to-agents table plus the per-kind aggregation mode
///
/// Agent order is significant: in first-success mode it is the dispatch
/// order, and it is preserved verbatim in `routed_agents` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingSection {
    #[serde(default = "default_assist_agents")]
    pub assist: Vec<String>,
    #[serde(default = "default_policy_agents")]
    pub policy: Vec<String>,
    #[serde(default = "default_emergency_agents")]
    pub emergency: Vec<String>,
    /// Aggregation mode per kind; emergency defaults to aggregate-all so
    /// both channels are confirmed notified
    #[serde(default = "default_aggregation")]
    pub aggregation: HashMap<String, AggregationMode>,
}

fn default_assist_agents() -> Vec<String> {
    vec!["Axis".to_string()]
}

fn default_policy_agents() -> Vec<String> {
    vec!["M".to_string()]
}

fn default_emergency_agents() -> Vec<String> {
    vec!["M".to_string(), "Axis".to_string()]
}

fn default_aggregation() -> HashMap<String, AggregationMode> {
    HashMap::from([
        ("assist".to_string(), AggregationMode::FirstSuccess),
        ("policy".to_string(), AggregationMode::FirstSuccess),
        ("emergency".to_string(), AggregationMode::AggregateAll),
    ])
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            assist: default_assist_agents(),
            policy: default_policy_agents(),
            emergency: default_emergency_agents(),
            aggregation: default_aggregation(),
        }
    }
}

/// Fan-out aggregation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Return on the first successful agent, cancel the rest
    FirstSuccess,
    /// Wait for every agent, merge responses, succeed if at least one did
    AggregateAll,
}

/// Downstream agent HTTP endpoints keyed by agent id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentsSection {
    #[serde(default = "default_endpoints")]
    pub endpoints: HashMap<String, String>,
}

fn default_endpoints() -> HashMap<String, String> {
    HashMap::from([
        ("Axis".to_string(), "http://localhost:8001/route".to_string()),
        ("M".to_string(), "http://localhost:8001/process".to_string()),
    ])
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
        }
    }
}

/// Fan-out concurrency and deadlines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSection {
    /// Process-wide cap on simultaneous in-flight agent calls
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Per-agent-call deadline, includes retries
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Overall fan-out deadline for one request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_max_in_flight() -> usize {
    5
}

fn default_call_timeout_ms() -> u64 {
    2000
}

fn default_request_timeout_ms() -> u64 {
    3000
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            call_timeout_ms: default_call_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Per-agent circuit breaker tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSection {
    /// Consecutive failures that open the breaker; the count resets on any
    /// successful call
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Cooldown before a half-open probe is allowed
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Cap for the cooldown doubling applied on failed probes
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_max_cooldown_ms() -> u64 {
    240_000
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            max_cooldown_ms: default_max_cooldown_ms(),
        }
    }
}

/// Retry budget and backoff tuning for transient agent failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    1000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Interval-triggered automatic DLQ replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySection {
    #[serde(default = "default_replay_auto")]
    pub auto: bool,
    #[serde(default = "default_replay_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_replay_batch_size")]
    pub batch_size: usize,
}

fn default_replay_auto() -> bool {
    true
}

fn default_replay_interval_secs() -> u64 {
    600
}

fn default_replay_batch_size() -> usize {
    50
}

impl Default for ReplaySection {
    fn default() -> Self {
        Self {
            auto: default_replay_auto(),
            interval_secs: default_replay_interval_secs(),
            batch_size: default_replay_batch_size(),
        }
    }
}

/// Health and metrics endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSection {
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_health_port() -> u16 {
    8080
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            port: default_health_port(),
        }
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl RouterConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let config: RouterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (agent, endpoint) in &self.agents.endpoints {
            Url::parse(endpoint).map_err(|e| {
                ConfigError::Validation(format!(
                    "endpoint for agent '{agent}' is not a valid URL: {e}"
                ))
            })?;
        }

        let routed = self
            .routing
            .assist
            .iter()
            .chain(&self.routing.policy)
            .chain(&self.routing.emergency);
        for agent in routed {
            if !self.agents.endpoints.contains_key(agent) {
                return Err(ConfigError::Validation(format!(
                    "routed agent '{agent}' has no endpoint configured"
                )));
            }
        }

        if self.dispatch.max_in_flight == 0 {
            return Err(ConfigError::Validation(
                "dispatch.max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Validation(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        if self.replay.auto && self.replay.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "replay.interval_secs must be at least 1 when replay.auto is enabled".to_string(),
            ));
        }

        Ok(())
    }
}
