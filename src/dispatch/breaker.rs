//! Per-agent circuit breaker
//!
//! Failure-isolation state machine: `closed` counts failures, `open`
//! short-circuits calls until a cooldown elapses, `half_open` admits a
//! single probe. State is keyed by agent id and updated under a per-agent
//! lock so concurrent requests against the same degraded agent observe one
//! converging breaker rather than racing to the threshold independently.
//!
//! An admitted probe hands the caller a `ProbeGuard` that reopens the
//! breaker if the probe task is dropped before its outcome is recorded,
//! so an aborted probe (first-success win, request deadline) can never
//! leave the reservation stuck and wedge the agent.

use crate::config::BreakerSection;
use crate::signal::AgentId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Breaker state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Gate decision for one call attempt
#[derive(Debug)]
pub enum BreakerDecision {
    /// Call may proceed; `Some` guard marks the single half-open probe and
    /// must be held across the call
    Allow { probe: Option<ProbeGuard> },
    /// Breaker is open, short-circuit with `circuit_open`
    Reject,
}

#[derive(Debug)]
struct AgentBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    open_until: Instant,
    current_cooldown: Duration,
    probe_in_flight: bool,
    /// Bumped each time a probe is admitted; pairs a guard with its probe
    probe_epoch: u64,
    trips: u64,
}

impl AgentBreaker {
    fn new(cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            open_until: Instant::now(),
            current_cooldown: cooldown,
            probe_in_flight: false,
            probe_epoch: 0,
            trips: 0,
        }
    }

    fn admit_probe(&mut self) -> u64 {
        self.state = BreakerState::HalfOpen;
        self.probe_in_flight = true;
        self.probe_epoch += 1;
        self.probe_epoch
    }
}

/// Reservation for the single half-open probe
///
/// Dropped without the outcome being recorded (the probe task was aborted
/// mid-call), it reopens the breaker with the current cooldown so a fresh
/// probe is admitted once the cooldown elapses.
#[derive(Debug)]
pub struct ProbeGuard {
    breaker: Arc<Mutex<AgentBreaker>>,
    agent: AgentId,
    epoch: u64,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        let mut breaker = match self.breaker.lock() {
            Ok(breaker) => breaker,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A recorded outcome clears the flag; a newer probe bumps the epoch.
        // Either way this guard is stale and must not touch the state.
        if breaker.state == BreakerState::HalfOpen
            && breaker.probe_in_flight
            && breaker.probe_epoch == self.epoch
        {
            breaker.probe_in_flight = false;
            breaker.state = BreakerState::Open;
            breaker.open_until = Instant::now() + breaker.current_cooldown;
            warn!(agent = %self.agent, "probe aborted before completion, breaker reopened");
        }
    }
}

/// Lock-guarded breaker table keyed by agent id
///
/// Injected into the dispatch engine; never ambient global state.
pub struct BreakerRegistry {
    config: BreakerSection,
    agents: RwLock<HashMap<AgentId, Arc<Mutex<AgentBreaker>>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerSection) -> Self {
        Self {
            config,
            agents: RwLock::new(HashMap::new()),
        }
    }

    async fn breaker_for(&self, agent: &str) -> Arc<Mutex<AgentBreaker>> {
        if let Some(breaker) = self.agents.read().await.get(agent) {
            return breaker.clone();
        }
        let mut agents = self.agents.write().await;
        agents
            .entry(agent.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(AgentBreaker::new(Duration::from_millis(
                    self.config.cooldown_ms,
                ))))
            })
            .clone()
    }

    fn lock(breaker: &Arc<Mutex<AgentBreaker>>) -> std::sync::MutexGuard<'_, AgentBreaker> {
        match breaker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Gate a call attempt against the agent's breaker
    pub async fn acquire(&self, agent: &str) -> BreakerDecision {
        let handle = self.breaker_for(agent).await;
        let mut breaker = Self::lock(&handle);
        match breaker.state {
            BreakerState::Closed => BreakerDecision::Allow { probe: None },
            BreakerState::Open => {
                if Instant::now() >= breaker.open_until {
                    let epoch = breaker.admit_probe();
                    info!(agent, "breaker half-open, admitting probe");
                    drop(breaker);
                    BreakerDecision::Allow {
                        probe: Some(ProbeGuard {
                            breaker: handle,
                            agent: agent.to_string(),
                            epoch,
                        }),
                    }
                } else {
                    BreakerDecision::Reject
                }
            }
            BreakerState::HalfOpen => {
                // At most one probe in flight per agent
                if breaker.probe_in_flight {
                    BreakerDecision::Reject
                } else {
                    let epoch = breaker.admit_probe();
                    drop(breaker);
                    BreakerDecision::Allow {
                        probe: Some(ProbeGuard {
                            breaker: handle,
                            agent: agent.to_string(),
                            epoch,
                        }),
                    }
                }
            }
        }
    }

    /// Record a successful call; a successful probe fully closes the breaker
    pub async fn record_success(&self, agent: &str, probe: bool) {
        let handle = self.breaker_for(agent).await;
        let mut breaker = Self::lock(&handle);
        if probe || breaker.state == BreakerState::HalfOpen {
            info!(agent, "breaker closed after successful probe");
            breaker.state = BreakerState::Closed;
            breaker.probe_in_flight = false;
            breaker.current_cooldown = Duration::from_millis(self.config.cooldown_ms);
        }
        breaker.consecutive_failures = 0;
    }

    /// Record a failed call; opens the breaker at the configured threshold,
    /// and a failed probe reopens it with an extended cooldown
    pub async fn record_failure(&self, agent: &str, probe: bool) {
        let handle = self.breaker_for(agent).await;
        let mut breaker = Self::lock(&handle);
        if probe || breaker.state == BreakerState::HalfOpen {
            breaker.probe_in_flight = false;
            breaker.current_cooldown = Duration::from_millis(
                (breaker.current_cooldown.as_millis() as u64 * 2)
                    .min(self.config.max_cooldown_ms),
            );
            breaker.state = BreakerState::Open;
            breaker.open_until = Instant::now() + breaker.current_cooldown;
            warn!(agent, cooldown_ms = breaker.current_cooldown.as_millis() as u64,
                "probe failed, breaker reopened");
            return;
        }

        breaker.consecutive_failures += 1;
        if breaker.state == BreakerState::Closed
            && breaker.consecutive_failures >= self.config.failure_threshold
        {
            breaker.state = BreakerState::Open;
            breaker.open_until = Instant::now() + breaker.current_cooldown;
            breaker.trips += 1;
            crate::observability::metrics().record_breaker_trip(agent);
            warn!(agent, failures = breaker.consecutive_failures, "breaker opened");
        }
    }

    /// Current state of one agent's breaker
    pub async fn state_of(&self, agent: &str) -> BreakerState {
        let handle = self.breaker_for(agent).await;
        let state = Self::lock(&handle).state;
        state
    }

    #[cfg(test)]
    async fn failure_count(&self, agent: &str) -> u32 {
        let handle = self.breaker_for(agent).await;
        let count = Self::lock(&handle).consecutive_failures;
        count
    }

    /// Snapshot of all breaker states for health reporting
    pub async fn snapshot(&self) -> HashMap<AgentId, BreakerState> {
        let agents = self.agents.read().await;
        let mut out = HashMap::new();
        for (agent, breaker) in agents.iter() {
            out.insert(agent.clone(), Self::lock(breaker).state);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(cooldown_ms: u64) -> BreakerSection {
        BreakerSection {
            failure_threshold: 3,
            cooldown_ms,
            max_cooldown_ms: cooldown_ms * 8,
        }
    }

    async fn trip(registry: &BreakerRegistry, agent: &str) {
        for _ in 0..3 {
            registry.record_failure(agent, false).await;
        }
    }

    fn is_probe(decision: &BreakerDecision) -> bool {
        matches!(decision, BreakerDecision::Allow { probe: Some(_) })
    }

    #[tokio::test]
    async fn test_closed_allows_calls() {
        let registry = BreakerRegistry::new(test_config(1000));
        assert!(matches!(
            registry.acquire("Axis").await,
            BreakerDecision::Allow { probe: None }
        ));
    }

    #[tokio::test]
    async fn test_opens_at_threshold() {
        let registry = BreakerRegistry::new(test_config(60_000));
        trip(&registry, "Axis").await;
        assert_eq!(registry.state_of("Axis").await, BreakerState::Open);
        assert!(matches!(
            registry.acquire("Axis").await,
            BreakerDecision::Reject
        ));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let registry = BreakerRegistry::new(test_config(60_000));
        registry.record_failure("Axis", false).await;
        registry.record_failure("Axis", false).await;
        registry.record_success("Axis", false).await;
        assert_eq!(registry.failure_count("Axis").await, 0);
        registry.record_failure("Axis", false).await;
        registry.record_failure("Axis", false).await;
        assert_eq!(registry.state_of("Axis").await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_admits_single_probe() {
        let registry = BreakerRegistry::new(test_config(20));
        trip(&registry, "Axis").await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let first = registry.acquire("Axis").await;
        assert!(is_probe(&first));
        // Second attempt while the probe is in flight is rejected
        assert!(matches!(
            registry.acquire("Axis").await,
            BreakerDecision::Reject
        ));
        drop(first);
    }

    #[tokio::test]
    async fn test_probe_success_closes_breaker() {
        let registry = BreakerRegistry::new(test_config(20));
        trip(&registry, "Axis").await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        let decision = registry.acquire("Axis").await;
        assert!(is_probe(&decision));
        registry.record_success("Axis", true).await;
        drop(decision);
        assert_eq!(registry.state_of("Axis").await, BreakerState::Closed);
        assert!(matches!(
            registry.acquire("Axis").await,
            BreakerDecision::Allow { probe: None }
        ));
    }

    #[tokio::test]
    async fn test_probe_failure_reopens_with_longer_cooldown() {
        let registry = BreakerRegistry::new(test_config(20));
        trip(&registry, "Axis").await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        let decision = registry.acquire("Axis").await;
        assert!(is_probe(&decision));
        registry.record_failure("Axis", true).await;
        drop(decision);
        assert_eq!(registry.state_of("Axis").await, BreakerState::Open);

        // Cooldown doubled to 40ms; still open after the original 20ms
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(matches!(
            registry.acquire("Axis").await,
            BreakerDecision::Reject
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(is_probe(&registry.acquire("Axis").await));
    }

    #[tokio::test]
    async fn test_dropped_probe_guard_reopens_breaker() {
        let registry = BreakerRegistry::new(test_config(20));
        trip(&registry, "Axis").await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Probe admitted but never records an outcome (task aborted)
        let decision = registry.acquire("Axis").await;
        assert!(is_probe(&decision));
        drop(decision);

        // Reopened, not wedged: after the cooldown a fresh probe is admitted
        assert_eq!(registry.state_of("Axis").await, BreakerState::Open);
        assert!(matches!(
            registry.acquire("Axis").await,
            BreakerDecision::Reject
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(is_probe(&registry.acquire("Axis").await));
    }

    #[tokio::test]
    async fn test_stale_guard_does_not_disturb_later_probe() {
        let registry = BreakerRegistry::new(test_config(20));
        trip(&registry, "Axis").await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let first = registry.acquire("Axis").await;
        assert!(is_probe(&first));
        registry.record_failure("Axis", true).await;

        // Next probe admitted after the doubled cooldown; dropping the stale
        // guard afterwards must not clear the newer reservation
        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = registry.acquire("Axis").await;
        assert!(is_probe(&second));
        drop(first);
        assert!(matches!(
            registry.acquire("Axis").await,
            BreakerDecision::Reject
        ));
        drop(second);
    }

    #[tokio::test]
    async fn test_agents_are_isolated() {
        let registry = BreakerRegistry::new(test_config(60_000));
        trip(&registry, "M").await;
        assert!(matches!(
            registry.acquire("M").await,
            BreakerDecision::Reject
        ));
        assert!(matches!(
            registry.acquire("Axis").await,
            BreakerDecision::Allow { probe: None }
        ));
    }
}
