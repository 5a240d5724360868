//! Deterministic routing table
//!
//! Pure O(1) lookup from a classification kind to its ordered set of
//! downstream agents and the aggregation mode used for the fan-out.
//! `Kind::Unknown` resolves to the empty set, which the pipeline routes to
//! the DLQ by policy. Rebuilding the table from reloaded configuration
//! requires no code change.

use crate::config::{AggregationMode, RoutingSection};
use crate::signal::{AgentId, Kind};
use std::collections::HashMap;

/// Kind-to-agents table with per-kind aggregation modes
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<Kind, Vec<AgentId>>,
    aggregation: HashMap<Kind, AggregationMode>,
}

impl RoutingTable {
    /// Build the table from configuration
    pub fn from_config(config: &RoutingSection) -> Self {
        let routes = HashMap::from([
            (Kind::Assist, config.assist.clone()),
            (Kind::Policy, config.policy.clone()),
            (Kind::Emergency, config.emergency.clone()),
            (Kind::Unknown, Vec::new()),
        ]);

        let mut aggregation = HashMap::new();
        for (kind_name, mode) in &config.aggregation {
            let kind = match kind_name.as_str() {
                "assist" => Kind::Assist,
                "policy" => Kind::Policy,
                "emergency" => Kind::Emergency,
                _ => continue,
            };
            aggregation.insert(kind, *mode);
        }

        Self { routes, aggregation }
    }

    /// Ordered agent set for a kind; empty for `Unknown`
    pub fn agents_for(&self, kind: Kind) -> &[AgentId] {
        self.routes.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Aggregation mode for a kind
    ///
    /// Emergency defaults to aggregate-all so both channels are confirmed
    /// notified; everything else defaults to first-success.
    pub fn mode_for(&self, kind: Kind) -> AggregationMode {
        self.aggregation.get(&kind).copied().unwrap_or(match kind {
            Kind::Emergency => AggregationMode::AggregateAll,
            _ => AggregationMode::FirstSuccess,
        })
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::from_config(&RoutingSection::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routes() {
        let table = RoutingTable::default();
        assert_eq!(table.agents_for(Kind::Assist), ["Axis"]);
        assert_eq!(table.agents_for(Kind::Policy), ["M"]);
        assert_eq!(table.agents_for(Kind::Emergency), ["M", "Axis"]);
        assert!(table.agents_for(Kind::Unknown).is_empty());
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let table = RoutingTable::default();
        let first = table.agents_for(Kind::Emergency).to_vec();
        for _ in 0..10 {
            assert_eq!(table.agents_for(Kind::Emergency), first.as_slice());
        }
    }

    #[test]
    fn test_default_aggregation_modes() {
        let table = RoutingTable::default();
        assert_eq!(table.mode_for(Kind::Emergency), AggregationMode::AggregateAll);
        assert_eq!(table.mode_for(Kind::Assist), AggregationMode::FirstSuccess);
        assert_eq!(table.mode_for(Kind::Policy), AggregationMode::FirstSuccess);
    }

    #[test]
    fn test_emergency_mode_falls_back_to_aggregate_all() {
        // A config that names only one kind still yields safe modes for the rest
        let section = RoutingSection {
            aggregation: HashMap::from([(
                "assist".to_string(),
                AggregationMode::AggregateAll,
            )]),
            ..RoutingSection::default()
        };
        let table = RoutingTable::from_config(&section);
        assert_eq!(table.mode_for(Kind::Assist), AggregationMode::AggregateAll);
        assert_eq!(table.mode_for(Kind::Emergency), AggregationMode::AggregateAll);
    }

    #[test]
    fn test_config_overrides_routes() {
        let section = RoutingSection {
            assist: vec!["Axis".to_string(), "M".to_string()],
            ..RoutingSection::default()
        };
        let table = RoutingTable::from_config(&section);
        assert_eq!(table.agents_for(Kind::Assist), ["Axis", "M"]);
    }
}
