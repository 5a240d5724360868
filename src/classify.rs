//! Keyword classifier
//!
//! Pure, total mapping from a signal to its `Kind`. Rules are evaluated in
//! fixed priority order with first match winning: emergency before policy
//! before assist, so an emergency keyword is never masked by a coincidental
//! assist or policy match in the same message. Runs inline on the
//! latency-critical path and must never suspend or fail.

use crate::config::ClassifierSection;
use crate::signal::{Kind, Signal};
use serde_json::Value;

/// Ordered keyword rules compiled from configuration
#[derive(Debug, Clone)]
pub struct Classifier {
    /// (kind, lowercase keywords) in evaluation order
    rules: Vec<(Kind, Vec<String>)>,
}

impl Classifier {
    /// Build the classifier from configured keyword sets
    pub fn from_config(config: &ClassifierSection) -> Self {
        let lower = |keywords: &[String]| -> Vec<String> {
            keywords.iter().map(|k| k.to_lowercase()).collect()
        };
        Self {
            rules: vec![
                (Kind::Emergency, lower(&config.emergency)),
                (Kind::Policy, lower(&config.policy)),
                (Kind::Assist, lower(&config.assist)),
            ],
        }
    }

    /// Classify a signal by case-insensitive keyword matching over the
    /// text-bearing fields of its payload
    pub fn classify(&self, signal: &Signal) -> Kind {
        let mut text = String::new();
        collect_text(&signal.payload, &mut text);
        let text = text.to_lowercase();

        for (kind, keywords) in &self.rules {
            if keywords.iter().any(|k| text.contains(k.as_str())) {
                return *kind;
            }
        }
        Kind::Unknown
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::from_config(&ClassifierSection::default())
    }
}

/// Gather every string value in the payload, space-separated
fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push(' ');
        }
        Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_text(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(payload: Value) -> Kind {
        Classifier::default().classify(&Signal::new("u1", payload))
    }

    #[test]
    fn test_emergency_keywords() {
        assert_eq!(classify(json!({"message": "URGENT crisis"})), Kind::Emergency);
        assert_eq!(classify(json!({"message": "call 911 now"})), Kind::Emergency);
    }

    #[test]
    fn test_policy_keywords() {
        assert_eq!(classify(json!({"message": "gdpr consent form"})), Kind::Policy);
    }

    #[test]
    fn test_assist_keywords() {
        assert_eq!(classify(json!({"message": "please help me"})), Kind::Assist);
    }

    #[test]
    fn test_no_match_is_unknown() {
        assert_eq!(classify(json!({"message": "random text"})), Kind::Unknown);
    }

    #[test]
    fn test_emergency_wins_over_assist() {
        // Priority order must hold even when lower-priority keywords match
        assert_eq!(
            classify(json!({"message": "urgent: please help me"})),
            Kind::Emergency
        );
    }

    #[test]
    fn test_policy_wins_over_assist() {
        assert_eq!(
            classify(json!({"message": "help with compliance"})),
            Kind::Policy
        );
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        assert_eq!(classify(json!({"message": "PANIC"})), Kind::Emergency);
        assert_eq!(classify(json!({"message": "HiPaA audit"})), Kind::Policy);
    }

    #[test]
    fn test_nested_text_fields_are_searched() {
        assert_eq!(
            classify(json!({"context": {"notes": ["all good", "urgent follow-up"]}})),
            Kind::Emergency
        );
    }

    #[test]
    fn test_non_text_payload_is_unknown() {
        assert_eq!(classify(json!({"count": 42, "flag": true})), Kind::Unknown);
    }

    #[test]
    fn test_keywords_in_keys_do_not_match() {
        // Only string values are text-bearing
        assert_eq!(classify(json!({"urgent": 1})), Kind::Unknown);
    }

    #[test]
    fn test_custom_rules_from_config() {
        let section = ClassifierSection {
            emergency: vec!["Mayday".to_string()],
            policy: vec![],
            assist: vec!["ayuda".to_string()],
        };
        let classifier = Classifier::from_config(&section);
        let signal = Signal::new("u1", json!({"message": "mayday mayday"}));
        assert_eq!(classifier.classify(&signal), Kind::Emergency);
        let signal = Signal::new("u1", json!({"message": "necesito AYUDA"}));
        assert_eq!(classifier.classify(&signal), Kind::Assist);
    }
}
