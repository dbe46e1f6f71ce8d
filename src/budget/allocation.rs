//! Algorithms for distributing a total budget across identifiers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Weight used for identifiers absent from the weight map.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// How a total budget is split across concurrent consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStrategy {
    /// Even split
    #[default]
    Equal,
    /// Split proportional to per-identifier weights
    Dynamic,
}

impl fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "equal"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}

impl FromStr for AllocationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "equal" => Ok(Self::Equal),
            "dynamic" => Ok(Self::Dynamic),
            other => Err(format!(
                "Invalid allocation strategy '{}'. Must be 'equal' or 'dynamic'.",
                other
            )),
        }
    }
}

/// Split `total` across `identifiers`.
///
/// # Postconditions
/// - the returned values sum to `total` for any non-empty identifier set
/// - under `Dynamic`, each share is proportional to its weight; negative
///   weights count as zero and an all-zero weight set falls back to `Equal`
pub fn allocate_budget(
    total: f64,
    identifiers: &[String],
    strategy: AllocationStrategy,
    weights: &HashMap<String, f64>,
) -> HashMap<String, f64> {
    if identifiers.is_empty() {
        return HashMap::new();
    }

    // Duplicate identifiers share one allocation.
    let mut unique: Vec<&String> = Vec::with_capacity(identifiers.len());
    for id in identifiers {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }

    let equal = || {
        let share = total / unique.len() as f64;
        unique
            .iter()
            .map(|id| ((*id).clone(), share))
            .collect::<HashMap<_, _>>()
    };

    match strategy {
        AllocationStrategy::Equal => equal(),
        AllocationStrategy::Dynamic => {
            let resolved: Vec<(&String, f64)> = unique
                .iter()
                .map(|id| {
                    let weight = weights.get(*id).copied().unwrap_or(DEFAULT_WEIGHT);
                    (*id, if weight.is_finite() { weight.max(0.0) } else { 0.0 })
                })
                .collect();

            let weight_sum: f64 = resolved.iter().map(|(_, w)| w).sum();
            if weight_sum <= 0.0 {
                tracing::warn!("All allocation weights are zero, falling back to equal split");
                return equal();
            }

            resolved
                .into_iter()
                .map(|(id, weight)| (id.clone(), total * weight / weight_sum))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_equal_split_sums_to_total() {
        for n in 1..=7 {
            let names: Vec<String> = (0..n).map(|i| format!("playlist-{i}")).collect();
            let alloc = allocate_budget(10.0, &names, AllocationStrategy::Equal, &HashMap::new());
            let sum: f64 = alloc.values().sum();
            assert!((sum - 10.0).abs() < 1e-9);
            assert!(alloc.values().all(|v| (v - 10.0 / n as f64).abs() < 1e-12));
        }
    }

    #[test]
    fn test_empty_identifiers() {
        let alloc = allocate_budget(10.0, &[], AllocationStrategy::Dynamic, &HashMap::new());
        assert!(alloc.is_empty());
    }

    #[test]
    fn test_dynamic_split_is_proportional() {
        let weights = HashMap::from([("morning".to_string(), 3.0), ("night".to_string(), 0.5)]);
        let alloc = allocate_budget(
            9.0,
            &ids(&["morning", "drive", "night"]),
            AllocationStrategy::Dynamic,
            &weights,
        );
        // drive defaults to 1.0; weights 3 : 1 : 0.5
        assert!((alloc["morning"] - 6.0).abs() < 1e-9);
        assert!((alloc["drive"] - 2.0).abs() < 1e-9);
        assert!((alloc["night"] - 1.0).abs() < 1e-9);
        assert!((alloc.values().sum::<f64>() - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_dynamic_zero_weights_fall_back_to_equal() {
        let weights = HashMap::from([("a".to_string(), 0.0), ("b".to_string(), -2.0)]);
        let alloc = allocate_budget(4.0, &ids(&["a", "b"]), AllocationStrategy::Dynamic, &weights);
        assert!((alloc["a"] - 2.0).abs() < 1e-12);
        assert!((alloc["b"] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_duplicates_collapse() {
        let alloc = allocate_budget(
            6.0,
            &ids(&["a", "a", "b"]),
            AllocationStrategy::Equal,
            &HashMap::new(),
        );
        assert_eq!(alloc.len(), 2);
        assert!((alloc["a"] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("EQUAL".parse::<AllocationStrategy>(), Ok(AllocationStrategy::Equal));
        assert_eq!(" dynamic ".parse::<AllocationStrategy>(), Ok(AllocationStrategy::Dynamic));
        assert!("weighted".parse::<AllocationStrategy>().is_err());
    }
}
