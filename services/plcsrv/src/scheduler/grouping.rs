//! Variable validation and sampling-group planning

use std::collections::{BTreeMap, BTreeSet};

use crate::error::StartError;
use crate::types::{SamplingGroup, VariableSet};

/// Result of planning a run: one group per armed interval plus the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPlan {
    /// Groups ordered by ascending interval
    pub groups: Vec<SamplingGroup>,
    /// Every distinct address, sorted
    pub addresses: Vec<String>,
}

impl PollPlan {
    pub fn intervals(&self) -> BTreeSet<u64> {
        self.groups.iter().map(|g| g.interval_ms).collect()
    }
}

/// Reject empty sets, blank addresses and non-positive intervals
pub fn validate(variables: &VariableSet) -> Result<(), StartError> {
    if variables.is_empty() {
        return Err(StartError::EmptyVariableSet);
    }

    for (name, spec) in variables {
        if spec.address.trim().is_empty() {
            return Err(StartError::InvalidVariable {
                name: name.clone(),
                reason: "address must not be empty".to_string(),
            });
        }
        if spec.sampling_interval_ms <= 0 {
            return Err(StartError::InvalidVariable {
                name: name.clone(),
                reason: format!(
                    "sampling interval must be positive, got {}",
                    spec.sampling_interval_ms
                ),
            });
        }
    }
    Ok(())
}

/// Validate and partition addresses by interval
///
/// An address requested at several intervals is polled at the smallest one.
/// Intervals left without addresses get no group.
pub fn plan(variables: &VariableSet) -> Result<PollPlan, StartError> {
    validate(variables)?;

    let mut fastest: BTreeMap<String, u64> = BTreeMap::new();
    for spec in variables.values() {
        let interval = spec.sampling_interval_ms as u64;
        fastest
            .entry(spec.address.trim().to_string())
            .and_modify(|current| *current = (*current).min(interval))
            .or_insert(interval);
    }

    let mut by_interval: BTreeMap<u64, BTreeSet<String>> = BTreeMap::new();
    for (address, interval) in &fastest {
        by_interval
            .entry(*interval)
            .or_default()
            .insert(address.clone());
    }

    Ok(PollPlan {
        groups: by_interval
            .into_iter()
            .map(|(interval_ms, addresses)| SamplingGroup {
                interval_ms,
                addresses,
            })
            .collect(),
        addresses: fastest.into_keys().collect(),
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::test_utils::variables;

    #[test]
    fn test_one_group_per_distinct_interval() {
        let vars = variables(&[
            ("a", "DB1,REAL0", 500),
            ("b", "DB1,REAL4", 500),
            ("c", "DB1,REAL8", 1000),
            ("d", "DB1,REAL12", 1000),
            ("e", "DB1,REAL16", 5000),
        ]);
        let plan = plan(&vars).unwrap();
        assert_eq!(plan.groups.len(), 3);
        assert_eq!(plan.intervals(), [500, 1000, 5000].into_iter().collect());
        assert_eq!(plan.addresses.len(), 5);
    }

    #[test]
    fn test_duplicate_addresses_registered_once() {
        let vars = variables(&[
            ("speed", "DB1,REAL0", 500),
            ("speed_copy", "DB1,REAL0", 500),
            ("flag", "DB1,X6.0", 500),
        ]);
        let plan = plan(&vars).unwrap();
        assert_eq!(plan.addresses, vec!["DB1,REAL0", "DB1,X6.0"]);
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].addresses.len(), 2);
    }

    #[test]
    fn test_address_at_two_intervals_uses_fastest() {
        let vars = variables(&[
            ("fast", "DB1,REAL0", 200),
            ("slow", "DB1,REAL0", 1000),
            ("other", "DB2,INT4", 1000),
        ]);
        let plan = plan(&vars).unwrap();
        assert_eq!(plan.groups.len(), 2);
        assert!(plan.groups[0].addresses.contains("DB1,REAL0"));
        assert!(!plan.groups[1].addresses.contains("DB1,REAL0"));
    }

    #[test]
    fn test_emptied_interval_is_not_armed() {
        let vars = variables(&[("fast", "DB1,REAL0", 200), ("slow", "DB1,REAL0", 1000)]);
        let plan = plan(&vars).unwrap();
        assert_eq!(plan.intervals(), [200].into_iter().collect());
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            plan(&VariableSet::new()),
            Err(StartError::EmptyVariableSet)
        ));

        let blank = variables(&[("ok", "DB1,REAL0", 500), ("blank", "  ", 500)]);
        assert!(matches!(
            plan(&blank),
            Err(StartError::InvalidVariable { ref name, .. }) if name == "blank"
        ));

        let zero = variables(&[("zero", "DB1,REAL0", 0)]);
        assert!(matches!(
            plan(&zero),
            Err(StartError::InvalidVariable { ref name, .. }) if name == "zero"
        ));

        let negative = variables(&[("neg", "DB1,REAL0", -100)]);
        assert!(plan(&negative).is_err());
    }
}
