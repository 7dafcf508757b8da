//! Registration table of check definitions.

use std::collections::HashMap;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::CheckDefinition;

/// Check id to definition, populated once at startup.
///
/// Declaration order is preserved; the sequential strategy and every report
/// follow it.
#[derive(Debug, Clone, Default)]
pub struct CheckRegistry {
    checks: Vec<CheckDefinition>,
    index: HashMap<String, usize>,
}

impl CheckRegistry {
    /// Build a registry, rejecting duplicate ids.
    pub fn new(checks: Vec<CheckDefinition>) -> DomainResult<Self> {
        let mut index = HashMap::with_capacity(checks.len());
        for (i, check) in checks.iter().enumerate() {
            if index.insert(check.id.clone(), i).is_some() {
                return Err(DomainError::ValidationFailed(format!(
                    "duplicate check id '{}'",
                    check.id
                )));
            }
        }
        Ok(Self { checks, index })
    }

    pub fn get(&self, id: &str) -> DomainResult<&CheckDefinition> {
        self.index
            .get(id)
            .map(|&i| &self.checks[i])
            .ok_or_else(|| DomainError::CheckNotFound(id.to_string()))
    }

    pub fn all(&self) -> &[CheckDefinition] {
        &self.checks
    }

    /// Checks belonging to `stage`, in declaration order.
    pub fn for_stage(&self, stage: &str) -> Vec<CheckDefinition> {
        self.checks
            .iter()
            .filter(|c| c.runs_in_stage(stage))
            .cloned()
            .collect()
    }

    /// Every stage name mentioned by any check, sorted.
    pub fn stages(&self) -> Vec<String> {
        let mut stages: Vec<String> = self
            .checks
            .iter()
            .flat_map(|c| c.stages.iter().cloned())
            .collect();
        stages.sort();
        stages.dedup();
        stages
    }

    pub fn has_stage(&self, stage: &str) -> bool {
        self.checks.iter().any(|c| c.runs_in_stage(stage))
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(id: &str, stages: &[&str]) -> CheckDefinition {
        CheckDefinition::new(id, vec!["true".into()]).with_stages(stages)
    }

    #[test]
    fn test_stage_selection_keeps_order() {
        let registry = CheckRegistry::new(vec![
            check("b", &["fast"]),
            check("a", &["fast", "full"]),
            check("c", &["full"]),
        ])
        .unwrap();

        let fast: Vec<_> = registry.for_stage("fast").into_iter().map(|c| c.id).collect();
        assert_eq!(fast, vec!["b", "a"]);
        assert_eq!(registry.stages(), vec!["fast", "full"]);
        assert!(!registry.has_stage("nightly"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = CheckRegistry::new(vec![check("a", &["x"]), check("a", &["y"])]);
        assert!(matches!(result, Err(DomainError::ValidationFailed(_))));
    }

    #[test]
    fn test_lookup() {
        let registry = CheckRegistry::new(vec![check("a", &["x"])]).unwrap();
        assert_eq!(registry.get("a").unwrap().id, "a");
        assert!(matches!(registry.get("zz"), Err(DomainError::CheckNotFound(_))));
    }
}
