use anyhow::{anyhow, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::Scenario;

/// A source of scenarios searched by id
pub trait ScenarioLookup: Send + Sync {
    fn lookup(&self, id: &str) -> Option<Scenario>;

    /// Pool name for logging
    fn name(&self) -> &str;

    /// Every id this source can resolve
    fn ids(&self) -> Vec<String>;
}

/// A named, in-memory set of scenarios
#[derive(Debug, Clone, Default)]
pub struct ScenarioPool {
    name: String,
    scenarios: HashMap<String, Scenario>,
}

impl ScenarioPool {
    pub fn new(name: impl Into<String>, scenarios: Vec<Scenario>) -> Self {
        let name = name.into();
        let mut by_id = HashMap::with_capacity(scenarios.len());
        for scenario in scenarios {
            if by_id.contains_key(&scenario.id) {
                warn!("Duplicate scenario id {} in pool {}; keeping the first", scenario.id, name);
                continue;
            }
            by_id.insert(scenario.id.clone(), scenario);
        }
        Self {
            name,
            scenarios: by_id,
        }
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

impl ScenarioLookup for ScenarioPool {
    fn lookup(&self, id: &str) -> Option<Scenario> {
        self.scenarios.get(id).cloned()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.scenarios.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Ordered chain of scenario sources
///
/// The first source that knows an id wins; later sources are only consulted
/// on a miss.
#[derive(Default)]
pub struct ScenarioResolver {
    chain: Vec<Box<dyn ScenarioLookup>>,
}

impl ScenarioResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source to the end of the chain
    pub fn then(mut self, source: impl ScenarioLookup + 'static) -> Self {
        self.chain.push(Box::new(source));
        self
    }

    /// Resolve an id against the chain
    pub fn resolve(&self, id: &str) -> Result<Scenario> {
        for source in &self.chain {
            if let Some(scenario) = source.lookup(id) {
                debug!("Resolved scenario {} from {} pool", id, source.name());
                return Ok(scenario);
            }
        }
        Err(anyhow!("Scenario not found: {}", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.chain.iter().any(|source| source.lookup(id).is_some())
    }

    /// Ids visible through the chain, in chain order, without shadowed duplicates
    pub fn ids(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for source in &self.chain {
            for id in source.ids() {
                if !seen.contains(&id) {
                    seen.push(id);
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(name: &str, entries: &[(&str, &str)]) -> ScenarioPool {
        ScenarioPool::new(
            name,
            entries
                .iter()
                .map(|(id, prompt)| Scenario::new(*id, *id, *prompt))
                .collect(),
        )
    }

    #[test]
    fn test_falls_back_through_pools_in_order() -> Result<()> {
        let resolver = ScenarioResolver::new()
            .then(pool("general", &[("1", "general one")]))
            .then(pool("registered", &[("1", "registered one"), ("12", "registered twelve")]))
            .then(pool("adversarial", &[("18", "adversarial")]));

        assert_eq!(resolver.resolve("1")?.system_prompt, "general one");
        assert_eq!(resolver.resolve("12")?.system_prompt, "registered twelve");
        assert_eq!(resolver.resolve("18")?.system_prompt, "adversarial");
        assert!(resolver.resolve("99").is_err());
        assert!(!resolver.contains("99"));
        Ok(())
    }

    #[test]
    fn test_ids_hide_shadowed_entries() {
        let resolver = ScenarioResolver::new()
            .then(pool("general", &[("1", "a"), ("2", "b")]))
            .then(pool("registered", &[("2", "c"), ("3", "d")]));

        assert_eq!(resolver.ids(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_pool_keeps_first_duplicate() {
        let pool = pool("general", &[("1", "first"), ("1", "second")]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.lookup("1").map(|s| s.system_prompt), Some("first".to_string()));
    }
}
