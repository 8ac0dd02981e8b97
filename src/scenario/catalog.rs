use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use super::{Scenario, ScenarioPool, ScenarioResolver};

/// Scenario file contents: one list per pool
///
/// ```toml
/// [[general]]
/// id = "scheduling"
/// name = "simple_scheduling"
/// system_prompt = "..."
/// first_message = "Hi, I'd like to schedule an appointment please."
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioCatalog {
    #[serde(default)]
    pub general: Vec<Scenario>,
    #[serde(default)]
    pub registered: Vec<Scenario>,
    #[serde(default)]
    pub adversarial: Vec<Scenario>,
}

impl ScenarioCatalog {
    /// Load a catalog from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let catalog: ScenarioCatalog = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .with_context(|| format!("Failed to read scenario catalog: {:?}", path))?
            .try_deserialize()
            .with_context(|| format!("Invalid scenario catalog: {:?}", path))?;

        catalog.validate()?;
        info!(
            "Loaded scenarios from {:?} (general={}, registered={}, adversarial={})",
            path,
            catalog.general.len(),
            catalog.registered.len(),
            catalog.adversarial.len()
        );
        Ok(catalog)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for scenario in self.all() {
            if scenario.id.trim().is_empty() {
                bail!("Scenario {:?} has an empty id", scenario.name);
            }
            if scenario.system_prompt.trim().is_empty() {
                bail!("Scenario {} has an empty system prompt", scenario.id);
            }
            if !seen.insert(scenario.id.as_str()) {
                bail!("Scenario id {} is defined more than once", scenario.id);
            }
        }
        Ok(())
    }

    fn all(&self) -> impl Iterator<Item = &Scenario> {
        self.general
            .iter()
            .chain(&self.registered)
            .chain(&self.adversarial)
    }

    /// Resolver searching general, then registered, then adversarial
    pub fn into_resolver(self) -> ScenarioResolver {
        ScenarioResolver::new()
            .then(ScenarioPool::new("general", self.general))
            .then(ScenarioPool::new("registered", self.registered))
            .then(ScenarioPool::new("adversarial", self.adversarial))
    }
}
