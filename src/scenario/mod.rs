//! Caller personas
//!
//! A scenario is opaque configuration for the response generator: a system
//! prompt plus an optional opening line. Scenarios live in several pools that
//! share one id namespace and are searched in a fixed order.

mod catalog;
mod resolver;

use serde::{Deserialize, Serialize};

pub use catalog::ScenarioCatalog;
pub use resolver::{ScenarioLookup, ScenarioPool, ScenarioResolver};

/// One caller persona
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Persona and goal for the response generator
    pub system_prompt: String,
    /// Spoken as soon as the stream starts, before the counterpart says anything
    #[serde(default)]
    pub first_message: Option<String>,
    /// Synthesis voice override
    #[serde(default)]
    pub voice: Option<String>,
}

impl Scenario {
    pub fn new(id: impl Into<String>, name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            system_prompt: system_prompt.into(),
            first_message: None,
            voice: None,
        }
    }

    pub fn with_first_message(mut self, line: impl Into<String>) -> Self {
        self.first_message = Some(line.into());
        self
    }

    /// Opening line, if any and not blank
    pub fn opening_line(&self) -> Option<&str> {
        self.first_message
            .as_deref()
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }
}
