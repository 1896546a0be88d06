//! Lineup rows

use serde::{Deserialize, Serialize};

use super::normalize_key;
use crate::{Error, Result};

/// How a performer's signal reaches the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    Microphone,
    DirectInput,
    Line,
    Wireless,
}

fn default_count() -> u32 {
    1
}

/// One row of a requested lineup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformerRequirement {
    /// Performer type, e.g. "vocal", "tabla", "flute"
    #[serde(rename = "type")]
    pub performer_type: String,

    #[serde(default = "default_count")]
    pub count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_source: Option<InputSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Console channels this row occupies, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel_refs: Vec<u32>,
}

impl PerformerRequirement {
    pub fn new(performer_type: impl Into<String>, count: u32) -> Self {
        Self {
            performer_type: performer_type.into(),
            count,
            input_source: None,
            notes: None,
            channel_refs: Vec::new(),
        }
    }

    /// Type key used for lineup comparison
    pub fn type_key(&self) -> String {
        normalize_key(&self.performer_type)
    }

    pub fn validate(&self) -> Result<()> {
        if self.type_key().is_empty() {
            return Err(Error::InvalidInput("Performer type must not be empty".to_string()));
        }
        if self.count == 0 {
            return Err(Error::InvalidInput(format!(
                "Performer '{}' must have a count of at least 1",
                self.performer_type
            )));
        }
        Ok(())
    }
}

/// Validate a whole lineup (non-empty, every row valid)
pub fn validate_lineup(lineup: &[PerformerRequirement]) -> Result<()> {
    if lineup.is_empty() {
        return Err(Error::InvalidInput("Lineup must contain at least one performer".to_string()));
    }
    lineup.iter().try_for_each(PerformerRequirement::validate)
}
