//! Generic acoustic profiles per instrument and per venue type

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::normalize_key;

/// Learned live-sound guidance for one instrument or performer type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentProfile {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    /// Lineup key, e.g. "dhol", "female_vocal"
    pub value_key: String,
    /// vocals, speech, percussion, wind, strings, keys, other
    pub category: String,
    pub description: Option<String>,
    pub mic_recommendations: Option<Value>,
    pub eq_settings: Option<Value>,
    pub compression_settings: Option<Value>,
    pub fx_recommendations: Option<Value>,
    pub mixing_notes: Option<String>,
    pub active: bool,
}

impl InstrumentProfile {
    pub fn key(&self) -> String {
        normalize_key(&self.value_key)
    }
}

/// Learned acoustic character of a venue type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueProfile {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    /// Venue type key, e.g. "church", "gurdwara"
    pub value_key: String,
    /// worship, performance, commercial, education, outdoor, other
    pub category: String,
    pub description: Option<String>,
    pub acoustic_characteristics: Option<Value>,
    pub eq_strategy: Option<Value>,
    pub fx_approach: Option<Value>,
    pub compression_philosophy: Option<Value>,
    pub monitoring_notes: Option<String>,
    pub special_considerations: Option<String>,
    pub active: bool,
}

impl VenueProfile {
    pub fn key(&self) -> String {
        normalize_key(&self.value_key)
    }
}
