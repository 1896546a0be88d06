//! Venues

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A venue owned by one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    /// Venue type key (church, hall, outdoor, ...) matched against venue profiles
    pub venue_type: Option<String>,
    pub notes: Option<String>,
    /// FOH speakers, monitors, etc.
    pub speaker_setup: Option<Value>,
    /// Graphic EQ cuts on the main LR output
    pub lr_geq_cuts: Option<Value>,
    /// Graphic EQ cuts on monitor outputs
    pub monitor_geq_cuts: Option<Value>,
    pub room_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Location {
    pub fn new(account_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            name: name.into(),
            venue_type: None,
            notes: None,
            speaker_setup: None,
            lr_geq_cuts: None,
            monitor_geq_cuts: None,
            room_notes: None,
            created_at: Utc::now(),
        }
    }
}
