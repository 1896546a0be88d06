//! Historical setups and post-event corrections

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::performer::PerformerRequirement;
use super::settings::{ChannelConfig, CompressionSettings, EqSettings, FxSettings};
use crate::{Error, Result};

/// Outcome of turning generator text into structured settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
    Structured,
    Degraded,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::Structured => "structured",
            ParseStatus::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a setup record came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "lowercase")]
pub enum SetupOrigin {
    /// Produced by the generator
    Generated { parse_status: ParseStatus },
    /// Technical settings cloned verbatim from an earlier setup
    Reused { source_id: Uuid },
    /// Technical settings regenerated for an earlier setup's event
    Refreshed { source_id: Uuid, parse_status: ParseStatus },
}

impl SetupOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupOrigin::Generated { .. } => "generated",
            SetupOrigin::Reused { .. } => "reused",
            SetupOrigin::Refreshed { .. } => "refreshed",
        }
    }

    pub fn source_id(&self) -> Option<Uuid> {
        match self {
            SetupOrigin::Generated { .. } => None,
            SetupOrigin::Reused { source_id } | SetupOrigin::Refreshed { source_id, .. } => {
                Some(*source_id)
            }
        }
    }

    pub fn parse_status(&self) -> Option<ParseStatus> {
        match self {
            SetupOrigin::Generated { parse_status } | SetupOrigin::Refreshed { parse_status, .. } => {
                Some(*parse_status)
            }
            SetupOrigin::Reused { .. } => None,
        }
    }

    /// Rebuild from stored columns
    pub fn from_parts(
        origin: &str,
        source_id: Option<Uuid>,
        parse_status: Option<&str>,
    ) -> Result<Self> {
        let status = match parse_status {
            Some("degraded") => ParseStatus::Degraded,
            _ => ParseStatus::Structured,
        };
        match (origin, source_id) {
            ("generated", _) => Ok(SetupOrigin::Generated { parse_status: status }),
            ("reused", Some(source_id)) => Ok(SetupOrigin::Reused { source_id }),
            ("refreshed", Some(source_id)) => Ok(SetupOrigin::Refreshed {
                source_id,
                parse_status: status,
            }),
            (other, _) => Err(Error::InvalidInput(format!(
                "Unknown or incomplete setup origin: {}",
                other
            ))),
        }
    }
}

/// Human-entered adjustment to one channel, discovered during a live event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq_changes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_changes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fx_changes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain_change: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CorrectionEntry {
    pub fn is_empty(&self) -> bool {
        self.eq_changes.is_none()
            && self.compression_changes.is_none()
            && self.fx_changes.is_none()
            && self.gain_change.is_none()
            && self.notes.is_none()
    }
}

/// Validate a 1-5 rating
pub fn validate_rating(rating: i64) -> Result<u8> {
    if (1..=5).contains(&rating) {
        Ok(rating as u8)
    } else {
        Err(Error::InvalidInput(format!(
            "Rating must be between 1 and 5 (got {})",
            rating
        )))
    }
}

/// A configuration recorded for one event at one venue
///
/// Technical fields never change after creation; only rating, notes and
/// corrections are updated by the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSetup {
    pub id: Uuid,
    pub account_id: Uuid,
    pub location_id: Uuid,
    pub event_name: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub performers: Vec<PerformerRequirement>,
    pub rating: Option<u8>,
    pub notes: Option<String>,
    pub channel_config: ChannelConfig,
    pub eq_settings: EqSettings,
    pub compression_settings: CompressionSettings,
    pub fx_settings: FxSettings,
    pub instructions: Option<String>,
    pub troubleshooting_tips: Option<String>,
    /// Keyed by channel id
    pub corrections: BTreeMap<String, CorrectionEntry>,
    pub origin: SetupOrigin,
    pub created_at: DateTime<Utc>,
}

impl HistoricalSetup {
    /// Rated 4 or 5
    pub fn is_successful(&self) -> bool {
        matches!(self.rating, Some(r) if r >= 4)
    }

    /// Rated below 4
    pub fn needs_improvement(&self) -> bool {
        matches!(self.rating, Some(r) if r < 4)
    }

    /// Merge corrections per channel; a setup must be rated first
    pub fn apply_corrections(
        &mut self,
        corrections: BTreeMap<String, CorrectionEntry>,
    ) -> Result<()> {
        if self.rating.is_none() {
            return Err(Error::InvalidInput(
                "Corrections can only be logged on a rated setup".to_string(),
            ));
        }
        for (channel, entry) in corrections {
            if entry.is_empty() && entry.instrument.is_none() {
                self.corrections.remove(&channel);
            } else {
                self.corrections.insert(channel, entry);
            }
        }
        Ok(())
    }

    /// Display label for prompts and logs
    pub fn label(&self) -> String {
        match (&self.event_name, self.event_date) {
            (Some(name), Some(date)) => format!("{} ({})", name, date),
            (Some(name), None) => name.clone(),
            (None, Some(date)) => format!("Event on {}", date),
            (None, None) => format!("Setup {}", self.id),
        }
    }
}
