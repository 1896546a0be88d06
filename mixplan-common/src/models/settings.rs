//! Typed mixer settings records
//!
//! Channel assignments, EQ, compression and FX settings are each stored as a
//! `SettingsRecord<T>`: a schema-versioned map from channel key to a typed
//! per-channel entry. Known per-channel fields are named; anything else the
//! generator emits is preserved in the entry's `extra` map. Entries that are
//! not objects, or fail to decode, are kept verbatim in `unparsed` so no
//! information is lost.
//!
//! # Schema versions
//! - 0: unversioned map `{ "<channel>": { ... } }` as emitted by the generator
//! - 1: `{ "schema_version": 1, "channels": { ... }, "unparsed": { ... } }`
//!
//! Version 0 is migrated to the current version on read.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Current settings record schema version
pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

/// Key under which a non-object top-level payload is preserved
const ROOT_KEY: &str = "_root";

/// Schema-versioned per-channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsRecord<T> {
    pub schema_version: u32,
    #[serde(default)]
    pub channels: BTreeMap<String, T>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unparsed: BTreeMap<String, Value>,
}

impl<T> Default for SettingsRecord<T> {
    fn default() -> Self {
        Self {
            schema_version: SETTINGS_SCHEMA_VERSION,
            channels: BTreeMap::new(),
            unparsed: BTreeMap::new(),
        }
    }
}

impl<T> SettingsRecord<T> {
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.unparsed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len() + self.unparsed.len()
    }
}

impl<T> SettingsRecord<T>
where
    T: DeserializeOwned,
{
    /// Decode a record from stored JSON or raw generator output
    ///
    /// Never fails: absent or null input yields an empty record, and anything
    /// that cannot be typed is moved to `unparsed`.
    pub fn from_value(value: Option<&Value>) -> Self {
        let mut record = Self::default();
        match value {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) if map.contains_key("schema_version") => {
                let version = map.get("schema_version").and_then(Value::as_u64).unwrap_or(0);
                if version > u64::from(SETTINGS_SCHEMA_VERSION) {
                    warn!(
                        version,
                        supported = SETTINGS_SCHEMA_VERSION,
                        "Settings record written by a newer schema; reading known fields only"
                    );
                }
                if let Some(Value::Object(channels)) = map.get("channels") {
                    record.absorb(channels);
                }
                if let Some(Value::Object(unparsed)) = map.get("unparsed") {
                    record
                        .unparsed
                        .extend(unparsed.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            Some(Value::Object(map)) => record.absorb(map),
            Some(other) => {
                debug!("Settings payload is not an object; preserving it unparsed");
                record.unparsed.insert(ROOT_KEY.to_string(), other.clone());
            }
        }
        record
    }

    fn absorb(&mut self, entries: &Map<String, Value>) {
        for (channel, raw) in entries {
            if !raw.is_object() {
                self.unparsed.insert(channel.clone(), raw.clone());
                continue;
            }
            match serde_json::from_value::<T>(raw.clone()) {
                Ok(entry) => {
                    self.channels.insert(channel.clone(), entry);
                }
                Err(e) => {
                    debug!(channel = %channel, error = %e, "Settings entry kept unparsed");
                    self.unparsed.insert(channel.clone(), raw.clone());
                }
            }
        }
    }
}

impl<T> SettingsRecord<T>
where
    T: Serialize,
{
    /// Encode for storage (always the current schema version)
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Instrument and mic on one console channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelAssignment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// High-pass filter plus four parametric bands
///
/// Band values are kept as the generator expressed them (a frequency/gain/width
/// object or a short description).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelEq {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hpf: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band1: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band2: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band3: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band4: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelCompression {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub makeup_gain: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_knee: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// FX engine assignment and send level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelFx {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_level: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

pub type ChannelConfig = SettingsRecord<ChannelAssignment>;
pub type EqSettings = SettingsRecord<ChannelEq>;
pub type CompressionSettings = SettingsRecord<ChannelCompression>;
pub type FxSettings = SettingsRecord<ChannelFx>;
