//! Knowledge Learner Service
//!
//! Asks the generator to research a piece of hardware, an instrument or a
//! venue type, and stores the answer in the knowledge library the
//! aggregator reads from.
//!
//! Each learn call follows the same sequence as setup generation: quota
//! pre-check, bounded generator call, tolerant JSON extraction, then the
//! upsert and the learning charge in one transaction. A call that times
//! out, fails, is cancelled or returns unreadable text stores nothing and
//! charges nothing.

use mixplan_common::config::EngineConfig;
use mixplan_common::models::{
    normalize_key, HardwareKnowledge, InstrumentProfile, QuotaKind, VenueProfile,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{SqliteConnection, SqlitePool};
use std::fmt::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::knowledge;
use crate::error::{EngineError, EngineResult};
use crate::services::generator::{call_bounded, GeneratorOutput, SetupGenerator};
use crate::services::quota_gate::QuotaGate;
use crate::services::response_normalizer::{text_field, ResponseNormalizer};

/// Hardware to research
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnHardwareRequest {
    /// microphone, speaker, amplifier, di_box, mixer
    pub hardware_type: String,
    pub brand: String,
    pub model: String,
    /// Known specifications, rendered into the prompt
    #[serde(default)]
    pub specs: Option<Value>,
    #[serde(default)]
    pub user_notes: Option<String>,
    /// Research again even when a library entry already exists
    #[serde(default)]
    pub relearn: bool,
}

/// Instrument or venue type to research
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnProfileRequest {
    pub name: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub user_notes: Option<String>,
}

fn default_category() -> String {
    "other".to_string()
}

/// Stored entry plus whether this call paid for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Learned<T> {
    pub entry: T,
    /// False when an existing library entry was returned without a generator call
    pub charged: bool,
}

const HARDWARE_SYSTEM: &str = r#"You are an expert live sound engineer building a knowledge base for live sound reinforcement.

You will be given a piece of hardware (microphone, speaker, amplifier, DI box or mixer). Return one JSON object with:
- characteristics: key sonic characteristics
- best_for: sources and situations it suits best
- settings_by_source: object keyed by source type (e.g. "male_vocal", "tabla"), each with recommended HPF, EQ bands, compression and FX
- knowledge_base_entry: a markdown section ready to paste into the knowledge base

For speakers describe EQ tendencies and HPF recommendations. For amplifiers also include watts_per_channel, channels, amplifier_class and features.
Describe EQ width in words (very wide, wide, medium, narrow, very narrow), never as Q numbers.
Keep it practical; prefer settings tested at real events over theory."#;

const INSTRUMENT_SYSTEM: &str = r#"You are a professional live sound engineer with long experience of devotional and community events.

Provide mixing knowledge for one instrument or performer type. Return one JSON object with:
- description: one or two sentences on the instrument and its sound
- mic_recommendations: {primary: {type, examples, placement, distance, notes}, alternative: {...}, di_notes}
- eq_settings: {hpf: {frequency, enabled, notes}, band1..band4: {frequency, gain, freq_range, purpose}, notes}
- compression_settings: {attack_ms, release_ms, threshold_db, ratio, gain_db, soft_knee, notes}
- fx_recommendations: {primary_fx, fx_engine, send_level_db, suggested_preset, monitor_reverb, monitor_send_db, notes}
- mixing_notes: three to five sentences on frequency range, common problems, interaction with other instruments and gain staging

Frequencies in Hz as numbers. EQ gain negative for cuts, positive for boosts. Settings are for a LIVE setting, not a studio."#;

const VENUE_SYSTEM: &str = r#"You are a professional live sound engineer with experience across many kinds of venue.

Describe the GENERAL acoustic character of one venue type, not a specific building. Return one JSON object with:
- description: two or three sentences on the acoustic character of this venue type
- acoustic_characteristics: {typical_rt60_range, typical_size, common_surfaces, natural_reverb_character, problem_frequencies, notes}
- sound_goals: {primary_goal, tonal_character, dynamics, spatial_feel, notes}
- acoustic_challenges: {primary_challenges, frequency_problems, feedback_risks, intelligibility_notes, notes}
- eq_strategy: {hpf_tendency, low_mid_approach, mid_approach, presence_approach, high_approach, notes}
- fx_approach: {reverb_strategy, recommended_reverb_type, reverb_amount, delay_notes, notes}
- compression_philosophy: {overall_approach, vocal_compression, instrument_compression, notes}
- monitoring_notes: two or three sentences on monitor mixes in this venue type
- special_considerations: ceremonies, noise limits, distributed audio and the like

Focus on what to be aware of and why, not exact dB values."#;

/// Generator-backed knowledge library builder
pub struct KnowledgeLearner {
    pool: SqlitePool,
    config: Arc<EngineConfig>,
    generator: Arc<dyn SetupGenerator>,
    quota: QuotaGate,
    normalizer: ResponseNormalizer,
}

impl KnowledgeLearner {
    pub fn new(
        pool: SqlitePool,
        config: Arc<EngineConfig>,
        generator: Arc<dyn SetupGenerator>,
    ) -> Self {
        let quota = QuotaGate::new(pool.clone(), config.plan_limits.clone());
        Self {
            pool,
            config,
            generator,
            quota,
            normalizer: ResponseNormalizer::new(),
        }
    }

    /// Research hardware into the knowledge library
    ///
    /// An entry that already carries a knowledge entry is returned as-is
    /// (uncharged) unless `relearn` is set.
    pub async fn learn_hardware(
        &self,
        account_id: Uuid,
        request: LearnHardwareRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<Learned<HardwareKnowledge>> {
        let hardware_type = required("Hardware type", &request.hardware_type)?;
        let brand = required("Brand", &request.brand)?;
        let model = required("Model", &request.model)?;

        let existing = knowledge::find_hardware(&self.pool, account_id, &brand, &model).await?;
        if let Some(entry) = existing.as_ref().filter(|e| e.knowledge_entry.is_some()) {
            if !request.relearn {
                info!(account_id = %account_id, brand = %brand, model = %model, "Hardware already learned");
                return Ok(Learned {
                    entry: entry.clone(),
                    charged: false,
                });
            }
        }

        self.quota.check_allowed(account_id, QuotaKind::Learning).await?;

        let user = hardware_prompt(&hardware_type, &brand, &model, &request);
        let object = self.ask("hardware", HARDWARE_SYSTEM, &user, cancel).await?;

        let entry = HardwareKnowledge {
            id: existing.as_ref().map_or_else(Uuid::new_v4, |e| e.id),
            account_id,
            hardware_type,
            brand,
            model,
            characteristics: optional_text(object.get("characteristics")),
            best_for: optional_text(object.get("best_for")),
            settings_by_source: hardware_settings(&object),
            knowledge_entry: optional_text(object.get("knowledge_base_entry")),
            user_notes: request.user_notes,
        };

        let mut tx = self.pool.begin().await?;
        knowledge::upsert_hardware(&mut *tx, &entry).await?;
        self.charge(&mut *tx, account_id, cancel).await?;
        tx.commit().await?;

        info!(account_id = %account_id, brand = %entry.brand, model = %entry.model, "Hardware learned");
        Ok(Learned { entry, charged: true })
    }

    /// Research an instrument profile; re-learning replaces the stored one
    pub async fn learn_instrument(
        &self,
        account_id: Uuid,
        request: LearnProfileRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<Learned<InstrumentProfile>> {
        let name = required("Instrument name", &request.name)?;
        self.quota.check_allowed(account_id, QuotaKind::Learning).await?;

        let user = profile_prompt(
            "Learn live sound settings for the instrument",
            &name,
            &request,
            &[
                "Which mics work best for it live, and where do they go?",
                "Which frequency problems are common and how are they fixed with EQ?",
                "What compression keeps it musical but controlled?",
                "Which reverb gives it space without muddying the mix?",
                "What does the performer need to hear in their monitor?",
            ],
        );
        let object = self.ask("instrument", INSTRUMENT_SYSTEM, &user, cancel).await?;

        let profile = InstrumentProfile {
            id: Uuid::new_v4(),
            account_id,
            value_key: normalize_key(&name),
            name,
            category: request.category,
            description: optional_text(object.get("description")),
            mic_recommendations: object_field(&object, "mic_recommendations"),
            eq_settings: object_field(&object, "eq_settings"),
            compression_settings: object_field(&object, "compression_settings"),
            fx_recommendations: object_field(&object, "fx_recommendations"),
            mixing_notes: optional_text(object.get("mixing_notes")),
            active: true,
        };

        let mut tx = self.pool.begin().await?;
        knowledge::upsert_instrument_profile(&mut *tx, &profile).await?;
        self.charge(&mut *tx, account_id, cancel).await?;
        tx.commit().await?;

        info!(account_id = %account_id, key = %profile.value_key, "Instrument profile learned");
        Ok(Learned {
            entry: profile,
            charged: true,
        })
    }

    /// Research a venue-type profile; re-learning replaces the stored one
    pub async fn learn_venue_type(
        &self,
        account_id: Uuid,
        request: LearnProfileRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<Learned<VenueProfile>> {
        let name = required("Venue type", &request.name)?;
        self.quota.check_allowed(account_id, QuotaKind::Learning).await?;

        let user = profile_prompt(
            "Learn the acoustic character of this venue type",
            &name,
            &request,
            &[
                "What are its typical acoustic properties?",
                "Which sound problems do engineers meet most often here?",
                "What EQ strategy gets good sound in this kind of space?",
                "Should reverb be added, or the room's own reverb relied on?",
                "Which compression approach suits it?",
                "What should monitor mixes account for?",
            ],
        );
        let object = self.ask("venue type", VENUE_SYSTEM, &user, cancel).await?;

        let profile = VenueProfile {
            id: Uuid::new_v4(),
            account_id,
            value_key: normalize_key(&name),
            name,
            category: request.category,
            description: optional_text(object.get("description")),
            acoustic_characteristics: venue_acoustics(&object),
            eq_strategy: object_field(&object, "eq_strategy"),
            fx_approach: object_field(&object, "fx_approach"),
            compression_philosophy: object_field(&object, "compression_philosophy"),
            monitoring_notes: optional_text(object.get("monitoring_notes")),
            special_considerations: optional_text(object.get("special_considerations")),
            active: true,
        };

        let mut tx = self.pool.begin().await?;
        knowledge::upsert_venue_profile(&mut *tx, &profile).await?;
        self.charge(&mut *tx, account_id, cancel).await?;
        tx.commit().await?;

        info!(account_id = %account_id, key = %profile.value_key, "Venue type learned");
        Ok(Learned {
            entry: profile,
            charged: true,
        })
    }

    /// Bounded generator call; the answer must contain a JSON object
    async fn ask(
        &self,
        subject: &'static str,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<Map<String, Value>> {
        let system = format!(
            "{}\n\n## Console in use\n{}\n\nReturn the JSON object in a ```json fenced block.",
            system,
            self.config.console_description.trim()
        );
        let GeneratorOutput { text, elapsed } = call_bounded(
            self.generator.as_ref(),
            &system,
            user,
            self.config.generator.timeout,
            cancel,
        )
        .await?;

        match self.normalizer.extract_object(&text) {
            Ok(object) => {
                info!(subject, elapsed_ms = elapsed.as_millis() as u64, "Learning response parsed");
                Ok(object)
            }
            Err(e) => {
                warn!(subject, error = %e, chars = text.len(), "Learning response unreadable");
                Err(EngineError::Generator {
                    message: format!("{} learning response unreadable: {}", subject, e),
                })
            }
        }
    }

    /// Charge one learning inside the caller's transaction
    ///
    /// Returning an error drops the transaction, rolling back the upsert.
    async fn charge(
        &self,
        conn: &mut SqliteConnection,
        account_id: Uuid,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        self.quota
            .record_usage_in(conn, account_id, QuotaKind::Learning)
            .await?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

fn required(field: &str, value: &str) -> EngineResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

fn optional_text(value: Option<&Value>) -> Option<String> {
    Some(text_field(value)).filter(|s| !s.trim().is_empty())
}

fn object_field(object: &Map<String, Value>, key: &str) -> Option<Value> {
    object.get(key).filter(|v| !v.is_null()).cloned()
}

/// Per-source settings, with amplifier ratings folded in when present
fn hardware_settings(object: &Map<String, Value>) -> Option<Value> {
    let mut settings = object_field(object, "settings_by_source");
    let ratings: Map<String, Value> = ["watts_per_channel", "channels", "amplifier_class", "features"]
        .iter()
        .filter_map(|key| object_field(object, key).map(|v| (key.to_string(), v)))
        .collect();
    if ratings.is_empty() {
        return settings;
    }
    match settings.get_or_insert_with(|| Value::Object(Map::new())) {
        Value::Object(map) => {
            map.insert("amplifier".to_string(), Value::Object(ratings));
        }
        _ => warn!("settings_by_source is not an object; amplifier ratings dropped"),
    }
    settings
}

/// Acoustic characteristics, with sound goals and challenges folded in
fn venue_acoustics(object: &Map<String, Value>) -> Option<Value> {
    let mut acoustics = match object_field(object, "acoustic_characteristics") {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert("summary".to_string(), other);
            map
        }
        None => Map::new(),
    };
    for key in ["sound_goals", "acoustic_challenges"] {
        if let Some(value) = object_field(object, key) {
            acoustics.insert(key.to_string(), value);
        }
    }
    (!acoustics.is_empty()).then_some(Value::Object(acoustics))
}

fn hardware_prompt(
    hardware_type: &str,
    brand: &str,
    model: &str,
    request: &LearnHardwareRequest,
) -> String {
    let mut out = String::from("# New Hardware for the Knowledge Base\n\n");
    let _ = writeln!(out, "## Hardware Type\n{}\n", hardware_type);
    let _ = writeln!(out, "## Brand & Model\n**{} {}**\n", brand, model);
    if let Some(Value::Object(specs)) = &request.specs {
        out.push_str("## Specifications\n");
        for (key, value) in specs {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = writeln!(out, "- **{}**: {}", key, rendered);
        }
        out.push('\n');
    }
    if let Some(notes) = request.user_notes.as_deref().filter(|n| !n.trim().is_empty()) {
        let _ = writeln!(out, "## User Notes\n{}\n", notes.trim());
    }
    out.push_str(
        "## Instructions\nGenerate recommended settings for this hardware in live sound \
         reinforcement and a markdown knowledge base entry. Return the JSON object described \
         in the system prompt.\n",
    );
    out
}

fn profile_prompt(
    heading: &str,
    name: &str,
    request: &LearnProfileRequest,
    questions: &[&str],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}: **{}**\n", heading, name);
    let _ = writeln!(out, "Category: {}\n", request.category);
    if let Some(notes) = request.user_notes.as_deref().filter(|n| !n.trim().is_empty()) {
        let _ = writeln!(out, "Additional context: {}\n", notes.trim());
    }
    out.push_str("Consider:\n");
    for (i, question) in questions.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, question);
    }
    out.push_str("\nReturn the JSON object with all fields.\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_amplifier_ratings_folded_into_settings() {
        let learned = object(json!({
            "settings_by_source": {"subwoofer": {"hpf": "35 Hz"}},
            "watts_per_channel": "500W x2 @ 4Ω",
            "channels": "2"
        }));
        let settings = hardware_settings(&learned).unwrap();
        assert_eq!(settings["subwoofer"]["hpf"], "35 Hz");
        assert_eq!(settings["amplifier"]["channels"], "2");
        assert!(settings["amplifier"].get("features").is_none());

        let mic = object(json!({"settings_by_source": {"vocal": {}}}));
        assert_eq!(hardware_settings(&mic), Some(json!({"vocal": {}})));
        assert_eq!(hardware_settings(&object(json!({}))), None);
    }

    #[test]
    fn test_venue_acoustics_keeps_goals_and_challenges() {
        let learned = object(json!({
            "acoustic_characteristics": {"natural_reverb_character": "Long"},
            "sound_goals": {"primary_goal": "Speech clarity"},
            "acoustic_challenges": null
        }));
        let acoustics = venue_acoustics(&learned).unwrap();
        assert_eq!(acoustics["natural_reverb_character"], "Long");
        assert_eq!(acoustics["sound_goals"]["primary_goal"], "Speech clarity");
        assert!(acoustics.get("acoustic_challenges").is_none());

        let prose = object(json!({"acoustic_characteristics": "Very live room"}));
        assert_eq!(venue_acoustics(&prose), Some(json!({"summary": "Very live room"})));
        assert_eq!(venue_acoustics(&object(json!({}))), None);
    }

    #[test]
    fn test_text_fields_accept_lists() {
        assert_eq!(
            optional_text(Some(&json!(["Lead vocals", "Speech"]))).as_deref(),
            Some("Lead vocals\nSpeech")
        );
        assert_eq!(optional_text(Some(&json!("  "))), None);
        assert_eq!(optional_text(None), None);
    }

    #[test]
    fn test_hardware_prompt_renders_specs_and_notes() {
        let request = LearnHardwareRequest {
            hardware_type: "microphone".to_string(),
            brand: "Shure".to_string(),
            model: "Beta 58A".to_string(),
            specs: Some(json!({"pattern": "supercardioid", "impedance_ohms": 150})),
            user_notes: Some("Used for lead kirtan vocals".to_string()),
            relearn: false,
        };
        let prompt = hardware_prompt("microphone", "Shure", "Beta 58A", &request);
        assert!(prompt.contains("**Shure Beta 58A**"));
        assert!(prompt.contains("- **pattern**: supercardioid"));
        assert!(prompt.contains("- **impedance_ohms**: 150"));
        assert!(prompt.contains("Used for lead kirtan vocals"));
    }

    #[test]
    fn test_required_trims() {
        assert_eq!(required("Brand", "  Shure ").unwrap(), "Shure");
        assert!(matches!(required("Brand", "   "), Err(EngineError::Validation(_))));
    }
}
