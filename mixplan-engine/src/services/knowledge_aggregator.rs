//! Knowledge Aggregator Service
//!
//! Fuses owned gear, the hardware knowledge library, instrument and venue
//! profiles, and corrections logged at this venue into one ordered
//! [`KnowledgeContext`]. Pure transformation over collections the caller has
//! already fetched.
//!
//! # Precedence
//! - Owned gear beats the library entry for the same hardware model; the
//!   library entry is attached to the gear item instead of listed on its own.
//! - Rated corrections logged at this venue beat generic instrument and
//!   venue-type profiles.
//!
//! Malformed input (negative availability, corrections on an unrated setup,
//! history from another venue) never fails aggregation: it is logged and
//! recorded in [`KnowledgeContext::anomalies`].

use chrono::{DateTime, Utc};
use mixplan_common::models::{
    normalize_key, CorrectionEntry, GearItem, HardwareKnowledge, HistoricalSetup, InstrumentProfile,
    Location, PerformerRequirement, VenueProfile,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::warn;
use uuid::Uuid;

use super::match_scorer::history_order;

/// Owned gear with availability and any matching library knowledge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GearKnowledge {
    pub gear_id: Uuid,
    pub kind: String,
    pub display_name: String,
    pub hardware_key: Option<String>,
    pub quantity_owned: i64,
    pub quantity_on_loan: i64,
    /// Owned minus unreturned loans, never negative
    pub quantity_available: i64,
    pub specs: Option<Value>,
    /// Settings tuned for this specific unit
    pub owned_settings: Option<Value>,
    pub notes: Option<String>,
    /// Library entry for the same model, if any
    pub library: Option<HardwareKnowledge>,
}

impl GearKnowledge {
    /// Owned settings when present, else the library's per-source settings
    pub fn effective_settings(&self) -> Option<&Value> {
        self.owned_settings
            .as_ref()
            .or_else(|| self.library.as_ref().and_then(|l| l.settings_by_source.as_ref()))
    }
}

/// A correction logged on a rated setup at this venue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionNote {
    pub setup_id: Uuid,
    pub setup_label: String,
    pub rating: u8,
    pub channel: String,
    pub entry: CorrectionEntry,
    pub logged_for: DateTime<Utc>,
}

/// Where an instrument's effective guidance comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidanceSource {
    /// Rated corrections logged at this venue
    LocationCorrections,
    /// Generic instrument profile
    Profile,
    /// Nothing known about this instrument
    None,
}

/// Guidance for one requested performer type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentGuidance {
    /// Normalized performer type
    pub performer_type: String,
    /// Type as the requester wrote it (first occurrence)
    pub display_name: String,
    /// Total count across lineup rows
    pub count: u64,
    /// Highest-authority first: best rating, then most recent
    pub location_corrections: Vec<CorrectionNote>,
    pub profile: Option<InstrumentProfile>,
}

impl InstrumentGuidance {
    pub fn source(&self) -> GuidanceSource {
        if !self.location_corrections.is_empty() {
            GuidanceSource::LocationCorrections
        } else if self.profile.is_some() {
            GuidanceSource::Profile
        } else {
            GuidanceSource::None
        }
    }
}

/// Input problem found while aggregating
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// More units on loan than owned; availability clamped to 0
    OverLoaned {
        gear_id: Uuid,
        owned: i64,
        on_loan: i64,
    },
    /// Corrections found on a setup without a rating; ignored
    UnratedCorrections { setup_id: Uuid },
    /// History row recorded at a different venue; ignored
    ForeignHistory { setup_id: Uuid, location_id: Uuid },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::OverLoaned { gear_id, owned, on_loan } => write!(
                f,
                "gear {} has {} on loan but only {} owned",
                gear_id, on_loan, owned
            ),
            Anomaly::UnratedCorrections { setup_id } => {
                write!(f, "setup {} carries corrections but has no rating", setup_id)
            }
            Anomaly::ForeignHistory { setup_id, location_id } => write!(
                f,
                "setup {} belongs to location {}",
                setup_id, location_id
            ),
        }
    }
}

/// Everything the generator is told about this venue and lineup
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KnowledgeContext {
    pub gear: Vec<GearKnowledge>,
    /// Library entries for hardware the account does not own
    pub knowledge_library: Vec<HardwareKnowledge>,
    /// One entry per distinct requested type, in lineup order
    pub instrument_profiles: Vec<InstrumentGuidance>,
    /// Venue-wide corrections (no instrument); outrank `venue_profile`
    pub venue_corrections: Vec<CorrectionNote>,
    pub venue_profile: Option<VenueProfile>,
    /// Rated setups at this venue, rating desc then newest first
    pub history: Vec<HistoricalSetup>,
    pub anomalies: Vec<Anomaly>,
}

impl KnowledgeContext {
    /// History rated 4 or 5
    pub fn successful(&self) -> impl Iterator<Item = &HistoricalSetup> {
        self.history.iter().filter(|s| s.is_successful())
    }

    /// History rated below 4
    pub fn needs_improvement(&self) -> impl Iterator<Item = &HistoricalSetup> {
        self.history.iter().filter(|s| s.needs_improvement())
    }

    pub fn guidance_for(&self, performer_type: &str) -> Option<&InstrumentGuidance> {
        let key = normalize_key(performer_type);
        self.instrument_profiles
            .iter()
            .find(|g| g.performer_type == key)
    }
}

/// Borrowed aggregation inputs
#[derive(Debug, Clone, Copy)]
pub struct AggregationInput<'a> {
    pub location: &'a Location,
    pub performers: &'a [PerformerRequirement],
    pub gear: &'a [GearItem],
    pub knowledge_library: &'a [HardwareKnowledge],
    pub instrument_profiles: &'a [InstrumentProfile],
    pub venue_profiles: &'a [VenueProfile],
    pub history: &'a [HistoricalSetup],
}

/// Knowledge aggregator
#[derive(Debug, Clone, Copy, Default)]
pub struct KnowledgeAggregator;

impl KnowledgeAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn aggregate(&self, input: AggregationInput<'_>) -> KnowledgeContext {
        let mut context = KnowledgeContext::default();

        self.merge_gear(&input, &mut context);
        context.history = self.select_history(&input, &mut context.anomalies);

        let notes = collect_corrections(&context.history);
        let (venue_wide, per_instrument): (Vec<_>, Vec<_>) = notes
            .into_iter()
            .partition(|(key, _)| key.is_none());
        context.venue_corrections = venue_wide.into_iter().map(|(_, note)| note).collect();

        context.instrument_profiles = self.instrument_guidance(&input, &per_instrument);

        context.venue_profile = input
            .location
            .venue_type
            .as_deref()
            .map(normalize_key)
            .filter(|key| !key.is_empty())
            .and_then(|key| {
                input
                    .venue_profiles
                    .iter()
                    .find(|p| p.active && p.key() == key)
                    .cloned()
            });

        tracing::debug!(
            location_id = %input.location.id,
            gear = context.gear.len(),
            library = context.knowledge_library.len(),
            history = context.history.len(),
            anomalies = context.anomalies.len(),
            "Knowledge aggregated"
        );

        context
    }

    fn merge_gear(&self, input: &AggregationInput<'_>, context: &mut KnowledgeContext) {
        let library_by_key: HashMap<String, &HardwareKnowledge> = input
            .knowledge_library
            .iter()
            .filter_map(|entry| entry.hardware_key().map(|key| (key, entry)))
            .collect();

        let mut owned_keys = HashSet::new();
        for item in input.gear {
            let key = item.hardware_key();
            let on_loan = item.quantity_on_loan();
            let raw_available = item.quantity - on_loan;
            if raw_available < 0 {
                warn!(
                    gear_id = %item.id,
                    owned = item.quantity,
                    on_loan,
                    "More units on loan than owned; availability clamped to 0"
                );
                context.anomalies.push(Anomaly::OverLoaned {
                    gear_id: item.id,
                    owned: item.quantity,
                    on_loan,
                });
            }

            let library = key
                .as_ref()
                .and_then(|k| library_by_key.get(k))
                .map(|entry| (*entry).clone());
            if let Some(k) = &key {
                owned_keys.insert(k.clone());
            }

            context.gear.push(GearKnowledge {
                gear_id: item.id,
                kind: item.kind.clone(),
                display_name: item.display_name(),
                hardware_key: key,
                quantity_owned: item.quantity,
                quantity_on_loan: on_loan,
                quantity_available: raw_available.max(0),
                specs: item.specs.clone(),
                owned_settings: item.default_settings.clone(),
                notes: item.notes.clone(),
                library,
            });
        }

        context.knowledge_library = input
            .knowledge_library
            .iter()
            .filter(|entry| {
                entry
                    .hardware_key()
                    .map_or(true, |key| !owned_keys.contains(&key))
            })
            .cloned()
            .collect();
    }

    fn select_history(
        &self,
        input: &AggregationInput<'_>,
        anomalies: &mut Vec<Anomaly>,
    ) -> Vec<HistoricalSetup> {
        let mut history = Vec::new();
        for setup in input.history {
            if setup.location_id != input.location.id {
                warn!(
                    setup_id = %setup.id,
                    location_id = %setup.location_id,
                    expected = %input.location.id,
                    "History row from another location skipped"
                );
                anomalies.push(Anomaly::ForeignHistory {
                    setup_id: setup.id,
                    location_id: setup.location_id,
                });
                continue;
            }
            if setup.rating.is_none() {
                if !setup.corrections.is_empty() {
                    warn!(setup_id = %setup.id, "Corrections on unrated setup ignored");
                    anomalies.push(Anomaly::UnratedCorrections { setup_id: setup.id });
                }
                continue;
            }
            history.push(setup.clone());
        }
        history.sort_by(history_order);
        history
    }

    fn instrument_guidance(
        &self,
        input: &AggregationInput<'_>,
        corrections: &[(Option<String>, CorrectionNote)],
    ) -> Vec<InstrumentGuidance> {
        let mut guidance: Vec<InstrumentGuidance> = Vec::new();
        for row in input.performers {
            let key = row.type_key();
            if key.is_empty() || row.count == 0 {
                continue;
            }
            if let Some(existing) = guidance.iter_mut().find(|g| g.performer_type == key) {
                existing.count += u64::from(row.count);
                continue;
            }

            let location_corrections = corrections
                .iter()
                .filter(|(instrument, _)| {
                    instrument
                        .as_deref()
                        .is_some_and(|i| instrument_matches(i, &key))
                })
                .map(|(_, note)| note.clone())
                .collect();
            let profile = input
                .instrument_profiles
                .iter()
                .find(|p| p.active && p.key() == key)
                .cloned();

            guidance.push(InstrumentGuidance {
                display_name: row.performer_type.trim().to_string(),
                performer_type: key,
                count: u64::from(row.count),
                location_corrections,
                profile,
            });
        }
        guidance
    }
}

/// Corrections from rated history in history order, keyed by normalized
/// instrument (`None` for venue-wide entries)
fn collect_corrections(history: &[HistoricalSetup]) -> Vec<(Option<String>, CorrectionNote)> {
    let mut notes = Vec::new();
    for setup in history {
        let Some(rating) = setup.rating else { continue };
        for (channel, entry) in &setup.corrections {
            let instrument = entry
                .instrument
                .as_deref()
                .map(normalize_key)
                .filter(|k| !k.is_empty());
            notes.push((
                instrument,
                CorrectionNote {
                    setup_id: setup.id,
                    setup_label: setup.label(),
                    rating,
                    channel: channel.clone(),
                    entry: entry.clone(),
                    logged_for: setup.created_at,
                },
            ));
        }
    }
    notes
}

/// "lead_vocal" matches "vocal"; "vocal" matches "vocal"
fn instrument_matches(correction_key: &str, performer_key: &str) -> bool {
    correction_key == performer_key || correction_key.split('_').any(|part| part == performer_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mixplan_common::models::{GearLoan, ParseStatus, SetupOrigin};
    use serde_json::json;
    use std::collections::BTreeMap;

    struct Fixture {
        location: Location,
        performers: Vec<PerformerRequirement>,
        gear: Vec<GearItem>,
        library: Vec<HardwareKnowledge>,
        instruments: Vec<InstrumentProfile>,
        venues: Vec<VenueProfile>,
        history: Vec<HistoricalSetup>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut location = Location::new(Uuid::new_v4(), "Gurdwara hall");
            location.venue_type = Some("Gurdwara".to_string());
            Self {
                location,
                performers: vec![
                    PerformerRequirement::new("vocal", 1),
                    PerformerRequirement::new("tabla", 1),
                    PerformerRequirement::new("Vocal", 1),
                ],
                gear: Vec::new(),
                library: Vec::new(),
                instruments: Vec::new(),
                venues: Vec::new(),
                history: Vec::new(),
            }
        }

        fn run(&self) -> KnowledgeContext {
            KnowledgeAggregator::new().aggregate(AggregationInput {
                location: &self.location,
                performers: &self.performers,
                gear: &self.gear,
                knowledge_library: &self.library,
                instrument_profiles: &self.instruments,
                venue_profiles: &self.venues,
                history: &self.history,
            })
        }

        fn setup(&self, rating: Option<u8>, age_days: i64) -> HistoricalSetup {
            HistoricalSetup {
                id: Uuid::new_v4(),
                account_id: self.location.account_id,
                location_id: self.location.id,
                event_name: Some(format!("Event -{}d", age_days)),
                event_date: None,
                performers: self.performers.clone(),
                rating,
                notes: None,
                channel_config: Default::default(),
                eq_settings: Default::default(),
                compression_settings: Default::default(),
                fx_settings: Default::default(),
                instructions: None,
                troubleshooting_tips: None,
                corrections: BTreeMap::new(),
                origin: SetupOrigin::Generated {
                    parse_status: ParseStatus::Structured,
                },
                created_at: Utc::now() - Duration::days(age_days),
            }
        }
    }

    fn mic(account_id: Uuid, model: &str, quantity: i64) -> GearItem {
        let mut gear = GearItem::new(account_id, "mic", quantity);
        gear.brand = Some("Shure".to_string());
        gear.model = Some(model.to_string());
        gear
    }

    fn library_entry(account_id: Uuid, model: &str) -> HardwareKnowledge {
        HardwareKnowledge {
            id: Uuid::new_v4(),
            account_id,
            hardware_type: "microphone".to_string(),
            brand: "shure".to_string(),
            model: model.to_string(),
            characteristics: Some("Presence peak around 5 kHz".to_string()),
            best_for: None,
            settings_by_source: Some(json!({"vocal": {"hpf": "100 Hz"}})),
            knowledge_entry: None,
            user_notes: None,
        }
    }

    fn loan(gear_id: Uuid, quantity: i64, returned: bool) -> GearLoan {
        GearLoan {
            id: Uuid::new_v4(),
            gear_id,
            borrower_name: "Youth camp".to_string(),
            quantity_loaned: quantity,
            loan_date: Utc::now(),
            expected_return_date: None,
            returned,
        }
    }

    fn instrument_profile(account_id: Uuid, key: &str, active: bool) -> InstrumentProfile {
        InstrumentProfile {
            id: Uuid::new_v4(),
            account_id,
            name: key.to_string(),
            value_key: key.to_string(),
            category: "percussion".to_string(),
            description: None,
            mic_recommendations: None,
            eq_settings: Some(json!({"hpf": "60 Hz"})),
            compression_settings: None,
            fx_recommendations: None,
            mixing_notes: None,
            active,
        }
    }

    fn venue_profile(account_id: Uuid, key: &str, active: bool) -> VenueProfile {
        VenueProfile {
            id: Uuid::new_v4(),
            account_id,
            name: key.to_string(),
            value_key: key.to_string(),
            category: "worship".to_string(),
            description: None,
            acoustic_characteristics: Some(json!({"rt60": "2.1s"})),
            eq_strategy: None,
            fx_approach: None,
            compression_philosophy: None,
            monitoring_notes: None,
            special_considerations: None,
            active,
        }
    }

    fn correction(instrument: Option<&str>, gain: &str) -> CorrectionEntry {
        CorrectionEntry {
            instrument: instrument.map(str::to_string),
            gain_change: Some(gain.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_availability_clamped_and_flagged() {
        let mut fx = Fixture::new();
        let mut gear = mic(fx.location.account_id, "SM58", 2);
        gear.loans = vec![loan(gear.id, 2, false), loan(gear.id, 1, false), loan(gear.id, 5, true)];
        fx.gear.push(gear);

        let context = fx.run();
        assert_eq!(context.gear[0].quantity_on_loan, 3);
        assert_eq!(context.gear[0].quantity_available, 0);
        assert!(matches!(
            context.anomalies.as_slice(),
            [Anomaly::OverLoaned { owned: 2, on_loan: 3, .. }]
        ));
    }

    #[test]
    fn test_returned_loans_do_not_reduce_availability() {
        let mut fx = Fixture::new();
        let mut gear = mic(fx.location.account_id, "SM58", 4);
        gear.loans = vec![loan(gear.id, 3, true), loan(gear.id, 1, false)];
        fx.gear.push(gear);

        assert_eq!(fx.run().gear[0].quantity_available, 3);
    }

    #[test]
    fn test_owned_gear_settings_win_over_library() {
        let mut fx = Fixture::new();
        let account = fx.location.account_id;
        let mut owned = mic(account, "Beta 58A", 1);
        owned.default_settings = Some(json!({"hpf": "120 Hz"}));
        fx.gear.push(owned);
        fx.library.push(library_entry(account, "beta 58a"));
        fx.library.push(library_entry(account, "SM81"));

        let context = fx.run();
        let gear = &context.gear[0];
        assert_eq!(gear.effective_settings(), Some(&json!({"hpf": "120 Hz"})));
        assert!(gear.library.is_some(), "library knowledge attached to owned unit");
        assert_eq!(context.knowledge_library.len(), 1);
        assert_eq!(context.knowledge_library[0].model, "SM81");
    }

    #[test]
    fn test_library_settings_used_when_unit_has_none() {
        let mut fx = Fixture::new();
        let account = fx.location.account_id;
        fx.gear.push(mic(account, "SM58", 1));
        fx.library.push(library_entry(account, "SM58"));

        let context = fx.run();
        assert_eq!(
            context.gear[0].effective_settings(),
            Some(&json!({"vocal": {"hpf": "100 Hz"}}))
        );
        assert!(context.knowledge_library.is_empty());
    }

    #[test]
    fn test_history_ordered_and_partitioned() {
        let mut fx = Fixture::new();
        let low_new = fx.setup(Some(2), 1);
        let high_old = fx.setup(Some(5), 40);
        let high_new = fx.setup(Some(5), 3);
        let unrated = fx.setup(None, 0);
        fx.history = vec![low_new.clone(), high_old.clone(), unrated, high_new.clone()];

        let context = fx.run();
        let ids: Vec<Uuid> = context.history.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![high_new.id, high_old.id, low_new.id]);
        assert_eq!(context.successful().count(), 2);
        assert_eq!(context.needs_improvement().count(), 1);
        assert!(context.anomalies.is_empty());
    }

    #[test]
    fn test_rated_location_corrections_beat_profile() {
        let mut fx = Fixture::new();
        let account = fx.location.account_id;
        fx.instruments.push(instrument_profile(account, "tabla", true));
        fx.instruments.push(instrument_profile(account, "vocal", true));

        let mut rated = fx.setup(Some(4), 5);
        rated.corrections.insert("2".to_string(), correction(Some("Tabla"), "+2 dB"));
        rated.corrections.insert("9".to_string(), correction(None, "cut 250 Hz on LR"));
        fx.history.push(rated.clone());

        let context = fx.run();
        let tabla = context.guidance_for("tabla").unwrap();
        assert_eq!(tabla.source(), GuidanceSource::LocationCorrections);
        assert_eq!(tabla.location_corrections[0].setup_id, rated.id);
        assert!(tabla.profile.is_some());

        let vocal = context.guidance_for("vocal").unwrap();
        assert_eq!(vocal.source(), GuidanceSource::Profile);
        assert_eq!(vocal.count, 2, "rows of the same type are merged");

        assert_eq!(context.venue_corrections.len(), 1);
        assert_eq!(context.venue_corrections[0].channel, "9");
    }

    #[test]
    fn test_guidance_follows_lineup_order() {
        let fx = Fixture::new();
        let context = fx.run();
        let types: Vec<&str> = context
            .instrument_profiles
            .iter()
            .map(|g| g.performer_type.as_str())
            .collect();
        assert_eq!(types, vec!["vocal", "tabla"]);
        assert_eq!(context.instrument_profiles[1].source(), GuidanceSource::None);
    }

    #[test]
    fn test_compound_instrument_names_match() {
        let mut fx = Fixture::new();
        let mut rated = fx.setup(Some(3), 2);
        rated.corrections.insert("1".to_string(), correction(Some("Lead Vocal"), "-2 dB"));
        fx.history.push(rated);

        let context = fx.run();
        assert_eq!(context.guidance_for("vocal").unwrap().location_corrections.len(), 1);
        assert!(context.guidance_for("tabla").unwrap().location_corrections.is_empty());
    }

    #[test]
    fn test_unrated_and_foreign_history_skipped() {
        let mut fx = Fixture::new();
        let mut unrated = fx.setup(None, 1);
        unrated.corrections.insert("1".to_string(), correction(Some("vocal"), "+1 dB"));
        let mut foreign = fx.setup(Some(5), 1);
        foreign.location_id = Uuid::new_v4();
        fx.history = vec![unrated.clone(), foreign.clone()];

        let context = fx.run();
        assert!(context.history.is_empty());
        assert!(context.guidance_for("vocal").unwrap().location_corrections.is_empty());
        assert_eq!(context.anomalies.len(), 2);
        assert!(context
            .anomalies
            .contains(&Anomaly::UnratedCorrections { setup_id: unrated.id }));
    }

    #[test]
    fn test_venue_profile_matched_by_type_and_active() {
        let mut fx = Fixture::new();
        let account = fx.location.account_id;
        fx.venues.push(venue_profile(account, "church", true));
        fx.venues.push(venue_profile(account, "gurdwara", false));
        assert!(fx.run().venue_profile.is_none(), "inactive profile ignored");

        fx.venues.push(venue_profile(account, "gurdwara", true));
        let context = fx.run();
        assert_eq!(context.venue_profile.map(|p| p.value_key), Some("gurdwara".to_string()));
    }

    #[test]
    fn test_inactive_instrument_profile_ignored() {
        let mut fx = Fixture::new();
        fx.instruments.push(instrument_profile(fx.location.account_id, "tabla", false));
        assert_eq!(fx.run().guidance_for("tabla").unwrap().source(), GuidanceSource::None);
    }
}
