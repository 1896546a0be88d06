//! Data model shared by the engine and storage layers
//!
//! Entities reference each other by id only; ownership is expressed by the
//! owning account or location id stored on the child record.

pub mod gear;
pub mod location;
pub mod performer;
pub mod profiles;
pub mod quota;
pub mod settings;
pub mod setup;

pub use gear::{hardware_key, GearItem, GearLoan, HardwareKnowledge};
pub use location::Location;
pub use performer::{validate_lineup, InputSource, PerformerRequirement};
pub use profiles::{InstrumentProfile, VenueProfile};
pub use quota::{limit_allows, Plan, PlanLimitTable, PlanLimits, QuotaKind, QuotaState, UNLIMITED};
pub use settings::{
    ChannelAssignment, ChannelCompression, ChannelConfig, ChannelEq, ChannelFx,
    CompressionSettings, EqSettings, FxSettings, SettingsRecord, SETTINGS_SCHEMA_VERSION,
};
pub use setup::{
    validate_rating, CorrectionEntry, HistoricalSetup, ParseStatus, SetupOrigin,
};

/// Normalize a free-form key (performer type, profile key, venue type)
///
/// Trims, lowercases, and folds runs of whitespace, `-` and `_` into one `_`,
/// so "Female Vocal", "female-vocal" and "female_vocal" compare equal.
pub fn normalize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_sep = !out.is_empty();
            continue;
        }
        if pending_sep {
            out.push('_');
            pending_sep = false;
        }
        out.extend(ch.to_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::normalize_key;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("Female Vocal"), "female_vocal");
        assert_eq!(normalize_key("  female--vocal "), "female_vocal");
        assert_eq!(normalize_key("TABLA"), "tabla");
        assert_eq!(normalize_key("   "), "");
    }
}
