//! Owned gear, loans, and the shared hardware knowledge library

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity key for a hardware model ("brand model", normalized)
///
/// Returns `None` when no model is known; brand alone does not identify a unit.
pub fn hardware_key(brand: Option<&str>, model: Option<&str>) -> Option<String> {
    let model = model.map(str::trim).filter(|m| !m.is_empty())?;
    let joined = match brand.map(str::trim).filter(|b| !b.is_empty()) {
        Some(brand) => format!("{} {}", brand, model),
        None => model.to_string(),
    };
    Some(
        joined
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Loan of some units of an owned gear item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GearLoan {
    pub id: Uuid,
    pub gear_id: Uuid,
    pub borrower_name: String,
    pub quantity_loaned: i64,
    pub loan_date: DateTime<Utc>,
    pub expected_return_date: Option<DateTime<Utc>>,
    pub returned: bool,
}

/// Gear owned by an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GearItem {
    pub id: Uuid,
    pub account_id: Uuid,
    /// mic, mixer, speaker, amplifier, di_box, ...
    pub kind: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    /// Units owned
    pub quantity: i64,
    /// Polar pattern, frequency response, etc.
    pub specs: Option<Value>,
    /// Settings tuned for this specific unit
    pub default_settings: Option<Value>,
    pub notes: Option<String>,
    pub loans: Vec<GearLoan>,
}

impl GearItem {
    pub fn new(account_id: Uuid, kind: impl Into<String>, quantity: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            kind: kind.into(),
            brand: None,
            model: None,
            serial_number: None,
            quantity,
            specs: None,
            default_settings: None,
            notes: None,
            loans: Vec::new(),
        }
    }

    pub fn hardware_key(&self) -> Option<String> {
        hardware_key(self.brand.as_deref(), self.model.as_deref())
    }

    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [self.brand.as_deref(), self.model.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if parts.is_empty() {
            self.kind.clone()
        } else {
            parts.join(" ")
        }
    }

    /// Units currently out on loan (unreturned loans only)
    pub fn quantity_on_loan(&self) -> i64 {
        self.loans
            .iter()
            .filter(|loan| !loan.returned)
            .map(|loan| loan.quantity_loaned)
            .sum()
    }
}

/// Hardware learned into the shared knowledge library
///
/// May describe gear the account does not own (venue-installed amps,
/// researched purchases).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareKnowledge {
    pub id: Uuid,
    pub account_id: Uuid,
    /// microphone, speaker, amplifier, di_box, mixer
    pub hardware_type: String,
    pub brand: String,
    pub model: String,
    pub characteristics: Option<String>,
    pub best_for: Option<String>,
    /// EQ/compression recommendations keyed by source type
    pub settings_by_source: Option<Value>,
    /// Markdown knowledge entry
    pub knowledge_entry: Option<String>,
    pub user_notes: Option<String>,
}

impl HardwareKnowledge {
    pub fn hardware_key(&self) -> Option<String> {
        hardware_key(Some(&self.brand), Some(&self.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loan(quantity: i64, returned: bool) -> GearLoan {
        GearLoan {
            id: Uuid::new_v4(),
            gear_id: Uuid::nil(),
            borrower_name: "Temple band".to_string(),
            quantity_loaned: quantity,
            loan_date: Utc::now(),
            expected_return_date: None,
            returned,
        }
    }

    #[test]
    fn test_hardware_key_normalizes() {
        assert_eq!(
            hardware_key(Some(" Shure "), Some("Beta  58A")),
            Some("shure beta 58a".to_string())
        );
        assert_eq!(hardware_key(Some("Shure"), None), None);
        assert_eq!(hardware_key(None, Some("SM58")), Some("sm58".to_string()));
    }

    #[test]
    fn test_only_unreturned_loans_count() {
        let mut gear = GearItem::new(Uuid::new_v4(), "mic", 4);
        gear.loans = vec![loan(1, false), loan(2, true), loan(1, false)];
        assert_eq!(gear.quantity_on_loan(), 2);
    }

    #[test]
    fn test_display_name_falls_back_to_kind() {
        let gear = GearItem::new(Uuid::new_v4(), "di_box", 1);
        assert_eq!(gear.display_name(), "di_box");
    }
}
