//! Subscription plans and per-period usage counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Limit value meaning "no limit"
pub const UNLIMITED: i64 = -1;

/// Subscription plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Basic,
    Pro,
    Admin,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Basic => "basic",
            Plan::Pro => "pro",
            Plan::Admin => "admin",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "basic" => Ok(Plan::Basic),
            "pro" => Ok(Plan::Pro),
            "admin" => Ok(Plan::Admin),
            other => Err(crate::Error::InvalidInput(format!("Unknown plan: {}", other))),
        }
    }
}

/// Usage counter kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaKind {
    /// Setup generation through the external generator
    Generation,
    /// Hardware/instrument learning through the external generator
    Learning,
}

impl QuotaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKind::Generation => "generation",
            QuotaKind::Learning => "learning",
        }
    }
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-period limits for one plan (`UNLIMITED` = no limit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub generations: i64,
    pub learning: i64,
}

impl PlanLimits {
    pub fn limit(&self, kind: QuotaKind) -> i64 {
        match kind {
            QuotaKind::Generation => self.generations,
            QuotaKind::Learning => self.learning,
        }
    }
}

/// Limits for every plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimitTable {
    pub free: PlanLimits,
    pub basic: PlanLimits,
    pub pro: PlanLimits,
    pub admin: PlanLimits,
}

impl PlanLimitTable {
    pub fn limits_for(&self, plan: Plan) -> PlanLimits {
        match plan {
            Plan::Free => self.free,
            Plan::Basic => self.basic,
            Plan::Pro => self.pro,
            Plan::Admin => self.admin,
        }
    }

    pub fn limits_for_mut(&mut self, plan: Plan) -> &mut PlanLimits {
        match plan {
            Plan::Free => &mut self.free,
            Plan::Basic => &mut self.basic,
            Plan::Pro => &mut self.pro,
            Plan::Admin => &mut self.admin,
        }
    }
}

impl Default for PlanLimitTable {
    fn default() -> Self {
        Self {
            free: PlanLimits { generations: 2, learning: 3 },
            basic: PlanLimits { generations: 15, learning: 20 },
            pro: PlanLimits { generations: UNLIMITED, learning: UNLIMITED },
            admin: PlanLimits { generations: UNLIMITED, learning: UNLIMITED },
        }
    }
}

/// Whether one more use fits under `limit`
pub fn limit_allows(used: i64, limit: i64) -> bool {
    limit == UNLIMITED || used < limit
}

/// Usage counters for one account in the current billing period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub account_id: Uuid,
    pub plan: Plan,
    pub generation_used: i64,
    pub learning_used: i64,
    pub generation_limit: i64,
    pub learning_limit: i64,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

impl QuotaState {
    pub fn used(&self, kind: QuotaKind) -> i64 {
        match kind {
            QuotaKind::Generation => self.generation_used,
            QuotaKind::Learning => self.learning_used,
        }
    }

    pub fn limit(&self, kind: QuotaKind) -> i64 {
        match kind {
            QuotaKind::Generation => self.generation_limit,
            QuotaKind::Learning => self.learning_limit,
        }
    }

    pub fn allows(&self, kind: QuotaKind) -> bool {
        limit_allows(self.used(kind), self.limit(kind))
    }

    /// Remaining uses, `None` when unlimited
    pub fn remaining(&self, kind: QuotaKind) -> Option<i64> {
        let limit = self.limit(kind);
        if limit == UNLIMITED {
            None
        } else {
            Some((limit - self.used(kind)).max(0))
        }
    }
}
