//! Quota Gate Service
//!
//! Per-account, per-period usage counters for generation and learning calls.
//!
//! `check_allowed` is a read-only pre-check made before the expensive call.
//! The authoritative check is the conditional increment in `record_usage`,
//! which cannot overshoot the plan limit however many requests race.

use chrono::{DateTime, Utc};
use mixplan_common::models::{Plan, PlanLimitTable, QuotaKind, QuotaState};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::quotas::{self, QuotaRow};
use crate::error::{EngineError, EngineResult};

/// External billing-period event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BillingEvent {
    /// Subscription renewed: new period, counters reset
    Renewed {
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    },
    /// New subscription: plan changes, counters reset
    Activated { plan: Plan },
    /// Subscription cancelled: back to free, counters kept (capped at free limits)
    Cancelled,
}

/// Usage quota gate
#[derive(Debug, Clone)]
pub struct QuotaGate {
    pool: SqlitePool,
    limits: PlanLimitTable,
}

impl QuotaGate {
    pub fn new(pool: SqlitePool, limits: PlanLimitTable) -> Self {
        Self { pool, limits }
    }

    pub fn limits(&self) -> &PlanLimitTable {
        &self.limits
    }

    /// Current counters (creates a free-plan row for a new account)
    pub async fn status(&self, account_id: Uuid) -> EngineResult<QuotaState> {
        let row = quotas::get_or_create_quota(&self.pool, account_id).await?;
        Ok(self.state_from(row))
    }

    /// Fail with `QuotaExceeded` when no use of `kind` is left
    pub async fn check_allowed(&self, account_id: Uuid, kind: QuotaKind) -> EngineResult<QuotaState> {
        let state = self.status(account_id).await?;
        if state.allows(kind) {
            Ok(state)
        } else {
            warn!(
                account_id = %account_id,
                kind = %kind,
                plan = %state.plan,
                used = state.used(kind),
                limit = state.limit(kind),
                "Quota exceeded"
            );
            Err(exceeded(&state, kind))
        }
    }

    /// Record one use of `kind` in its own transaction
    pub async fn record_usage(&self, account_id: Uuid, kind: QuotaKind) -> EngineResult<QuotaState> {
        let mut tx = self.pool.begin().await?;
        let state = self.record_usage_in(&mut *tx, account_id, kind).await?;
        tx.commit().await?;
        Ok(state)
    }

    /// Record one use of `kind` on an open connection or transaction
    ///
    /// On `QuotaExceeded` nothing was changed; the caller should roll back
    /// whatever else it wrote in the same transaction.
    pub async fn record_usage_in(
        &self,
        conn: &mut SqliteConnection,
        account_id: Uuid,
        kind: QuotaKind,
    ) -> EngineResult<QuotaState> {
        quotas::ensure_quota_row(&mut *conn, account_id).await?;

        match quotas::try_consume(&mut *conn, account_id, kind, &self.limits).await? {
            Some(row) => {
                let state = self.state_from(row);
                info!(
                    account_id = %account_id,
                    kind = %kind,
                    used = state.used(kind),
                    limit = state.limit(kind),
                    "Usage recorded"
                );
                Ok(state)
            }
            None => {
                let row = quotas::fetch_quota(&mut *conn, account_id).await?.ok_or_else(|| {
                    EngineError::Common(mixplan_common::Error::Internal(format!(
                        "Quota row missing for {}",
                        account_id
                    )))
                })?;
                let state = self.state_from(row);
                warn!(
                    account_id = %account_id,
                    kind = %kind,
                    used = state.used(kind),
                    limit = state.limit(kind),
                    "Usage rejected at record time; limit reached concurrently"
                );
                Err(exceeded(&state, kind))
            }
        }
    }

    pub async fn apply_billing_event(
        &self,
        account_id: Uuid,
        event: BillingEvent,
    ) -> EngineResult<QuotaState> {
        let row = match event {
            BillingEvent::Renewed { period_start, period_end } => {
                if period_end <= period_start {
                    return Err(EngineError::Validation(
                        "Billing period must end after it starts".to_string(),
                    ));
                }
                quotas::reset_period(&self.pool, account_id, period_start, period_end).await?
            }
            BillingEvent::Activated { plan } => {
                quotas::activate_plan(&self.pool, account_id, plan).await?
            }
            BillingEvent::Cancelled => {
                quotas::downgrade_plan(&self.pool, account_id, Plan::Free, self.limits.free)
                    .await?
            }
        };

        info!(account_id = %account_id, event = ?event, plan = %row.plan, "Billing event applied");
        Ok(self.state_from(row))
    }

    fn state_from(&self, row: QuotaRow) -> QuotaState {
        let limits = self.limits.limits_for(row.plan);
        QuotaState {
            account_id: row.account_id,
            plan: row.plan,
            generation_used: row.generation_used,
            learning_used: row.learning_used,
            generation_limit: limits.generations,
            learning_limit: limits.learning,
            period_start: row.period_start,
            period_end: row.period_end,
        }
    }
}

fn exceeded(state: &QuotaState, kind: QuotaKind) -> EngineError {
    EngineError::QuotaExceeded {
        kind,
        plan: state.plan,
        used: state.used(kind),
        limit: state.limit(kind),
    }
}
