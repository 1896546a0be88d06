//! Quota counter storage
//!
//! Counter increments are a single conditional UPDATE, so concurrent requests
//! for one account can never push a counter past its limit.

use chrono::{DateTime, Utc};
use mixplan_common::models::{Plan, PlanLimitTable, PlanLimits, QuotaKind, UNLIMITED};
use mixplan_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{parse_opt_timestamp, parse_uuid, timestamp_text};

/// Stored counters for one account (limits come from configuration)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRow {
    pub account_id: Uuid,
    pub plan: Plan,
    pub generation_used: i64,
    pub learning_used: i64,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

const QUOTA_COLUMNS: &str =
    "account_id, plan, generation_used, learning_used, period_start, period_end";

fn used_column(kind: QuotaKind) -> &'static str {
    match kind {
        QuotaKind::Generation => "generation_used",
        QuotaKind::Learning => "learning_used",
    }
}

/// Create the free-plan row for a new account (no-op when it exists)
pub async fn ensure_quota_row<'e, E>(executor: E, account_id: Uuid) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO quotas (account_id, plan, generation_used, learning_used, updated_at)
        VALUES (?, 'free', 0, 0, ?)
        ON CONFLICT(account_id) DO NOTHING
        "#,
    )
    .bind(account_id.to_string())
    .bind(timestamp_text(&Utc::now()))
    .execute(executor)
    .await?;

    Ok(())
}

/// Read the account's row, if any
pub async fn fetch_quota<'e, E>(executor: E, account_id: Uuid) -> Result<Option<QuotaRow>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "SELECT {} FROM quotas WHERE account_id = ?",
        QUOTA_COLUMNS
    ))
    .bind(account_id.to_string())
    .fetch_optional(executor)
    .await?;

    row.map(|r| quota_from_row(&r)).transpose()
}

pub async fn get_or_create_quota(pool: &SqlitePool, account_id: Uuid) -> Result<QuotaRow> {
    ensure_quota_row(pool, account_id).await?;
    fetch_quota(pool, account_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Quota row missing for {}", account_id)))
}

/// Increment one counter only while it is below the limit of the row's plan
///
/// Plan lookup, limit check and increment are one statement. Returns the
/// updated row, or `None` when the limit was already reached (or the row
/// does not exist).
pub async fn try_consume<'e, E>(
    executor: E,
    account_id: Uuid,
    kind: QuotaKind,
    limits: &PlanLimitTable,
) -> Result<Option<QuotaRow>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let column = used_column(kind);
    let plans = [Plan::Free, Plan::Basic, Plan::Pro, Plan::Admin];
    let allowed = plans
        .iter()
        .map(|_| format!("(plan = ? AND (? = {} OR {} < ?))", UNLIMITED, column))
        .collect::<Vec<_>>()
        .join(" OR ");
    let sql = format!(
        r#"
        UPDATE quotas
        SET {column} = {column} + 1, updated_at = ?
        WHERE account_id = ? AND ({allowed})
        RETURNING {columns}
        "#,
        column = column,
        allowed = allowed,
        columns = QUOTA_COLUMNS
    );

    let mut query = sqlx::query(&sql)
        .bind(timestamp_text(&Utc::now()))
        .bind(account_id.to_string());
    for plan in plans {
        let limit = limits.limits_for(plan).limit(kind);
        query = query.bind(plan.as_str()).bind(limit).bind(limit);
    }

    let rows = query.fetch_all(executor).await?;
    rows.first().map(quota_from_row).transpose()
}

/// Start a new billing period: reset both counters
pub async fn reset_period(
    pool: &SqlitePool,
    account_id: Uuid,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<QuotaRow> {
    ensure_quota_row(pool, account_id).await?;

    let row = sqlx::query(&format!(
        r#"
        UPDATE quotas
        SET generation_used = 0, learning_used = 0,
            period_start = ?, period_end = ?, updated_at = ?
        WHERE account_id = ?
        RETURNING {}
        "#,
        QUOTA_COLUMNS
    ))
    .bind(timestamp_text(&period_start))
    .bind(timestamp_text(&period_end))
    .bind(timestamp_text(&Utc::now()))
    .bind(account_id.to_string())
    .fetch_one(pool)
    .await?;

    quota_from_row(&row)
}

/// Switch plan and reset both counters (new subscription)
pub async fn activate_plan(pool: &SqlitePool, account_id: Uuid, plan: Plan) -> Result<QuotaRow> {
    ensure_quota_row(pool, account_id).await?;

    let row = sqlx::query(&format!(
        r#"
        UPDATE quotas
        SET plan = ?, generation_used = 0, learning_used = 0, updated_at = ?
        WHERE account_id = ?
        RETURNING {}
        "#,
        QUOTA_COLUMNS
    ))
    .bind(plan.as_str())
    .bind(timestamp_text(&Utc::now()))
    .bind(account_id.to_string())
    .fetch_one(pool)
    .await?;

    quota_from_row(&row)
}

/// Switch plan without resetting counters, capping them at `cap`
pub async fn downgrade_plan(
    pool: &SqlitePool,
    account_id: Uuid,
    plan: Plan,
    cap: PlanLimits,
) -> Result<QuotaRow> {
    ensure_quota_row(pool, account_id).await?;

    let row = sqlx::query(&format!(
        r#"
        UPDATE quotas
        SET plan = ?,
            generation_used = CASE WHEN ? = {unlimited} THEN generation_used
                                   ELSE MIN(generation_used, ?) END,
            learning_used = CASE WHEN ? = {unlimited} THEN learning_used
                                 ELSE MIN(learning_used, ?) END,
            updated_at = ?
        WHERE account_id = ?
        RETURNING {columns}
        "#,
        unlimited = UNLIMITED,
        columns = QUOTA_COLUMNS
    ))
    .bind(plan.as_str())
    .bind(cap.generations)
    .bind(cap.generations)
    .bind(cap.learning)
    .bind(cap.learning)
    .bind(timestamp_text(&Utc::now()))
    .bind(account_id.to_string())
    .fetch_one(pool)
    .await?;

    quota_from_row(&row)
}

fn quota_from_row(row: &SqliteRow) -> Result<QuotaRow> {
    let plan: String = row.get("plan");
    Ok(QuotaRow {
        account_id: parse_uuid(row.get("account_id"), "quotas.account_id")?,
        plan: plan.parse()?,
        generation_used: row.get("generation_used"),
        learning_used: row.get("learning_used"),
        period_start: parse_opt_timestamp(row.get("period_start"), "quotas.period_start")?,
        period_end: parse_opt_timestamp(row.get("period_end"), "quotas.period_end")?,
    })
}
