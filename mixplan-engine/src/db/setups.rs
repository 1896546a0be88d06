//! Historical setup storage
//!
//! Technical columns are written once by [`insert_setup`]; afterwards only
//! rating, notes and corrections change.

use mixplan_common::models::{
    validate_rating, ChannelConfig, CompressionSettings, CorrectionEntry, EqSettings, FxSettings,
    HistoricalSetup, PerformerRequirement, SetupOrigin,
};
use mixplan_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

use super::{
    json_text, parse_json, parse_opt_date, parse_opt_uuid, parse_timestamp, parse_typed,
    parse_uuid, timestamp_text,
};

const SETUP_COLUMNS: &str = "id, account_id, location_id, event_name, event_date, performers, \
     rating, notes, channel_config, eq_settings, compression_settings, fx_settings, \
     instructions, troubleshooting_tips, corrections, origin, source_setup_id, parse_status, \
     created_at";

/// Insert a new setup record
///
/// Generic over the executor so the insert can share a transaction with
/// quota accounting.
pub async fn insert_setup<'e, E>(executor: E, setup: &HistoricalSetup) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO setups (
            id, account_id, location_id, event_name, event_date, performers,
            rating, notes, channel_config, eq_settings, compression_settings,
            fx_settings, instructions, troubleshooting_tips, corrections,
            origin, source_setup_id, parse_status, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(setup.id.to_string())
    .bind(setup.account_id.to_string())
    .bind(setup.location_id.to_string())
    .bind(&setup.event_name)
    .bind(setup.event_date.map(|d| d.format("%Y-%m-%d").to_string()))
    .bind(json_text(&setup.performers)?)
    .bind(setup.rating.map(i64::from))
    .bind(&setup.notes)
    .bind(json_text(&setup.channel_config)?)
    .bind(json_text(&setup.eq_settings)?)
    .bind(json_text(&setup.compression_settings)?)
    .bind(json_text(&setup.fx_settings)?)
    .bind(&setup.instructions)
    .bind(&setup.troubleshooting_tips)
    .bind(json_text(&setup.corrections)?)
    .bind(setup.origin.as_str())
    .bind(setup.origin.source_id().map(|id| id.to_string()))
    .bind(setup.origin.parse_status().map(|s| s.as_str()))
    .bind(timestamp_text(&setup.created_at))
    .execute(executor)
    .await?;

    Ok(())
}

/// Load a setup owned by `account_id`
pub async fn find_setup(
    pool: &SqlitePool,
    account_id: Uuid,
    setup_id: Uuid,
) -> Result<Option<HistoricalSetup>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM setups WHERE id = ? AND account_id = ?",
        SETUP_COLUMNS
    ))
    .bind(setup_id.to_string())
    .bind(account_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| setup_from_row(&r)).transpose()
}

/// Every setup the account recorded at one venue, rated or not
///
/// `exclude` drops one setup (the one being refreshed). Rows that fail to
/// decode are skipped with a warning. Ordered rating desc (unrated last),
/// then newest first.
pub async fn history_for_location(
    pool: &SqlitePool,
    account_id: Uuid,
    location_id: Uuid,
    exclude: Option<Uuid>,
) -> Result<Vec<HistoricalSetup>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM setups
        WHERE account_id = ? AND location_id = ? AND (? IS NULL OR id != ?)
        ORDER BY rating IS NULL, rating DESC, created_at DESC
        "#,
        SETUP_COLUMNS
    ))
    .bind(account_id.to_string())
    .bind(location_id.to_string())
    .bind(exclude.map(|id| id.to_string()))
    .bind(exclude.map(|id| id.to_string()))
    .fetch_all(pool)
    .await?;

    let mut setups = Vec::with_capacity(rows.len());
    for row in &rows {
        match setup_from_row(row) {
            Ok(setup) => setups.push(setup),
            Err(e) => {
                let id: Option<String> = row.try_get("id").ok();
                warn!(
                    location_id = %location_id,
                    setup_id = id.as_deref().unwrap_or("?"),
                    error = %e,
                    "Skipping malformed setup row"
                );
            }
        }
    }
    Ok(setups)
}

/// Set rating and notes; returns false when the setup is absent or not owned
pub async fn update_rating(
    pool: &SqlitePool,
    account_id: Uuid,
    setup_id: Uuid,
    rating: u8,
    notes: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE setups SET rating = ?, notes = COALESCE(?, notes) WHERE id = ? AND account_id = ?",
    )
    .bind(i64::from(rating))
    .bind(notes)
    .bind(setup_id.to_string())
    .bind(account_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Replace the corrections map of a rated setup
///
/// The `rating IS NOT NULL` guard keeps corrections off unrated setups even
/// if a rating is cleared concurrently.
pub async fn update_corrections(
    pool: &SqlitePool,
    account_id: Uuid,
    setup_id: Uuid,
    corrections: &BTreeMap<String, CorrectionEntry>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE setups SET corrections = ? WHERE id = ? AND account_id = ? AND rating IS NOT NULL",
    )
    .bind(json_text(corrections)?)
    .bind(setup_id.to_string())
    .bind(account_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn setup_from_row(row: &SqliteRow) -> Result<HistoricalSetup> {
    let performers: Vec<PerformerRequirement> = parse_typed(row.get("performers"))?;
    let corrections: BTreeMap<String, CorrectionEntry> = parse_typed(row.get("corrections"))?;
    let rating = row
        .get::<Option<i64>, _>("rating")
        .map(validate_rating)
        .transpose()?;

    let origin_name: String = row.get("origin");
    let parse_status: Option<String> = row.get("parse_status");
    let origin = SetupOrigin::from_parts(
        &origin_name,
        parse_opt_uuid(row.get("source_setup_id"), "setups.source_setup_id")?,
        parse_status.as_deref(),
    )?;

    Ok(HistoricalSetup {
        id: parse_uuid(row.get("id"), "setups.id")?,
        account_id: parse_uuid(row.get("account_id"), "setups.account_id")?,
        location_id: parse_uuid(row.get("location_id"), "setups.location_id")?,
        event_name: row.get("event_name"),
        event_date: parse_opt_date(row.get("event_date"), "setups.event_date")?,
        performers,
        rating,
        notes: row.get("notes"),
        channel_config: ChannelConfig::from_value(parse_json(row.get("channel_config"))?.as_ref()),
        eq_settings: EqSettings::from_value(parse_json(row.get("eq_settings"))?.as_ref()),
        compression_settings: CompressionSettings::from_value(
            parse_json(row.get("compression_settings"))?.as_ref(),
        ),
        fx_settings: FxSettings::from_value(parse_json(row.get("fx_settings"))?.as_ref()),
        instructions: row.get("instructions"),
        troubleshooting_tips: row.get("troubleshooting_tips"),
        corrections,
        origin,
        created_at: parse_timestamp(row.get("created_at"), "setups.created_at")?,
    })
}
