//! Venue storage

use mixplan_common::models::Location;
use mixplan_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{opt_json_text, parse_json, parse_timestamp, parse_uuid, timestamp_text};

const LOCATION_COLUMNS: &str = "id, account_id, name, venue_type, notes, speaker_setup, \
     lr_geq_cuts, monitor_geq_cuts, room_notes, created_at";

pub async fn insert_location(pool: &SqlitePool, location: &Location) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO locations (
            id, account_id, name, venue_type, notes, speaker_setup,
            lr_geq_cuts, monitor_geq_cuts, room_notes, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(location.id.to_string())
    .bind(location.account_id.to_string())
    .bind(&location.name)
    .bind(&location.venue_type)
    .bind(&location.notes)
    .bind(opt_json_text(location.speaker_setup.as_ref())?)
    .bind(opt_json_text(location.lr_geq_cuts.as_ref())?)
    .bind(opt_json_text(location.monitor_geq_cuts.as_ref())?)
    .bind(&location.room_notes)
    .bind(timestamp_text(&location.created_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a venue owned by `account_id`
///
/// A venue owned by someone else is reported exactly like a missing one.
pub async fn find_location(
    pool: &SqlitePool,
    account_id: Uuid,
    location_id: Uuid,
) -> Result<Option<Location>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM locations WHERE id = ? AND account_id = ?",
        LOCATION_COLUMNS
    ))
    .bind(location_id.to_string())
    .bind(account_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| location_from_row(&r)).transpose()
}

pub async fn list_locations(pool: &SqlitePool, account_id: Uuid) -> Result<Vec<Location>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM locations WHERE account_id = ? ORDER BY name",
        LOCATION_COLUMNS
    ))
    .bind(account_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(location_from_row).collect()
}

fn location_from_row(row: &SqliteRow) -> Result<Location> {
    Ok(Location {
        id: parse_uuid(row.get("id"), "locations.id")?,
        account_id: parse_uuid(row.get("account_id"), "locations.account_id")?,
        name: row.get("name"),
        venue_type: row.get("venue_type"),
        notes: row.get("notes"),
        speaker_setup: parse_json(row.get("speaker_setup"))?,
        lr_geq_cuts: parse_json(row.get("lr_geq_cuts"))?,
        monitor_geq_cuts: parse_json(row.get("monitor_geq_cuts"))?,
        room_notes: row.get("room_notes"),
        created_at: parse_timestamp(row.get("created_at"), "locations.created_at")?,
    })
}
