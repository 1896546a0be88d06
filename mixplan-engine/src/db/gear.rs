//! Owned gear and loan storage

use mixplan_common::models::{GearItem, GearLoan};
use mixplan_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use super::{
    opt_json_text, parse_json, parse_opt_timestamp, parse_timestamp, parse_uuid, timestamp_text,
};

pub async fn insert_gear(pool: &SqlitePool, gear: &GearItem) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO gear (
            id, account_id, kind, brand, model, serial_number,
            quantity, specs, default_settings, notes
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(gear.id.to_string())
    .bind(gear.account_id.to_string())
    .bind(&gear.kind)
    .bind(&gear.brand)
    .bind(&gear.model)
    .bind(&gear.serial_number)
    .bind(gear.quantity)
    .bind(opt_json_text(gear.specs.as_ref())?)
    .bind(opt_json_text(gear.default_settings.as_ref())?)
    .bind(&gear.notes)
    .execute(&mut *tx)
    .await?;

    for loan in &gear.loans {
        insert_loan_in(&mut tx, loan).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Record a loan against gear owned by `account_id`
///
/// Returns false (and writes nothing) when the gear is not the account's.
pub async fn insert_loan(pool: &SqlitePool, account_id: Uuid, loan: &GearLoan) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let owned: Option<(String,)> = sqlx::query_as("SELECT id FROM gear WHERE id = ? AND account_id = ?")
        .bind(loan.gear_id.to_string())
        .bind(account_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
    if owned.is_none() {
        return Ok(false);
    }
    insert_loan_in(&mut tx, loan).await?;
    tx.commit().await?;
    Ok(true)
}

async fn insert_loan_in(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, loan: &GearLoan) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO gear_loans (
            id, gear_id, borrower_name, quantity_loaned,
            loan_date, expected_return_date, returned
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(loan.id.to_string())
    .bind(loan.gear_id.to_string())
    .bind(&loan.borrower_name)
    .bind(loan.quantity_loaned)
    .bind(timestamp_text(&loan.loan_date))
    .bind(loan.expected_return_date.as_ref().map(timestamp_text))
    .bind(loan.returned)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Mark a loan returned; returns false when the account has no such loan
pub async fn mark_loan_returned(pool: &SqlitePool, account_id: Uuid, loan_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE gear_loans SET returned = 1
        WHERE id = ?
          AND gear_id IN (SELECT id FROM gear WHERE account_id = ?)
        "#,
    )
    .bind(loan_id.to_string())
    .bind(account_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// All gear owned by `account_id`, each with its loan records
///
/// Rows that fail to decode are skipped with a warning.
pub async fn list_gear_with_loans(pool: &SqlitePool, account_id: Uuid) -> Result<Vec<GearItem>> {
    let account = account_id.to_string();

    let gear_rows = sqlx::query(
        r#"
        SELECT id, account_id, kind, brand, model, serial_number,
               quantity, specs, default_settings, notes
        FROM gear
        WHERE account_id = ?
        ORDER BY kind, brand, model
        "#,
    )
    .bind(&account)
    .fetch_all(pool)
    .await?;

    let loan_rows = sqlx::query(
        r#"
        SELECT l.id, l.gear_id, l.borrower_name, l.quantity_loaned,
               l.loan_date, l.expected_return_date, l.returned
        FROM gear_loans l
        JOIN gear g ON g.id = l.gear_id
        WHERE g.account_id = ?
        ORDER BY l.loan_date
        "#,
    )
    .bind(&account)
    .fetch_all(pool)
    .await?;

    let mut loans_by_gear: HashMap<Uuid, Vec<GearLoan>> = HashMap::new();
    for row in &loan_rows {
        match loan_from_row(row) {
            Ok(loan) => loans_by_gear.entry(loan.gear_id).or_default().push(loan),
            Err(e) => warn!(account_id = %account_id, error = %e, "Skipping malformed loan row"),
        }
    }

    let mut items = Vec::with_capacity(gear_rows.len());
    for row in &gear_rows {
        match gear_from_row(row) {
            Ok(mut gear) => {
                gear.loans = loans_by_gear.remove(&gear.id).unwrap_or_default();
                items.push(gear);
            }
            Err(e) => warn!(account_id = %account_id, error = %e, "Skipping malformed gear row"),
        }
    }

    Ok(items)
}

fn gear_from_row(row: &SqliteRow) -> Result<GearItem> {
    Ok(GearItem {
        id: parse_uuid(row.get("id"), "gear.id")?,
        account_id: parse_uuid(row.get("account_id"), "gear.account_id")?,
        kind: row.get("kind"),
        brand: row.get("brand"),
        model: row.get("model"),
        serial_number: row.get("serial_number"),
        quantity: row.get("quantity"),
        specs: parse_json(row.get("specs"))?,
        default_settings: parse_json(row.get("default_settings"))?,
        notes: row.get("notes"),
        loans: Vec::new(),
    })
}

fn loan_from_row(row: &SqliteRow) -> Result<GearLoan> {
    Ok(GearLoan {
        id: parse_uuid(row.get("id"), "gear_loans.id")?,
        gear_id: parse_uuid(row.get("gear_id"), "gear_loans.gear_id")?,
        borrower_name: row.get("borrower_name"),
        quantity_loaned: row.get("quantity_loaned"),
        loan_date: parse_timestamp(row.get("loan_date"), "gear_loans.loan_date")?,
        expected_return_date: parse_opt_timestamp(
            row.get("expected_return_date"),
            "gear_loans.expected_return_date",
        )?,
        returned: row.get("returned"),
    })
}
