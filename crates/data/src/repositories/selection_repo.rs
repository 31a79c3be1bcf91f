//! `PostgreSQL` selection ledger repository.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use racing_ledger_core::RaceResult;
use rust_decimal::Decimal;
use sqlx::{Connection, PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{LedgerChanges, LedgerStore, StoreError};
use crate::locks::{SystemLease, LEDGER_LOCK_CLASS};
use crate::models::Selection;

const SELECT_COLUMNS: &str = r"
    SELECT id, system_id, row_order, race_date, race_time, country, meeting, horse,
           has_result, result, win_bsp, place_bsp, win_pl, place_pl,
           running_win_pl, running_place_pl, is_new, created_at, updated_at
    FROM selections
";

/// Raw table row; `result` is stored as text.
#[derive(Debug, sqlx::FromRow)]
struct SelectionRow {
    id: Uuid,
    system_id: String,
    row_order: i64,
    race_date: NaiveDate,
    race_time: String,
    country: String,
    meeting: String,
    horse: String,
    has_result: bool,
    result: Option<String>,
    win_bsp: Option<Decimal>,
    place_bsp: Option<Decimal>,
    win_pl: Option<Decimal>,
    place_pl: Option<Decimal>,
    running_win_pl: Decimal,
    running_place_pl: Option<Decimal>,
    is_new: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SelectionRow> for Selection {
    type Error = StoreError;

    fn try_from(row: SelectionRow) -> Result<Self, Self::Error> {
        let result = match row.result.as_deref() {
            None => None,
            Some(raw) => Some(RaceResult::parse(raw).ok_or_else(|| StoreError::Corrupt {
                id: row.id,
                reason: format!("unknown result '{raw}'"),
            })?),
        };

        Ok(Self {
            id: row.id,
            system_id: row.system_id,
            row_order: row.row_order,
            date: row.race_date,
            time: row.race_time,
            country: row.country,
            meeting: row.meeting,
            horse: row.horse,
            has_result: row.has_result,
            result,
            win_bsp: row.win_bsp,
            place_bsp: row.place_bsp,
            win_pl: row.win_pl,
            place_pl: row.place_pl,
            running_win_pl: row.running_win_pl,
            running_place_pl: row.running_place_pl,
            is_new: row.is_new,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_selections(rows: Vec<SelectionRow>) -> Result<Vec<Selection>, StoreError> {
    rows.into_iter().map(Selection::try_from).collect()
}

/// Ledger store over the `selections` and `ledger_sequences` tables.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Creates a new repository instance.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write_row(
        tx: &mut Transaction<'_, Postgres>,
        selection: &Selection,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO selections
                (id, system_id, row_order, race_date, race_time, country, meeting, horse,
                 has_result, result, win_bsp, place_bsp, win_pl, place_pl,
                 running_win_pl, running_place_pl, is_new, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (id) DO UPDATE
            SET race_date = EXCLUDED.race_date,
                race_time = EXCLUDED.race_time,
                country = EXCLUDED.country,
                meeting = EXCLUDED.meeting,
                horse = EXCLUDED.horse,
                has_result = EXCLUDED.has_result,
                result = EXCLUDED.result,
                win_bsp = EXCLUDED.win_bsp,
                place_bsp = EXCLUDED.place_bsp,
                win_pl = EXCLUDED.win_pl,
                place_pl = EXCLUDED.place_pl,
                running_win_pl = EXCLUDED.running_win_pl,
                running_place_pl = EXCLUDED.running_place_pl,
                is_new = EXCLUDED.is_new,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(selection.id)
        .bind(&selection.system_id)
        .bind(selection.row_order)
        .bind(selection.date)
        .bind(&selection.time)
        .bind(&selection.country)
        .bind(&selection.meeting)
        .bind(&selection.horse)
        .bind(selection.has_result)
        .bind(selection.result.map(|r| r.as_str()))
        .bind(selection.win_bsp)
        .bind(selection.place_bsp)
        .bind(selection.win_pl)
        .bind(selection.place_pl)
        .bind(selection.running_win_pl)
        .bind(selection.running_place_pl)
        .bind(selection.is_new)
        .bind(selection.created_at)
        .bind(selection.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_unique_violation(e, selection))?;

        // Imported rows may carry a position beyond the sequence.
        sqlx::query(
            r"
            INSERT INTO ledger_sequences (system_id, last_row_order)
            VALUES ($1, $2)
            ON CONFLICT (system_id) DO UPDATE
            SET last_row_order = GREATEST(ledger_sequences.last_row_order, EXCLUDED.last_row_order)
            ",
        )
        .bind(&selection.system_id)
        .bind(selection.row_order)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

fn map_unique_violation(error: sqlx::Error, selection: &Selection) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.constraint() == Some("selections_system_row_order_key") {
            return StoreError::DuplicateRowOrder {
                system_id: selection.system_id.clone(),
                row_order: selection.row_order,
            };
        }
    }
    StoreError::Database(error)
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn next_row_order(&self, system_id: &str) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            r"
            INSERT INTO ledger_sequences (system_id, last_row_order)
            VALUES ($1, 1)
            ON CONFLICT (system_id) DO UPDATE
            SET last_row_order = ledger_sequences.last_row_order + 1
            RETURNING last_row_order
            ",
        )
        .bind(system_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Selection>, StoreError> {
        let row = sqlx::query_as::<_, SelectionRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Selection::try_from).transpose()
    }

    async fn find_by_system_ordered_from(
        &self,
        system_id: &str,
        from_row_order: i64,
    ) -> Result<Vec<Selection>, StoreError> {
        let rows = sqlx::query_as::<_, SelectionRow>(&format!(
            "{SELECT_COLUMNS} WHERE system_id = $1 AND row_order >= $2 ORDER BY row_order ASC"
        ))
        .bind(system_id)
        .bind(from_row_order)
        .fetch_all(&self.pool)
        .await?;

        into_selections(rows)
    }

    async fn find_preceding(
        &self,
        system_id: &str,
        row_order: i64,
    ) -> Result<Option<Selection>, StoreError> {
        let row = sqlx::query_as::<_, SelectionRow>(&format!(
            "{SELECT_COLUMNS} WHERE system_id = $1 AND row_order < $2 ORDER BY row_order DESC LIMIT 1"
        ))
        .bind(system_id)
        .bind(row_order)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Selection::try_from).transpose()
    }

    async fn find_unresulted(
        &self,
        system_id: Option<&str>,
        dates: &BTreeSet<NaiveDate>,
    ) -> Result<Vec<Selection>, StoreError> {
        let dates: Vec<NaiveDate> = dates.iter().copied().collect();
        let rows = sqlx::query_as::<_, SelectionRow>(&format!(
            r"{SELECT_COLUMNS}
            WHERE has_result = FALSE
              AND race_date = ANY($1)
              AND ($2::TEXT IS NULL OR system_id = $2)
            ORDER BY system_id ASC, row_order ASC"
        ))
        .bind(dates)
        .bind(system_id)
        .fetch_all(&self.pool)
        .await?;

        into_selections(rows)
    }

    async fn system_ids(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT system_id FROM selections ORDER BY system_id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn upsert(&self, selection: &Selection) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::write_row(&mut tx, selection).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM selections WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(&self, changes: &LedgerChanges) -> Result<(), StoreError> {
        changes.validate()?;
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for id in &changes.deletes {
            sqlx::query("DELETE FROM selections WHERE id = $1 AND system_id = $2")
                .bind(id)
                .bind(&changes.system_id)
                .execute(&mut *tx)
                .await?;
        }

        for selection in &changes.upserts {
            Self::write_row(&mut tx, selection).await?;
        }

        tx.commit().await?;

        tracing::debug!(
            system_id = %changes.system_id,
            upserts = changes.upserts.len(),
            deletes = changes.deletes.len(),
            "Committed ledger changes"
        );
        Ok(())
    }

    async fn lock_system(&self, system_id: &str) -> Result<SystemLease, StoreError> {
        // A dedicated session, so a held lock never pins a pooled connection
        // that the reads and the commit need.
        let options = self.pool.connect_options();
        let mut session = PgConnection::connect_with(&options).await?;
        sqlx::query("SELECT pg_advisory_lock($1, hashtext($2))")
            .bind(LEDGER_LOCK_CLASS)
            .bind(system_id)
            .execute(&mut session)
            .await?;

        tracing::debug!(system_id, "Acquired ledger advisory lock");
        Ok(SystemLease::postgres(system_id, session))
    }
}
