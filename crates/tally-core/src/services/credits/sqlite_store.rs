//! SQLite ledger storage
//!
//! Persists ledger state to `credit_ledgers` and consumption records to
//! `credit_consumption`. Both tables are created by the database migrations.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Connection, FromRow, SqlitePool};

use super::error::LedgerError;
use super::period::PeriodId;
use super::store::{LedgerStore, SaveOutcome};
use super::types::{ConsumptionRecord, LedgerState, DEFAULT_PERSISTENCE_TIMEOUT_MS};

// ============================================================================
// Database Row Types
// ============================================================================

/// Row of the `credit_ledgers` table
#[derive(Debug, Clone, FromRow)]
pub struct StoredLedgerState {
    pub scope: String,
    pub period: String,
    pub consumed_total: i64,
    pub last_event_cursor: Option<String>,
    pub version: i64,
    /// RFC 3339
    pub updated_at: String,
}

impl StoredLedgerState {
    /// Convert the row to a `LedgerState`
    ///
    /// Returns `None` if a column holds a value the ledger could never have written.
    pub fn to_ledger_state(&self) -> Option<LedgerState> {
        Some(LedgerState {
            period: PeriodId::new(self.period.clone()),
            consumed_total: u64::try_from(self.consumed_total).ok()?,
            last_event_cursor: self.last_event_cursor.clone(),
            version: u64::try_from(self.version).ok()?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

/// Row of the `credit_consumption` table
#[derive(Debug, Clone, FromRow)]
pub struct StoredConsumptionRecord {
    pub id: String,
    pub scope: String,
    pub period: String,
    pub delta: i64,
    pub event_cursor: Option<String>,
    pub consumed_total_after: i64,
    pub applied_at: String,
}

impl StoredConsumptionRecord {
    pub fn to_consumption_record(&self) -> Option<ConsumptionRecord> {
        Some(ConsumptionRecord {
            id: self.id.clone(),
            scope: self.scope.clone(),
            period: PeriodId::new(self.period.clone()),
            delta: u64::try_from(self.delta).ok()?,
            event_cursor: self.event_cursor.clone(),
            consumed_total_after: u64::try_from(self.consumed_total_after).ok()?,
            applied_at: parse_datetime(&self.applied_at)?,
        })
    }
}

/// Parse datetime string (supports both RFC3339 and NaiveDateTime formats)
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }

    log::warn!("[credits:sqlite] Failed to parse datetime: {}", s);
    None
}

fn to_i64(value: u64, what: &str) -> Result<i64, LedgerError> {
    i64::try_from(value)
        .map_err(|_| LedgerError::invalid_input(format!("{} {} exceeds storage range", what, value)))
}

/// SQLITE_BUSY / SQLITE_LOCKED, including their extended codes
fn is_busy(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .and_then(|code| code.parse::<i32>().ok())
        .map_or(false, |code| matches!(code & 0xff, 5 | 6))
}

// ============================================================================
// SqliteLedgerStore
// ============================================================================

/// Ledger store backed by SQLite
///
/// The revision check is an `UPDATE ... WHERE version = ?` inside the same
/// transaction as the consumption insert, so two writers that loaded the same
/// revision cannot both commit.
///
/// Saves are bounded by SQLite's own busy timeout rather than by cancelling
/// the future: a save that reports an error has been rolled back.
#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
    write_timeout: Duration,
}

impl SqliteLedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_timeout: Duration::from_millis(DEFAULT_PERSISTENCE_TIMEOUT_MS),
        }
    }

    /// Limit how long a save waits for a connection and for write locks
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    fn write_error(&self, context: &str, err: sqlx::Error) -> LedgerError {
        if is_busy(&err) {
            log::warn!(
                "[credits:sqlite] {}: database stayed locked for {}ms",
                context,
                self.write_timeout.as_millis()
            );
            LedgerError::Timeout(self.write_timeout)
        } else {
            LedgerError::persistence(format!("{}: {}", context, err))
        }
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self, scope: &str) -> Result<Option<LedgerState>, LedgerError> {
        let row = sqlx::query_as::<_, StoredLedgerState>(
            r#"
            SELECT scope, period, consumed_total, last_event_cursor, version, updated_at
            FROM credit_ledgers
            WHERE scope = ?
            "#,
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(row) => row.to_ledger_state().map(Some).ok_or_else(|| {
                LedgerError::persistence(format!("Corrupt ledger row for scope {}", scope))
            }),
        }
    }

    async fn save(
        &self,
        scope: &str,
        expected_version: u64,
        state: &LedgerState,
        record: &ConsumptionRecord,
    ) -> Result<SaveOutcome, LedgerError> {
        let consumed_total = to_i64(state.consumed_total, "consumed total")?;
        let version = to_i64(state.version, "version")?;
        let expected = to_i64(expected_version, "version")?;
        let updated_at = state.updated_at.to_rfc3339();

        // Acquiring has no side effects, so it may be cancelled
        let mut conn = tokio::time::timeout(self.write_timeout, self.pool.acquire())
            .await
            .map_err(|_| LedgerError::Timeout(self.write_timeout))??;

        sqlx::query(&format!("PRAGMA busy_timeout = {}", self.write_timeout.as_millis()))
            .execute(&mut *conn)
            .await
            .map_err(|e| self.write_error("Failed to set busy timeout", e))?;

        let mut tx = conn
            .begin()
            .await
            .map_err(|e| self.write_error("Failed to begin transaction", e))?;

        let written = if expected_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO credit_ledgers
                (scope, period, consumed_total, last_event_cursor, version, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(scope) DO NOTHING
                "#,
            )
            .bind(scope)
            .bind(state.period.as_str())
            .bind(consumed_total)
            .bind(&state.last_event_cursor)
            .bind(version)
            .bind(&updated_at)
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE credit_ledgers
                SET period = ?, consumed_total = ?, last_event_cursor = ?,
                    version = ?, updated_at = ?
                WHERE scope = ? AND version = ?
                "#,
            )
            .bind(state.period.as_str())
            .bind(consumed_total)
            .bind(&state.last_event_cursor)
            .bind(version)
            .bind(&updated_at)
            .bind(scope)
            .bind(expected)
            .execute(&mut *tx)
            .await
        }
        .map_err(|e| self.write_error("Failed to save ledger", e))?
        .rows_affected();

        if written == 0 {
            log::debug!(
                "[credits:sqlite] Revision conflict for scope {} (expected version {})",
                scope,
                expected_version
            );
            tx.rollback()
                .await
                .map_err(|e| self.write_error("Failed to roll back", e))?;
            return Ok(SaveOutcome::Conflict);
        }

        sqlx::query(
            r#"
            INSERT INTO credit_consumption
            (id, scope, period, delta, event_cursor, consumed_total_after, applied_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.scope)
        .bind(record.period.as_str())
        .bind(to_i64(record.delta, "delta")?)
        .bind(&record.event_cursor)
        .bind(to_i64(record.consumed_total_after, "consumed total")?)
        .bind(record.applied_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| self.write_error("Failed to save consumption record", e))?;

        // A failed COMMIT leaves the transaction open; dropping it rolls back
        tx.commit()
            .await
            .map_err(|e| self.write_error("Failed to commit ledger", e))?;

        Ok(SaveOutcome::Saved)
    }

    async fn records(
        &self,
        scope: &str,
        period: Option<&PeriodId>,
    ) -> Result<Vec<ConsumptionRecord>, LedgerError> {
        let rows = if let Some(period) = period {
            sqlx::query_as::<_, StoredConsumptionRecord>(
                r#"
                SELECT id, scope, period, delta, event_cursor, consumed_total_after, applied_at
                FROM credit_consumption
                WHERE scope = ? AND period = ?
                ORDER BY applied_at ASC, consumed_total_after ASC
                "#,
            )
            .bind(scope)
            .bind(period.as_str())
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, StoredConsumptionRecord>(
                r#"
                SELECT id, scope, period, delta, event_cursor, consumed_total_after, applied_at
                FROM credit_consumption
                WHERE scope = ?
                ORDER BY applied_at ASC, consumed_total_after ASC
                "#,
            )
            .bind(scope)
            .fetch_all(&self.pool)
            .await
        }?;

        let records = rows
            .iter()
            .map(|row| {
                row.to_consumption_record().ok_or_else(|| {
                    LedgerError::persistence(format!(
                        "Corrupt consumption record {} for scope {}",
                        row.id, scope
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!(
            "[credits:sqlite] Found {} consumption records for scope {}",
            records.len(),
            scope
        );

        Ok(records)
    }
}

// ============================================================================
// Tests
// ============================================================================
