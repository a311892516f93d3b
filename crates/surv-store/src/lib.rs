//! # surv-store
//!
//! SQLite relational store for surv.
//!
//! Holds the authoritative state:
//! - `periods`: each distinct (year, month) referenced so far
//! - `indicators`: indicator definitions, keyed by slug
//! - `data_records`: one row per (indicator, period, entity), enforced by a
//!   unique constraint
//!
//! Writes go through [`RecordStore::batch_ingest`] (submissions) and the
//! review operations in [`review`]; the aggregation engine reads through
//! [`RecordStore::count_arrivals`] and [`RecordStore::records_for`].

pub mod ingest;
pub mod review;
mod rows;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use surv_core::error::{Result, SurvError};
use surv_core::indicator::Indicator;
use surv_core::period::{Period, PeriodBounds};
use surv_core::record::{ArrivalStatus, DataRecord, RecordKey, ValidationStatus};

pub use ingest::{IngestOptions, IngestOutcome, IngestReport, IngestedRow};
pub use review::AutoValidationReport;

use rows::{placeholders, record_from_row, RECORD_COLUMNS};

pub(crate) fn store_err(e: rusqlite::Error) -> SurvError {
    SurvError::Store(e.to_string())
}

/// The RecordStore manages the SQLite records database.
pub struct RecordStore {
    conn: Connection,
    bounds: PeriodBounds,
}

/// Arrival counts over a set of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArrivalCounts {
    /// Records counting toward completeness.
    pub arrived: u64,
    /// The subset that arrived on time.
    pub prompt: u64,
}

impl RecordStore {
    /// Open or create a records database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Store`] if the database cannot be opened.
    pub fn open(path: &Path, bounds: PeriodBounds) -> Result<Self> {
        let conn = Connection::open(path).map_err(store_err)?;
        let store = Self { conn, bounds };
        store.create_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Store`] if schema creation fails.
    pub fn in_memory(bounds: PeriodBounds) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        let store = Self { conn, bounds };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS periods (
                id TEXT PRIMARY KEY,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                UNIQUE (year, month)
            );

            CREATE TABLE IF NOT EXISTS indicators (
                slug TEXT PRIMARY KEY,
                number TEXT NOT NULL UNIQUE,
                definition TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS data_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                indicator TEXT NOT NULL REFERENCES indicators(slug),
                period TEXT NOT NULL REFERENCES periods(id),
                entity TEXT NOT NULL,
                numerator REAL NOT NULL,
                denominator REAL NOT NULL,
                source TEXT NOT NULL,
                created_on TEXT NOT NULL,
                created_by TEXT NOT NULL,
                updated_on TEXT,
                updated_by TEXT,
                validation_status TEXT NOT NULL DEFAULT 'not_validated',
                validated_on TEXT,
                validated_by TEXT,
                arrival_status TEXT NOT NULL,
                UNIQUE (indicator, period, entity)
            );

            CREATE INDEX IF NOT EXISTS idx_records_indicator_period
                ON data_records(indicator, period);
            CREATE INDEX IF NOT EXISTS idx_records_validation
                ON data_records(validation_status);
            ",
            )
            .map_err(store_err)?;

        Ok(())
    }

    #[must_use]
    pub fn bounds(&self) -> PeriodBounds {
        self.bounds
    }

    // === Periods ===

    /// The period for (year, month), persisted on first reference.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Period`] outside the configured bounds, or
    /// [`SurvError::Store`] if the insert fails.
    pub fn get_or_create_period(&self, year: i32, month: u32) -> Result<Period> {
        let period = self.bounds.period(year, month)?;
        ensure_period(&self.conn, &period).map_err(store_err)?;
        Ok(period)
    }

    /// Every persisted period, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Store`] if the query fails.
    pub fn periods(&self) -> Result<Vec<Period>> {
        let mut stmt = self
            .conn
            .prepare("SELECT year, month FROM periods ORDER BY year, month")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i32>(0)?, row.get::<_, u32>(1)?)))
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)?;

        rows.into_iter()
            .map(|(year, month)| self.bounds.period(year, month).map_err(SurvError::from))
            .collect()
    }

    /// From the first persisted period to the one containing `now`.
    /// Empty when no period was ever referenced.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Period`] if `now` is out of bounds.
    pub fn all_periods_till(&self, now: DateTime<Utc>) -> Result<Vec<Period>> {
        let Some(first) = self.periods()?.into_iter().next() else {
            return Ok(Vec::new());
        };
        let current = self.bounds.current(now)?;
        if first > current {
            return Ok(Vec::new());
        }
        Ok(self.bounds.all_from(first, current)?)
    }

    // === Indicators ===

    /// Insert or replace an indicator definition.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Store`] if the write fails (e.g. a number
    /// already used by another slug).
    pub fn upsert_indicator(&self, indicator: &Indicator) -> Result<()> {
        let definition = serde_json::to_string(indicator)
            .map_err(|e| SurvError::Serialization(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO indicators (slug, number, definition) VALUES (?1, ?2, ?3)
                 ON CONFLICT(slug) DO UPDATE SET number = excluded.number,
                                                 definition = excluded.definition",
                params![indicator.slug, indicator.number, definition],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`SurvError::Store`] or [`SurvError::Serialization`].
    pub fn indicator(&self, slug: &str) -> Result<Option<Indicator>> {
        let definition: Option<String> = self
            .conn
            .query_row(
                "SELECT definition FROM indicators WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)?;
        definition.map(|d| parse_indicator(&d)).transpose()
    }

    /// Like [`indicator`](Self::indicator) but missing is an error.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::NotFound`] for an unknown slug.
    pub fn require_indicator(&self, slug: &str) -> Result<Indicator> {
        self.indicator(slug)?
            .ok_or_else(|| SurvError::NotFound(format!("indicator '{slug}'")))
    }

    /// All indicators, ordered by number.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Store`] or [`SurvError::Serialization`].
    pub fn indicators(&self) -> Result<Vec<Indicator>> {
        let mut stmt = self
            .conn
            .prepare("SELECT definition FROM indicators ORDER BY number")
            .map_err(store_err)?;
        let definitions = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)?;
        definitions.iter().map(|d| parse_indicator(d)).collect()
    }

    /// Indicators collected routinely; the set averaged on dashboards.
    ///
    /// # Errors
    ///
    /// See [`indicators`](Self::indicators).
    pub fn routine_indicators(&self) -> Result<Vec<Indicator>> {
        Ok(self
            .indicators()?
            .into_iter()
            .filter(Indicator::is_routine)
            .collect())
    }

    pub(crate) fn indicator_map(&self) -> Result<HashMap<String, Indicator>> {
        Ok(self
            .indicators()?
            .into_iter()
            .map(|i| (i.slug.clone(), i))
            .collect())
    }

    // === Records ===

    /// # Errors
    ///
    /// Returns [`SurvError::Store`] if the query fails.
    pub fn record(&self, id: i64) -> Result<Option<DataRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM data_records WHERE id = ?1"),
                params![id],
                record_from_row,
            )
            .optional()
            .map_err(store_err)
    }

    /// Like [`record`](Self::record) but missing is an error.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::NotFound`] for an unknown id.
    pub fn require_record(&self, id: i64) -> Result<DataRecord> {
        self.record(id)?
            .ok_or_else(|| SurvError::NotFound(format!("data record #{id}")))
    }

    /// # Errors
    ///
    /// Returns [`SurvError::Store`] if the query fails.
    pub fn record_by_key(&self, key: &RecordKey) -> Result<Option<DataRecord>> {
        find_by_key(&self.conn, key).map_err(store_err)
    }

    /// Total number of records, whatever their status.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Store`] if the query fails.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM data_records", [], |row| row.get(0))
            .map_err(store_err)?;
        Ok(count as u64)
    }

    /// Records in a given validation status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Store`] if the query fails.
    pub fn records_with_status(&self, status: ValidationStatus) -> Result<Vec<DataRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM data_records
                 WHERE validation_status = ?1 ORDER BY id"
            ))
            .map_err(store_err)?;
        let records = stmt
            .query_map(params![status.as_str()], record_from_row)
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(records)
    }

    /// Count valid records of `indicator` for any of `periods` at any of
    /// `entities`, and how many of them arrived on time.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Store`] if the query fails.
    pub fn count_arrivals(
        &self,
        indicator: &str,
        periods: &[Period],
        entities: &[&str],
    ) -> Result<ArrivalCounts> {
        if periods.is_empty() || entities.is_empty() {
            return Ok(ArrivalCounts::default());
        }
        let (filter, values) = valid_records_filter(indicator, periods, entities);
        let sql = format!(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN arrival_status = '{}' THEN 1 ELSE 0 END), 0)
             FROM data_records WHERE {filter}",
            ArrivalStatus::OnTime.as_str()
        );
        self.conn
            .query_row(&sql, params_from_iter(values.iter()), |row| {
                let arrived: i64 = row.get(0)?;
                let prompt: i64 = row.get(1)?;
                Ok(ArrivalCounts {
                    arrived: arrived as u64,
                    prompt: prompt as u64,
                })
            })
            .map_err(store_err)
    }

    /// Valid records of `indicator` for `periods` at `entities`, ordered by
    /// period then entity.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Store`] if the query fails.
    pub fn records_for(
        &self,
        indicator: &str,
        periods: &[Period],
        entities: &[&str],
    ) -> Result<Vec<DataRecord>> {
        if periods.is_empty() || entities.is_empty() {
            return Ok(Vec::new());
        }
        let (filter, values) = valid_records_filter(indicator, periods, entities);
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM data_records WHERE {filter}
                 ORDER BY period, entity"
            ))
            .map_err(store_err)?;
        let records = stmt
            .query_map(params_from_iter(values.iter()), record_from_row)
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(records)
    }
}

fn parse_indicator(definition: &str) -> Result<Indicator> {
    serde_json::from_str(definition).map_err(|e| SurvError::Serialization(e.to_string()))
}

/// WHERE clause and bound values selecting records that count toward
/// completeness.
fn valid_records_filter(
    indicator: &str,
    periods: &[Period],
    entities: &[&str],
) -> (String, Vec<String>) {
    let statuses = ValidationStatus::VALID;
    let filter = format!(
        "indicator = ? AND validation_status IN ({}) AND period IN ({}) AND entity IN ({})",
        placeholders(statuses.len()),
        placeholders(periods.len()),
        placeholders(entities.len()),
    );
    let values = std::iter::once(indicator.to_string())
        .chain(statuses.iter().map(|s| s.as_str().to_string()))
        .chain(periods.iter().map(Period::strid))
        .chain(entities.iter().map(|e| (*e).to_string()))
        .collect();
    (filter, values)
}

pub(crate) fn ensure_period(conn: &Connection, period: &Period) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO periods (id, year, month) VALUES (?1, ?2, ?3)",
        params![period.strid(), period.year(), period.month()],
    )?;
    Ok(())
}

pub(crate) fn find_by_key(
    conn: &Connection,
    key: &RecordKey,
) -> rusqlite::Result<Option<DataRecord>> {
    conn.query_row(
        &format!(
            "SELECT {RECORD_COLUMNS} FROM data_records
             WHERE indicator = ?1 AND period = ?2 AND entity = ?3"
        ),
        params![key.indicator, key.period.strid(), key.entity],
        record_from_row,
    )
    .optional()
}
