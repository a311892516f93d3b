//! Mapping between `data_records` rows and [`DataRecord`].

use std::error::Error;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

use surv_core::record::{Actor, DataRecord, RecordKey, RecordParts};

/// Column list shared by every record SELECT, in [`record_from_row`] order.
pub(crate) const RECORD_COLUMNS: &str = "id, indicator, period, entity, numerator, denominator, \
     source, created_on, created_by, updated_on, updated_by, \
     validation_status, validated_on, validated_by, arrival_status";

fn conversion_failure(
    idx: usize,
    err: impl Into<Box<dyn Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Into<Box<dyn Error + Send + Sync>>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_failure(idx, e))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| conversion_failure(idx, e))
    })
    .transpose()
}

fn required_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    timestamp(row, idx)?.ok_or_else(|| conversion_failure(idx, "missing timestamp"))
}

pub(crate) fn record_from_row(row: &Row<'_>) -> rusqlite::Result<DataRecord> {
    Ok(DataRecord::from_parts(RecordParts {
        id: row.get(0)?,
        key: RecordKey {
            indicator: row.get(1)?,
            period: parsed(row, 2)?,
            entity: row.get(3)?,
        },
        numerator: row.get(4)?,
        denominator: row.get(5)?,
        source: parsed(row, 6)?,
        created_on: required_timestamp(row, 7)?,
        created_by: Actor::new(row.get::<_, String>(8)?),
        updated_on: timestamp(row, 9)?,
        updated_by: row.get::<_, Option<String>>(10)?.map(Actor::new),
        validation_status: parsed(row, 11)?,
        validated_on: timestamp(row, 12)?,
        validated_by: row.get::<_, Option<String>>(13)?.map(Actor::new),
        arrival_status: parsed(row, 14)?,
    }))
}

/// Insert a new record and return its rowid. The record's own id is ignored.
pub(crate) fn insert_record(conn: &Connection, record: &DataRecord) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO data_records
        (indicator, period, entity, numerator, denominator, source,
         created_on, created_by, updated_on, updated_by,
         validation_status, validated_on, validated_by, arrival_status)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            record.indicator(),
            record.period().strid(),
            record.entity(),
            record.numerator(),
            record.denominator(),
            record.source().as_str(),
            record.created_on().to_rfc3339(),
            record.created_by().as_str(),
            record.updated_on().map(|d| d.to_rfc3339()),
            record.updated_by().map(Actor::as_str),
            record.validation_status().as_str(),
            record.validated_on().map(|d| d.to_rfc3339()),
            record.validated_by().map(Actor::as_str),
            record.arrival_status().as_str(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Persist every mutable column. Key, creation stamp and arrival status
/// never change after insert.
pub(crate) fn update_record(conn: &Connection, record: &DataRecord) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE data_records SET
            numerator = ?2, denominator = ?3, source = ?4,
            updated_on = ?5, updated_by = ?6,
            validation_status = ?7, validated_on = ?8, validated_by = ?9
         WHERE id = ?1",
        params![
            record.id(),
            record.numerator(),
            record.denominator(),
            record.source().as_str(),
            record.updated_on().map(|d| d.to_rfc3339()),
            record.updated_by().map(Actor::as_str),
            record.validation_status().as_str(),
            record.validated_on().map(|d| d.to_rfc3339()),
            record.validated_by().map(Actor::as_str),
        ],
    )?;
    Ok(())
}

/// `?, ?, ?` with `n` placeholders.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
