//! Batch ingestion: the single write path for manual uploads and the
//! automated feed.
//!
//! Each submission is compared against the stored record for its
//! (indicator, period, entity) triple:
//!
//! | stored         | incoming values | result                                   |
//! |----------------|-----------------|------------------------------------------|
//! | none           | any             | `Created`, arrival status computed        |
//! | any            | identical       | `Unchanged`, or `Touched` on upload→feed |
//! | feed-sourced   | differ (upload) | `Protected`, upload discarded            |
//! | otherwise      | differ          | `Updated`, validation reset              |
//!
//! A whole batch runs in one transaction.

use chrono::{DateTime, Utc};
use rusqlite::ErrorCode;
use serde::Serialize;
use tracing::{debug, info, warn};

use surv_core::error::{Result, SurvError};
use surv_core::hierarchy::Hierarchy;
use surv_core::indicator::Indicator;
use surv_core::record::{Actor, DataRecord, RecordKey, Source};
use surv_core::submission::{RowError, Submission, SubmissionCheck, SubmissionRow};

use crate::rows::{insert_record, update_record};
use crate::{ensure_period, find_by_key, store_err, RecordStore};

/// Who submits, how, and when.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub actor: Actor,
    pub source: Source,
    /// Auto-validate records created by this batch.
    pub auto_validate: bool,
    pub now: DateTime<Utc>,
}

impl IngestOptions {
    /// A manual upload by `actor`.
    #[must_use]
    pub fn upload(actor: Actor, now: DateTime<Utc>) -> Self {
        Self {
            actor,
            source: Source::Upload,
            auto_validate: false,
            now,
        }
    }

    /// An automated feed import by the reserved feed actor.
    #[must_use]
    pub fn feed(now: DateTime<Utc>) -> Self {
        Self {
            actor: Actor::feed_bot(),
            source: Source::Feed,
            auto_validate: false,
            now,
        }
    }

    #[must_use]
    pub fn auto_validated(mut self) -> Self {
        self.auto_validate = true;
        self
    }
}

/// What happened to one submission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Created,
    Updated {
        previous_numerator: f64,
        previous_denominator: f64,
    },
    /// Identical values; only the audit stamp and source moved.
    Touched,
    Unchanged,
    /// A manual upload differing from feed-sourced data; discarded.
    Protected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestedRow {
    pub ident: String,
    pub record_id: i64,
    pub key: RecordKey,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

/// Per-row results of one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub rows: Vec<IngestedRow>,
    pub errors: Vec<RowError>,
}

impl IngestReport {
    fn count(&self, pred: impl Fn(&IngestOutcome) -> bool) -> usize {
        self.rows.iter().filter(|r| pred(&r.outcome)).count()
    }

    #[must_use]
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Created))
    }

    #[must_use]
    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Updated { .. }))
    }

    #[must_use]
    pub fn touched(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Touched))
    }

    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Unchanged))
    }

    #[must_use]
    pub fn protected(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Protected))
    }

    /// True when nothing was written.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.rows
            .iter()
            .all(|r| matches!(r.outcome, IngestOutcome::Unchanged | IngestOutcome::Protected))
    }
}

/// Decide how a submission applies to the stored record.
fn apply_to_existing(
    record: &mut DataRecord,
    submission: &Submission,
    options: &IngestOptions,
) -> IngestOutcome {
    if record.has_same_values(submission.numerator, submission.denominator) {
        if options.source == Source::Feed && record.source() == Source::Upload {
            record.confirm(options.now, options.actor.clone(), options.source);
            return IngestOutcome::Touched;
        }
        return IngestOutcome::Unchanged;
    }

    if record.source().is_automated() && options.source == Source::Upload {
        return IngestOutcome::Protected;
    }

    let outcome = IngestOutcome::Updated {
        previous_numerator: record.numerator(),
        previous_denominator: record.denominator(),
    };
    record.resubmit(
        options.now,
        options.actor.clone(),
        submission.numerator,
        submission.denominator,
        options.source,
    );
    outcome
}

fn new_record(
    submission: &Submission,
    indicator: &Indicator,
    options: &IngestOptions,
) -> Result<DataRecord> {
    let arrival = indicator.arrival_status_on(options.now, &submission.key.period);
    let mut record = DataRecord::created(
        0,
        submission.key.clone(),
        submission.numerator,
        submission.denominator,
        options.source,
        arrival,
        options.now,
        options.actor.clone(),
    );
    if options.auto_validate {
        record.auto_validate_on_receipt(options.now)?;
    }
    Ok(record)
}

/// Insert a record for a key found missing. If another writer created the
/// triple since the lookup, the stored row takes the update path instead.
fn insert_or_apply(
    conn: &rusqlite::Connection,
    submission: &Submission,
    indicator: &Indicator,
    options: &IngestOptions,
) -> Result<(i64, IngestOutcome)> {
    let record = new_record(submission, indicator, options)?;
    match insert_record(conn, &record) {
        Ok(id) => Ok((id, IngestOutcome::Created)),
        Err(e) if is_unique_violation(&e) => {
            debug!(key = %submission.key, "created concurrently; updating instead");
            let record = find_by_key(conn, &submission.key)
                .map_err(store_err)?
                .ok_or_else(|| store_err(e))?;
            apply_existing(conn, record, submission, options)
        }
        Err(e) => Err(store_err(e)),
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

impl RecordStore {
    /// Apply checked submissions in one transaction.
    ///
    /// Either every submission is applied or none is.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::NotFound`] if a submission names an indicator
    /// missing from the store, or [`SurvError::Store`] on database failure.
    pub fn batch_ingest(
        &mut self,
        submissions: &[Submission],
        options: &IngestOptions,
    ) -> Result<IngestReport> {
        let indicators = self.indicator_map()?;
        let tx = self.conn.transaction().map_err(store_err)?;
        let mut report = IngestReport::default();

        for submission in submissions {
            let indicator = indicators.get(&submission.key.indicator).ok_or_else(|| {
                SurvError::NotFound(format!("indicator '{}'", submission.key.indicator))
            })?;
            ensure_period(&tx, &submission.key.period).map_err(store_err)?;

            let existing = find_by_key(&tx, &submission.key).map_err(store_err)?;
            let (record_id, outcome) = match existing {
                Some(record) => apply_existing(&tx, record, submission, options)?,
                None => insert_or_apply(&tx, submission, indicator, options)?,
            };

            debug!(key = %submission.key, ?outcome, "ingested submission");
            if outcome == IngestOutcome::Protected {
                warn!(
                    key = %submission.key,
                    "manual upload differs from feed data; kept the feed values"
                );
            }
            report.rows.push(IngestedRow {
                ident: submission.ident.clone(),
                record_id,
                key: submission.key.clone(),
                outcome,
            });
        }

        tx.commit().map_err(store_err)?;
        info!(
            created = report.created(),
            updated = report.updated(),
            touched = report.touched(),
            unchanged = report.unchanged(),
            protected = report.protected(),
            "batch ingested"
        );
        Ok(report)
    }

    /// Check raw rows against the stored indicators and `hierarchy`, then
    /// ingest the rows that passed. Row errors are reported, not raised.
    ///
    /// # Errors
    ///
    /// See [`batch_ingest`](Self::batch_ingest).
    pub fn ingest<H: Hierarchy + ?Sized>(
        &mut self,
        rows: Vec<SubmissionRow>,
        hierarchy: &H,
        options: &IngestOptions,
    ) -> Result<IngestReport> {
        let indicators = self.indicators()?;
        let checked =
            SubmissionCheck::new(&indicators, hierarchy, self.bounds, options.source, options.now)
                .check(rows);
        for error in &checked.errors {
            warn!(ident = %error.ident, kind = ?error.kind, "{}", error.message);
        }

        let mut report = self.batch_ingest(&checked.submissions, options)?;
        report.errors = checked.errors;
        Ok(report)
    }
}

fn apply_existing(
    conn: &rusqlite::Connection,
    mut record: DataRecord,
    submission: &Submission,
    options: &IngestOptions,
) -> Result<(i64, IngestOutcome)> {
    let outcome = apply_to_existing(&mut record, submission, options);
    if matches!(
        outcome,
        IngestOutcome::Updated { .. } | IngestOutcome::Touched
    ) {
        update_record(conn, &record).map_err(store_err)?;
    }
    Ok((record.id(), outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{make_indicator, store_with, utc};
    use surv_core::hierarchy::{Entity, EntityTree, Level};
    use surv_core::indicator::Origin;
    use surv_core::period::PeriodBounds;
    use surv_core::record::{ArrivalStatus, ValidationStatus};
    use surv_core::submission::{RawValue, RowErrorKind};

    fn tree() -> EntityTree {
        let entity = |id: &str, level: Level, parent: Option<&str>| Entity {
            id: id.to_string(),
            name: id.to_string(),
            level,
            parent: parent.map(str::to_string),
            code: None,
        };
        EntityTree::new(vec![
            entity("rdc", Level::Country, None),
            entity("kinshasa", Level::Province, Some("rdc")),
            entity("gombe", Level::Zone, Some("kinshasa")),
            entity("limete", Level::Zone, Some("kinshasa")),
        ])
        .unwrap()
    }

    fn row(entity: &str, numerator: &str, denominator: &str) -> SubmissionRow {
        SubmissionRow {
            ident: None,
            indicator: "malaria-cases".to_string(),
            period: "2023-04".to_string(),
            entity: entity.to_string(),
            numerator: Some(RawValue::Text(numerator.to_string())),
            denominator: Some(RawValue::Text(denominator.to_string())),
        }
    }

    fn store() -> RecordStore {
        store_with(&[make_indicator("malaria-cases", "01", Origin::Manual)])
    }

    fn upload(day: u32) -> IngestOptions {
        IngestOptions::upload(Actor::new("partner-1"), utc(2023, 5, day))
    }

    #[test]
    fn creates_records_with_arrival_status_from_submission_date() {
        let mut store = store();
        let report = store
            .ingest(vec![row("gombe", "30", "120")], &tree(), &upload(10))
            .unwrap();
        assert_eq!(report.created(), 1);

        let record = store.require_record(report.rows[0].record_id).unwrap();
        assert_eq!(record.arrival_status(), ArrivalStatus::OnTime);
        assert_eq!(record.validation_status(), ValidationStatus::NotValidated);
        assert_eq!(record.source(), Source::Upload);
        assert_eq!(record.created_by(), &Actor::new("partner-1"));

        let late = store
            .ingest(vec![row("limete", "10", "50")], &tree(), &upload(20))
            .unwrap();
        let record = store.require_record(late.rows[0].record_id).unwrap();
        assert_eq!(record.arrival_status(), ArrivalStatus::Late);
    }

    #[test]
    fn reingesting_identical_values_is_a_noop() {
        let mut store = store();
        let rows = vec![row("gombe", "30", "120"), row("limete", "10", "50")];
        store.ingest(rows.clone(), &tree(), &upload(10)).unwrap();
        let before: Vec<DataRecord> = (1..=2).map(|id| store.require_record(id).unwrap()).collect();

        let report = store.ingest(rows, &tree(), &upload(12)).unwrap();
        assert_eq!(report.unchanged(), 2);
        assert!(report.is_noop());
        assert_eq!(store.count().unwrap(), 2);

        let after: Vec<DataRecord> = (1..=2).map(|id| store.require_record(id).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn differing_values_update_and_reset_validation() {
        let mut store = store();
        let report = store
            .ingest(vec![row("gombe", "30", "120")], &tree(), &upload(10))
            .unwrap();
        let id = report.rows[0].record_id;
        store
            .validate_record(id, Actor::new("reviewer"), utc(2023, 5, 11))
            .unwrap();

        let report = store
            .ingest(vec![row("gombe", "32", "120")], &tree(), &upload(12))
            .unwrap();
        assert_eq!(
            report.rows[0].outcome,
            IngestOutcome::Updated {
                previous_numerator: 30.0,
                previous_denominator: 120.0
            }
        );

        let record = store.require_record(id).unwrap();
        assert_eq!(record.numerator(), 32.0);
        assert_eq!(record.validation_status(), ValidationStatus::NotValidated);
        assert_eq!(record.updated_on(), Some(utc(2023, 5, 12)));
        // Arrival status is fixed at creation.
        assert_eq!(record.arrival_status(), ArrivalStatus::OnTime);
    }

    #[test]
    fn manual_upload_never_overwrites_feed_data() {
        let mut store = store();
        let feed = IngestOptions::feed(utc(2023, 5, 3));
        store
            .ingest(vec![row("gombe", "30", "120")], &tree(), &feed)
            .unwrap();

        let report = store
            .ingest(vec![row("gombe", "99", "120")], &tree(), &upload(10))
            .unwrap();
        assert_eq!(report.protected(), 1);

        let record = store.require_record(report.rows[0].record_id).unwrap();
        assert_eq!(record.numerator(), 30.0);
        assert_eq!(record.source(), Source::Feed);
        assert_eq!(record.created_by(), &Actor::feed_bot());
    }

    #[test]
    fn feed_confirming_upload_moves_stamp_and_keeps_validation() {
        let mut store = store();
        let report = store
            .ingest(vec![row("gombe", "30", "120")], &tree(), &upload(10))
            .unwrap();
        let id = report.rows[0].record_id;
        store
            .validate_record(id, Actor::new("reviewer"), utc(2023, 5, 11))
            .unwrap();

        let feed = IngestOptions::feed(utc(2023, 5, 14));
        let report = store
            .ingest(vec![row("gombe", "30", "120")], &tree(), &feed)
            .unwrap();
        assert_eq!(report.touched(), 1);

        let record = store.require_record(id).unwrap();
        assert_eq!(record.source(), Source::Feed);
        assert_eq!(record.validation_status(), ValidationStatus::Validated);
        assert_eq!(record.updated_by(), Some(&Actor::feed_bot()));
    }

    #[test]
    fn feed_updates_its_own_records() {
        let mut store = store();
        store
            .ingest(vec![row("gombe", "30", "120")], &tree(), &IngestOptions::feed(utc(2023, 5, 3)))
            .unwrap();
        let report = store
            .ingest(vec![row("gombe", "31", "120")], &tree(), &IngestOptions::feed(utc(2023, 5, 4)))
            .unwrap();
        assert_eq!(report.updated(), 1);
    }

    #[test]
    fn zero_denominator_row_does_not_block_the_batch() {
        let mut store = store();
        let report = store
            .ingest(
                vec![row("gombe", "30", "0"), row("limete", "10", "50")],
                &tree(),
                &upload(10),
            )
            .unwrap();

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, RowErrorKind::ZeroDenominator);
        assert_eq!(report.errors[0].ident, "row-1");
        assert_eq!(report.created(), 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn auto_validate_option_validates_new_records_on_receipt() {
        let mut store = store();
        let report = store
            .ingest(
                vec![row("gombe", "30", "120")],
                &tree(),
                &IngestOptions::feed(utc(2023, 5, 3)).auto_validated(),
            )
            .unwrap();
        let record = store.require_record(report.rows[0].record_id).unwrap();
        assert_eq!(record.validation_status(), ValidationStatus::AutoValidated);
        assert!(record.is_auto_validated());
    }

    #[test]
    fn unknown_indicator_in_checked_batch_rolls_back_everything() {
        let mut store = store();
        let period = store.bounds().period(2023, 4).unwrap();
        let submission = |indicator: &str, entity: &str| Submission {
            ident: entity.to_string(),
            key: RecordKey {
                indicator: indicator.to_string(),
                period,
                entity: entity.to_string(),
            },
            numerator: 1.0,
            denominator: 2.0,
        };

        let err = store
            .batch_ingest(
                &[submission("malaria-cases", "gombe"), submission("ghost", "limete")],
                &upload(10),
            )
            .unwrap_err();
        assert!(matches!(err, SurvError::NotFound(_)));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn ingest_persists_referenced_periods() {
        let mut store = store();
        store
            .ingest(vec![row("gombe", "30", "120")], &tree(), &upload(10))
            .unwrap();
        let ids: Vec<String> = store.periods().unwrap().iter().map(|p| p.strid()).collect();
        assert_eq!(ids, vec!["2023-04"]);
    }

    #[test]
    fn manual_upload_never_overwrites_aggregated_data() {
        let mut store = store();
        let aggregation = IngestOptions {
            source: Source::Aggregation,
            ..IngestOptions::feed(utc(2023, 5, 3))
        };
        store
            .ingest(vec![row("gombe", "30", "120")], &tree(), &aggregation)
            .unwrap();

        let report = store
            .ingest(vec![row("gombe", "99", "120")], &tree(), &upload(10))
            .unwrap();
        assert_eq!(report.protected(), 1);
        let record = store.require_record(report.rows[0].record_id).unwrap();
        assert_eq!(record.numerator(), 30.0);
        assert_eq!(record.source(), Source::Aggregation);
    }

    #[test]
    fn insert_losing_to_another_writer_takes_the_update_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("surv.db");
        let indicator = make_indicator("malaria-cases", "01", Origin::Manual);

        let mut first = RecordStore::open(&path, PeriodBounds::default()).unwrap();
        first.upsert_indicator(&indicator).unwrap();
        let second = RecordStore::open(&path, PeriodBounds::default()).unwrap();

        let period = first.bounds().period(2023, 4).unwrap();
        let submission = |numerator: f64| Submission {
            ident: "gombe".to_string(),
            key: RecordKey {
                indicator: "malaria-cases".to_string(),
                period,
                entity: "gombe".to_string(),
            },
            numerator,
            denominator: 120.0,
        };

        // The second writer looked the key up before the first one committed.
        let created = first.batch_ingest(&[submission(30.0)], &upload(10)).unwrap();
        let (id, outcome) =
            insert_or_apply(&second.conn, &submission(32.0), &indicator, &upload(12)).unwrap();

        assert_eq!(id, created.rows[0].record_id);
        assert_eq!(
            outcome,
            IngestOutcome::Updated {
                previous_numerator: 30.0,
                previous_denominator: 120.0
            }
        );
        assert_eq!(first.count().unwrap(), 1);
        assert_eq!(first.require_record(id).unwrap().numerator(), 32.0);
    }
}
