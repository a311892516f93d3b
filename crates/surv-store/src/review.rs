//! Reviewer transitions and the deadline-driven auto-validation sweep.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use surv_core::error::{Result, TransitionError};
use surv_core::indicator::Origin;
use surv_core::record::{Actor, DataRecord, ValidationStatus};

use crate::rows::update_record;
use crate::{store_err, RecordStore};

/// Result of one auto-validation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoValidationReport {
    /// Records still awaiting review that were examined.
    pub checked: usize,
    /// Ids of the records auto-validated by this sweep.
    pub validated: Vec<i64>,
}

impl RecordStore {
    fn transition(
        &self,
        id: i64,
        apply: impl FnOnce(&mut DataRecord) -> Result<()>,
    ) -> Result<DataRecord> {
        let mut record = self.require_record(id)?;
        apply(&mut record)?;
        update_record(&self.conn, &record).map_err(store_err)?;
        Ok(record)
    }

    /// Reviewer accepts a record.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::NotFound`] for an unknown id.
    pub fn validate_record(&self, id: i64, by: Actor, on: DateTime<Utc>) -> Result<DataRecord> {
        let record = self.transition(id, |r| {
            r.validate(on, by);
            Ok(())
        })?;
        info!(id, key = %record.key(), "record validated");
        Ok(record)
    }

    /// Reviewer rejects a record; it stops counting toward completeness.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::NotFound`] for an unknown id.
    pub fn reject_record(&self, id: i64, by: Actor, on: DateTime<Utc>) -> Result<DataRecord> {
        let record = self.transition(id, |r| {
            r.reject(on, by);
            Ok(())
        })?;
        info!(id, key = %record.key(), "record rejected");
        Ok(record)
    }

    /// Reviewer correction of the values; the record becomes `modified`.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::NotFound`] for an unknown id or indicator, and
    /// [`SurvError::Value`] when the new values have no value (zero
    /// denominator).
    pub fn edit_record(
        &self,
        id: i64,
        by: Actor,
        on: DateTime<Utc>,
        numerator: f64,
        denominator: f64,
    ) -> Result<DataRecord> {
        let current = self.require_record(id)?;
        let indicator = self.require_indicator(current.indicator())?;
        indicator.compute_value(numerator, denominator)?;

        let record = self.transition(id, |r| {
            r.edit(on, by, numerator, denominator);
            Ok(())
        })?;
        info!(id, key = %record.key(), numerator, denominator, "record edited");
        Ok(record)
    }

    /// Auto-validate one record whose review window has passed.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Transition`] if the record was already reviewed,
    /// the deadline has not passed or the indicator defines none.
    pub fn auto_validate_record(&self, id: i64, on: DateTime<Utc>) -> Result<DataRecord> {
        let current = self.require_record(id)?;
        let indicator = self.require_indicator(current.indicator())?;
        self.transition(id, |r| Ok(r.auto_validate(&indicator, on)?))
    }

    /// Auto-validate every `not_validated` record of a manually collected
    /// indicator whose validation deadline is before `now`.
    ///
    /// Runs in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Store`] on database failure.
    pub fn auto_validate_due(&mut self, now: DateTime<Utc>) -> Result<AutoValidationReport> {
        let indicators = self.indicator_map()?;
        let pending = self.records_with_status(ValidationStatus::NotValidated)?;
        let tx = self.conn.transaction().map_err(store_err)?;
        let mut report = AutoValidationReport::default();

        for mut record in pending {
            let Some(indicator) = indicators.get(record.indicator()) else {
                continue;
            };
            if indicator.origin != Origin::Manual {
                continue;
            }
            report.checked += 1;
            match record.auto_validate(indicator, now) {
                Ok(()) => {
                    update_record(&tx, &record).map_err(store_err)?;
                    report.validated.push(record.id());
                }
                Err(
                    reason @ (TransitionError::DeadlineNotReached { .. }
                    | TransitionError::NoDeadline(_)
                    | TransitionError::NotPending { .. }),
                ) => {
                    debug!(id = record.id(), %reason, "left for review");
                }
            }
        }

        tx.commit().map_err(store_err)?;
        info!(
            checked = report.checked,
            validated = report.validated.len(),
            "auto-validation sweep done"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surv_core::error::SurvError;
    use crate::ingest::IngestOptions;
    use crate::tests::{make_indicator, store_with, utc};
    use chrono::Duration;
    use surv_core::error::ValueError;
    use surv_core::record::RecordKey;
    use surv_core::submission::Submission;

    fn submission(store: &RecordStore, indicator: &str, entity: &str) -> Submission {
        Submission {
            ident: entity.to_string(),
            key: RecordKey {
                indicator: indicator.to_string(),
                period: store.bounds().period(2023, 4).unwrap(),
                entity: entity.to_string(),
            },
            numerator: 30.0,
            denominator: 120.0,
        }
    }

    fn seeded(origin: Origin) -> (RecordStore, i64) {
        let mut store = store_with(&[make_indicator("malaria-cases", "01", origin)]);
        let batch = vec![submission(&store, "malaria-cases", "gombe")];
        let report = store
            .batch_ingest(
                &batch,
                &IngestOptions::upload(Actor::new("partner-1"), utc(2023, 5, 10)),
            )
            .unwrap();
        (store, report.rows[0].record_id)
    }

    #[test]
    fn validate_and_reject_stamp_the_reviewer() {
        let (store, id) = seeded(Origin::Manual);
        let record = store
            .validate_record(id, Actor::new("reviewer"), utc(2023, 5, 11))
            .unwrap();
        assert_eq!(record.validation_status(), ValidationStatus::Validated);
        assert_eq!(record.validated_by(), Some(&Actor::new("reviewer")));

        let record = store
            .reject_record(id, Actor::new("supervisor"), utc(2023, 5, 12))
            .unwrap();
        assert_eq!(record.validation_status(), ValidationStatus::Rejected);
        assert!(!record.is_valid());
        assert_eq!(store.require_record(id).unwrap(), record);
    }

    #[test]
    fn edit_changes_values_and_marks_modified() {
        let (store, id) = seeded(Origin::Manual);
        let record = store
            .edit_record(id, Actor::new("reviewer"), utc(2023, 5, 11), 28.0, 110.0)
            .unwrap();
        assert_eq!(record.numerator(), 28.0);
        assert_eq!(record.denominator(), 110.0);
        assert_eq!(record.validation_status(), ValidationStatus::Modified);
        assert_eq!(record.updated_by(), Some(&Actor::new("reviewer")));
        assert!(record.is_valid());
    }

    #[test]
    fn edit_refuses_zero_denominator() {
        let (store, id) = seeded(Origin::Manual);
        let err = store
            .edit_record(id, Actor::new("reviewer"), utc(2023, 5, 11), 28.0, 0.0)
            .unwrap_err();
        assert!(matches!(err, SurvError::Value(ValueError::DivisionByZero)));
        assert_eq!(store.require_record(id).unwrap().numerator(), 30.0);
    }

    #[test]
    fn sweep_validates_only_records_past_their_deadline() {
        let now = utc(2023, 6, 30);
        let mut store = store_with(&[make_indicator("malaria-cases", "01", Origin::Manual)]);

        let old = vec![submission(&store, "malaria-cases", "gombe")];
        let old = store
            .batch_ingest(
                &old,
                &IngestOptions::feed(now - Duration::days(20)),
            )
            .unwrap()
            .rows[0]
            .record_id;
        let recent = vec![submission(&store, "malaria-cases", "limete")];
        let recent = store
            .batch_ingest(
                &recent,
                &IngestOptions::feed(now - Duration::days(5)),
            )
            .unwrap()
            .rows[0]
            .record_id;

        let report = store.auto_validate_due(now).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.validated, vec![old]);

        let validated = store.require_record(old).unwrap();
        assert_eq!(validated.validation_status(), ValidationStatus::AutoValidated);
        assert_eq!(validated.validated_by(), Some(&Actor::validation_bot()));
        assert_eq!(
            store.require_record(recent).unwrap().validation_status(),
            ValidationStatus::NotValidated
        );
    }

    #[test]
    fn sweep_skips_feed_indicators_and_reviewed_records() {
        let (mut store, id) = seeded(Origin::Feed);
        let report = store.auto_validate_due(utc(2024, 1, 1)).unwrap();
        assert_eq!(report, AutoValidationReport::default());
        assert_eq!(
            store.require_record(id).unwrap().validation_status(),
            ValidationStatus::NotValidated
        );

        let (mut store, id) = seeded(Origin::Manual);
        store
            .reject_record(id, Actor::new("reviewer"), utc(2023, 5, 11))
            .unwrap();
        let report = store.auto_validate_due(utc(2024, 1, 1)).unwrap();
        assert_eq!(report.checked, 0);
    }

    #[test]
    fn single_auto_validation_refuses_before_deadline() {
        let (store, id) = seeded(Origin::Manual);
        let err = store.auto_validate_record(id, utc(2023, 5, 15)).unwrap_err();
        assert!(matches!(
            err,
            SurvError::Transition(TransitionError::DeadlineNotReached { .. })
        ));

        let record = store.auto_validate_record(id, utc(2023, 5, 21)).unwrap();
        assert_eq!(record.validation_status(), ValidationStatus::AutoValidated);
    }

    #[test]
    fn single_auto_validation_keeps_a_rejection() {
        let (store, id) = seeded(Origin::Manual);
        store
            .reject_record(id, Actor::new("reviewer"), utc(2023, 5, 11))
            .unwrap();

        let err = store.auto_validate_record(id, utc(2023, 6, 30)).unwrap_err();
        assert!(matches!(
            err,
            SurvError::Transition(TransitionError::NotPending { .. })
        ));
        let record = store.require_record(id).unwrap();
        assert_eq!(record.validation_status(), ValidationStatus::Rejected);
        assert_eq!(record.validated_by(), Some(&Actor::new("reviewer")));
    }
}
