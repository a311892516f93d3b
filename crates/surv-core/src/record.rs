//! Data records and their validation/arrival state machine.
//!
//! A [`DataRecord`] is one numerator/denominator observation for an
//! (indicator, period, entity) triple. Its fields are private: values and
//! statuses only move through the transition methods below.
//!
//! ```text
//! not_validated ──validate──▶ validated
//!       │ ├──────reject─────▶ rejected
//!       │ ├──auto_validate──▶ auto_validated   (past the validation deadline)
//!       │ └───────edit──────▶ modified         (from any state)
//!       ◀──resubmit / record_update──          (from any state)
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TransitionError, ValueError};
use crate::format::Locale;
use crate::indicator::Indicator;
use crate::period::Period;

/// Review state of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    NotValidated,
    Validated,
    AutoValidated,
    Rejected,
    Modified,
}

impl ValidationStatus {
    /// Statuses whose records count toward completeness.
    pub const VALID: [ValidationStatus; 3] = [
        ValidationStatus::Validated,
        ValidationStatus::AutoValidated,
        ValidationStatus::Modified,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStatus::NotValidated => "not_validated",
            ValidationStatus::Validated => "validated",
            ValidationStatus::AutoValidated => "auto_validated",
            ValidationStatus::Rejected => "rejected",
            ValidationStatus::Modified => "modified",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ValidationStatus::NotValidated => "Not Validated",
            ValidationStatus::Validated => "Validated",
            ValidationStatus::AutoValidated => "Auto Validated",
            ValidationStatus::Rejected => "Rejected",
            ValidationStatus::Modified => "Modified",
        }
    }

    #[must_use]
    pub fn is_valid(self) -> bool {
        Self::VALID.contains(&self)
    }
}

/// Timeliness of a record, fixed when it is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalStatus {
    #[default]
    Arrived,
    OnTime,
    Late,
}

impl ArrivalStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArrivalStatus::Arrived => "arrived",
            ArrivalStatus::OnTime => "on_time",
            ArrivalStatus::Late => "late",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ArrivalStatus::Arrived => "Arrived",
            ArrivalStatus::OnTime => "Arrived On Time",
            ArrivalStatus::Late => "Arrived Late",
        }
    }
}

/// Where a record's values came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Manual file upload by a partner.
    Upload,
    /// Automated feed import.
    Feed,
    /// Derived from other records.
    Aggregation,
}

impl Source {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Upload => "upload",
            Source::Feed => "feed",
            Source::Aggregation => "aggregation",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Source::Upload => "Direct",
            Source::Feed => "Feed",
            Source::Aggregation => "Aggregation",
        }
    }

    /// Data a manual upload may not overwrite.
    #[must_use]
    pub fn is_automated(self) -> bool {
        matches!(self, Source::Feed | Source::Aggregation)
    }
}

macro_rules! impl_status_str {
    ($ty:ty, [$($variant:expr),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| format!("unknown {} '{s}'", stringify!($ty)))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_status_str!(
    ValidationStatus,
    [
        ValidationStatus::NotValidated,
        ValidationStatus::Validated,
        ValidationStatus::AutoValidated,
        ValidationStatus::Rejected,
        ValidationStatus::Modified,
    ]
);
impl_status_str!(
    ArrivalStatus,
    [ArrivalStatus::Arrived, ArrivalStatus::OnTime, ArrivalStatus::Late]
);
impl_status_str!(Source, [Source::Upload, Source::Feed, Source::Aggregation]);

/// Opaque identity of whoever performs a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    const VALIDATION_BOT: &'static str = "validation_bot";
    const FEED_BOT: &'static str = "feed_bot";

    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The system actor stamped on auto-validations.
    #[must_use]
    pub fn validation_bot() -> Self {
        Self::new(Self::VALIDATION_BOT)
    }

    /// The actor the automated feed ingests as.
    #[must_use]
    pub fn feed_bot() -> Self {
        Self::new(Self::FEED_BOT)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.0 == Self::VALIDATION_BOT || self.0 == Self::FEED_BOT
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The unique (indicator, period, entity) triple of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub indicator: String,
    pub period: Period,
    pub entity: String,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.indicator, self.period, self.entity)
    }
}

/// Every persisted column of a record, used to rehydrate one from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordParts {
    pub id: i64,
    pub key: RecordKey,
    pub numerator: f64,
    pub denominator: f64,
    pub source: Source,
    pub created_on: DateTime<Utc>,
    pub created_by: Actor,
    pub updated_on: Option<DateTime<Utc>>,
    pub updated_by: Option<Actor>,
    pub validation_status: ValidationStatus,
    pub validated_on: Option<DateTime<Utc>>,
    pub validated_by: Option<Actor>,
    pub arrival_status: ArrivalStatus,
}

/// One observation and its review state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataRecord {
    id: i64,
    #[serde(flatten)]
    key: RecordKey,
    numerator: f64,
    denominator: f64,
    source: Source,
    created_on: DateTime<Utc>,
    created_by: Actor,
    updated_on: Option<DateTime<Utc>>,
    updated_by: Option<Actor>,
    validation_status: ValidationStatus,
    validated_on: Option<DateTime<Utc>>,
    validated_by: Option<Actor>,
    arrival_status: ArrivalStatus,
}

impl DataRecord {
    /// A freshly received record awaiting review.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn created(
        id: i64,
        key: RecordKey,
        numerator: f64,
        denominator: f64,
        source: Source,
        arrival_status: ArrivalStatus,
        on: DateTime<Utc>,
        by: Actor,
    ) -> Self {
        Self {
            id,
            key,
            numerator,
            denominator,
            source,
            created_on: on,
            created_by: by,
            updated_on: None,
            updated_by: None,
            validation_status: ValidationStatus::NotValidated,
            validated_on: None,
            validated_by: None,
            arrival_status,
        }
    }

    /// Rebuild a record exactly as it was stored.
    #[must_use]
    pub fn from_parts(parts: RecordParts) -> Self {
        Self {
            id: parts.id,
            key: parts.key,
            numerator: parts.numerator,
            denominator: parts.denominator,
            source: parts.source,
            created_on: parts.created_on,
            created_by: parts.created_by,
            updated_on: parts.updated_on,
            updated_by: parts.updated_by,
            validation_status: parts.validation_status,
            validated_on: parts.validated_on,
            validated_by: parts.validated_by,
            arrival_status: parts.arrival_status,
        }
    }

    // === Accessors ===

    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    #[must_use]
    pub fn indicator(&self) -> &str {
        &self.key.indicator
    }

    #[must_use]
    pub fn period(&self) -> Period {
        self.key.period
    }

    #[must_use]
    pub fn entity(&self) -> &str {
        &self.key.entity
    }

    #[must_use]
    pub fn numerator(&self) -> f64 {
        self.numerator
    }

    #[must_use]
    pub fn denominator(&self) -> f64 {
        self.denominator
    }

    #[must_use]
    pub fn source(&self) -> Source {
        self.source
    }

    #[must_use]
    pub fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    #[must_use]
    pub fn created_by(&self) -> &Actor {
        &self.created_by
    }

    #[must_use]
    pub fn updated_on(&self) -> Option<DateTime<Utc>> {
        self.updated_on
    }

    #[must_use]
    pub fn updated_by(&self) -> Option<&Actor> {
        self.updated_by.as_ref()
    }

    #[must_use]
    pub fn validation_status(&self) -> ValidationStatus {
        self.validation_status
    }

    #[must_use]
    pub fn validated_on(&self) -> Option<DateTime<Utc>> {
        self.validated_on
    }

    #[must_use]
    pub fn validated_by(&self) -> Option<&Actor> {
        self.validated_by.as_ref()
    }

    #[must_use]
    pub fn arrival_status(&self) -> ArrivalStatus {
        self.arrival_status
    }

    // === Derived ===

    /// Whether this record counts toward completeness.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_status.is_valid()
    }

    #[must_use]
    pub fn is_auto_validated(&self) -> bool {
        self.validated_by
            .as_ref()
            .is_some_and(|a| *a == Actor::validation_bot())
    }

    /// More cases than population usually means a data-entry mistake.
    #[must_use]
    pub fn data_is_suspect(&self) -> bool {
        self.denominator != 0.0 && self.denominator < self.numerator
    }

    #[must_use]
    pub fn has_same_values(&self, numerator: f64, denominator: f64) -> bool {
        self.numerator == numerator && self.denominator == denominator
    }

    /// Computed on every call: the denominator can be edited.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::DivisionByZero`] when the denominator is 0.
    pub fn value(&self, indicator: &Indicator) -> Result<f64, ValueError> {
        indicator.compute_value(self.numerator, self.denominator)
    }

    /// Value formatted with the indicator's number format, or "n/a".
    #[must_use]
    pub fn formatted(&self, indicator: &Indicator, locale: Locale) -> String {
        match self.value(indicator) {
            Ok(v) => indicator.format_number(v, locale),
            Err(_) => "n/a".to_string(),
        }
    }

    /// Value rendered with the indicator's template.
    #[must_use]
    pub fn human(&self, indicator: &Indicator, locale: Locale) -> String {
        indicator.format_value(
            self.value(indicator).ok(),
            self.numerator,
            self.denominator,
            locale,
        )
    }

    #[must_use]
    pub fn validation_deadline(&self, indicator: &Indicator) -> Option<DateTime<Utc>> {
        indicator.validation_deadline(&self.key.period, self.created_on)
    }

    #[must_use]
    pub fn validation_period_is_over(&self, indicator: &Indicator, on: DateTime<Utc>) -> bool {
        self.validation_deadline(indicator)
            .is_some_and(|deadline| on > deadline)
    }

    /// Read-only rendering for dashboards and CLI output.
    #[must_use]
    pub fn view(&self, indicator: &Indicator, locale: Locale) -> RecordView {
        RecordView {
            id: self.id,
            indicator: self.key.indicator.clone(),
            period: self.key.period.strid(),
            entity: self.key.entity.clone(),
            numerator: self.numerator,
            denominator: self.denominator,
            value: self.value(indicator).ok(),
            formatted: self.formatted(indicator, locale),
            human: self.human(indicator, locale),
            source: self.source,
            validation_status: self.validation_status,
            arrival_status: self.arrival_status,
            suspect: self.data_is_suspect(),
        }
    }

    // === Transitions ===

    fn record_validation(
        &mut self,
        status: ValidationStatus,
        on: Option<DateTime<Utc>>,
        by: Option<Actor>,
    ) {
        self.validation_status = status;
        self.validated_on = on;
        self.validated_by = by;
    }

    fn remove_validation(&mut self) {
        self.record_validation(ValidationStatus::NotValidated, None, None);
    }

    /// Reviewer accepts the record.
    pub fn validate(&mut self, on: DateTime<Utc>, by: Actor) {
        self.record_validation(ValidationStatus::Validated, Some(on), Some(by));
    }

    /// Reviewer rejects the record; it no longer counts in aggregation.
    pub fn reject(&mut self, on: DateTime<Utc>, by: Actor) {
        self.record_validation(ValidationStatus::Rejected, Some(on), Some(by));
    }

    /// System validation once the review window has passed.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::NotPending`] unless the record is still
    /// `not_validated`, [`TransitionError::NoDeadline`] if the indicator
    /// defines no validation deadline, or
    /// [`TransitionError::DeadlineNotReached`] if `on` is not past it.
    pub fn auto_validate(
        &mut self,
        indicator: &Indicator,
        on: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_pending()?;
        let deadline = self
            .validation_deadline(indicator)
            .ok_or_else(|| TransitionError::NoDeadline(self.key.to_string()))?;
        if on <= deadline {
            return Err(TransitionError::DeadlineNotReached {
                record: self.key.to_string(),
                deadline: deadline.to_rfc3339(),
            });
        }
        self.record_validation(
            ValidationStatus::AutoValidated,
            Some(on),
            Some(Actor::validation_bot()),
        );
        Ok(())
    }

    /// System validation at receipt, for submissions ingested with
    /// auto-validation requested.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::NotPending`] unless the record is still
    /// `not_validated`.
    pub fn auto_validate_on_receipt(&mut self, on: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_pending()?;
        self.record_validation(
            ValidationStatus::AutoValidated,
            Some(on),
            Some(Actor::validation_bot()),
        );
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), TransitionError> {
        if self.validation_status == ValidationStatus::NotValidated {
            Ok(())
        } else {
            Err(TransitionError::NotPending {
                record: self.key.to_string(),
                status: self.validation_status.as_str().to_string(),
            })
        }
    }

    /// Stamp an update. Validation is reset unless `keep_validation` is set.
    pub fn record_update(&mut self, on: DateTime<Utc>, by: Actor, keep_validation: bool) {
        self.updated_on = Some(on);
        self.updated_by = Some(by);
        if !keep_validation {
            self.remove_validation();
        }
    }

    /// Reviewer correction: new values, update stamp, status `modified`.
    pub fn edit(&mut self, on: DateTime<Utc>, by: Actor, numerator: f64, denominator: f64) {
        self.numerator = numerator;
        self.denominator = denominator;
        self.record_update(on, by.clone(), false);
        self.record_validation(ValidationStatus::Modified, Some(on), Some(by));
    }

    /// New values from a later submission; the record goes back to review.
    pub fn resubmit(
        &mut self,
        on: DateTime<Utc>,
        by: Actor,
        numerator: f64,
        denominator: f64,
        source: Source,
    ) {
        self.numerator = numerator;
        self.denominator = denominator;
        self.source = source;
        self.record_update(on, by, false);
    }

    /// Identical values re-sent by the automated feed: only the stamp and
    /// source move.
    pub fn confirm(&mut self, on: DateTime<Utc>, by: Actor, source: Source) {
        self.source = source;
        self.record_update(on, by, true);
    }
}

/// Serializable rendering of a record with its computed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordView {
    pub id: i64,
    pub indicator: String,
    pub period: String,
    pub entity: String,
    pub numerator: f64,
    pub denominator: f64,
    pub value: Option<f64>,
    pub formatted: String,
    pub human: String,
    pub source: Source,
    pub validation_status: ValidationStatus,
    pub arrival_status: ArrivalStatus,
    pub suspect: bool,
}
