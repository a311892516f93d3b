//! Submission rows: the input of batch ingestion.
//!
//! External parsers (spreadsheet upload, automated feed) produce raw
//! [`SubmissionRow`]s. [`SubmissionCheck`] turns them into typed
//! [`Submission`]s, collecting a [`RowError`] for each row that cannot be
//! accepted so the rest of the batch can still be committed.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hierarchy::Hierarchy;
use crate::indicator::Indicator;
use crate::period::PeriodBounds;
use crate::record::{RecordKey, Source};

/// A cell value as it came out of the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    fn is_blank(&self) -> bool {
        matches!(self, RawValue::Text(s) if s.trim().is_empty())
    }

    fn to_f64(&self) -> Option<f64> {
        match self {
            RawValue::Number(n) => Some(*n).filter(|n| n.is_finite()),
            RawValue::Text(s) => s
                .trim()
                .replace(',', ".")
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite()),
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Number(n) => write!(f, "{n}"),
            RawValue::Text(s) => f.write_str(s),
        }
    }
}

/// One unchecked row of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ident: Option<String>,
    pub indicator: String,
    pub period: String,
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numerator: Option<RawValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denominator: Option<RawValue>,
}

/// A checked row, ready for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub ident: String,
    pub key: RecordKey,
    pub numerator: f64,
    pub denominator: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorKind {
    IncorrectPeriod,
    UnknownIndicator,
    UnknownEntity,
    MissingNumerator,
    MissingDenominator,
    IncorrectValue,
    ZeroDenominator,
    OutsideSubmissionWindow,
    Duplicate,
}

/// Why a row was left out of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub ident: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicator: Option<String>,
    pub kind: RowErrorKind,
    pub message: String,
}

/// Result of checking a batch of rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckedBatch {
    pub submissions: Vec<Submission>,
    pub errors: Vec<RowError>,
}

/// Everything needed to check rows for one submission.
pub struct SubmissionCheck<'a, H: Hierarchy + ?Sized> {
    indicators: HashMap<&'a str, &'a Indicator>,
    hierarchy: &'a H,
    bounds: PeriodBounds,
    source: Source,
    submitted_on: DateTime<Utc>,
}

impl<'a, H: Hierarchy + ?Sized> SubmissionCheck<'a, H> {
    #[must_use]
    pub fn new(
        indicators: &'a [Indicator],
        hierarchy: &'a H,
        bounds: PeriodBounds,
        source: Source,
        submitted_on: DateTime<Utc>,
    ) -> Self {
        Self {
            indicators: indicators.iter().map(|i| (i.slug.as_str(), i)).collect(),
            hierarchy,
            bounds,
            source,
            submitted_on,
        }
    }

    /// Check every row. Later rows repeating an earlier triple are errors.
    #[must_use]
    pub fn check(&self, rows: Vec<SubmissionRow>) -> CheckedBatch {
        let mut batch = CheckedBatch::default();
        let mut seen: HashSet<RecordKey> = HashSet::new();

        for (index, row) in rows.into_iter().enumerate() {
            match self.check_row(index, row) {
                Ok(submission) => {
                    if seen.insert(submission.key.clone()) {
                        batch.submissions.push(submission);
                    } else {
                        batch.errors.push(RowError {
                            message: format!("{} appears twice in the submission", submission.key),
                            ident: submission.ident,
                            indicator: Some(submission.key.indicator),
                            kind: RowErrorKind::Duplicate,
                        });
                    }
                }
                Err(err) => batch.errors.push(err),
            }
        }

        batch
    }

    fn check_row(&self, index: usize, row: SubmissionRow) -> Result<Submission, RowError> {
        let ident = row
            .ident
            .clone()
            .unwrap_or_else(|| format!("row-{}", index + 1));
        let fail = |kind: RowErrorKind, indicator: Option<&str>, message: String| RowError {
            ident: ident.clone(),
            indicator: indicator.map(str::to_string),
            kind,
            message,
        };

        let period = self.bounds.parse(&row.period).map_err(|e| {
            fail(
                RowErrorKind::IncorrectPeriod,
                None,
                format!("unable to retrieve period: {e}"),
            )
        })?;

        let indicator = self.indicators.get(row.indicator.as_str()).ok_or_else(|| {
            fail(
                RowErrorKind::UnknownIndicator,
                None,
                format!("unable to match an indicator for '{}'", row.indicator),
            )
        })?;
        let slug = Some(indicator.slug.as_str());

        if self.hierarchy.entity(&row.entity).is_none() {
            return Err(fail(
                RowErrorKind::UnknownEntity,
                slug,
                format!("unknown entity '{}'", row.entity),
            ));
        }

        if self.source == Source::Upload && !indicator.can_submit_on(self.submitted_on, &period) {
            return Err(fail(
                RowErrorKind::OutsideSubmissionWindow,
                slug,
                format!(
                    "{} is outside the submission period for indicator #{} at {period}",
                    self.submitted_on.format("%d-%m-%Y"),
                    indicator.number
                ),
            ));
        }

        let numerator = match row.numerator.as_ref().filter(|v| !v.is_blank()) {
            Some(raw) => raw.to_f64().ok_or_else(|| {
                fail(
                    RowErrorKind::IncorrectValue,
                    slug,
                    format!("incorrect numerator value `{raw}`"),
                )
            })?,
            None => {
                return Err(fail(
                    RowErrorKind::MissingNumerator,
                    slug,
                    "missing numerator".to_string(),
                ))
            }
        };

        let denominator = match row.denominator.as_ref().filter(|v| !v.is_blank()) {
            Some(raw) => raw.to_f64().ok_or_else(|| {
                fail(
                    RowErrorKind::IncorrectValue,
                    slug,
                    format!("incorrect denominator value `{raw}`"),
                )
            })?,
            None if indicator.is_number() => 1.0,
            None => {
                return Err(fail(
                    RowErrorKind::MissingDenominator,
                    slug,
                    "missing denominator on non-number indicator".to_string(),
                ))
            }
        };

        if denominator == 0.0 {
            return Err(fail(
                RowErrorKind::ZeroDenominator,
                slug,
                format!("denominator is 0 for {numerator}/{denominator}"),
            ));
        }

        Ok(Submission {
            ident,
            key: RecordKey {
                indicator: indicator.slug.clone(),
                period,
                entity: row.entity,
            },
            numerator,
            denominator,
        })
    }
}
