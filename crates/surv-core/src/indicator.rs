//! Indicator definitions and value computation.
//!
//! An [`Indicator`] is static configuration: how a numerator/denominator pair
//! becomes a value, how that value is rendered, where the data is collected
//! and which deadlines apply to a submission.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SurvError, ValueError};
use crate::format::{Locale, NumberFormat};
use crate::hierarchy::Level;
use crate::period::Period;
use crate::record::ArrivalStatus;

/// Numeric semantics of an indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorType {
    Number,
    Percentage,
    Proportion,
    PerThousand,
    PerTenThousand,
    PerHundredThousand,
}

impl IndicatorType {
    /// Multiplier applied to the numerator. Proportions use the raw ratio.
    #[must_use]
    pub fn coefficient(self) -> Option<f64> {
        match self {
            IndicatorType::Number => Some(1.0),
            IndicatorType::Percentage => Some(100.0),
            IndicatorType::PerThousand => Some(1_000.0),
            IndicatorType::PerTenThousand => Some(10_000.0),
            IndicatorType::PerHundredThousand => Some(100_000.0),
            IndicatorType::Proportion => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            IndicatorType::Number => "Number",
            IndicatorType::Percentage => "Percentage",
            IndicatorType::Proportion => "Proportion",
            IndicatorType::PerThousand => "Per 1,000",
            IndicatorType::PerTenThousand => "Per 10,000",
            IndicatorType::PerHundredThousand => "Per 100,000",
        }
    }
}

/// Template used to render a value next to its numerator and denominator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    #[default]
    Raw,
    Percent,
    Proportion,
    PerThousand,
    PerTenThousand,
    PerHundredThousand,
}

impl ValueFormat {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ValueFormat::Raw => "x",
            ValueFormat::Percent => "x%",
            ValueFormat::Proportion => "a/b",
            ValueFormat::PerThousand => "x/1000",
            ValueFormat::PerTenThousand => "x/10 000",
            ValueFormat::PerHundredThousand => "x/100 000",
        }
    }

    /// Fill the template with already formatted parts.
    #[must_use]
    pub fn render(self, value: &str, numerator: &str, denominator: &str) -> String {
        match self {
            ValueFormat::Raw => value.to_string(),
            ValueFormat::Percent => format!("{value}%"),
            ValueFormat::Proportion => format!("{numerator}/{denominator}"),
            ValueFormat::PerThousand => format!("{value}/1 000"),
            ValueFormat::PerTenThousand => format!("{value}/10 000"),
            ValueFormat::PerHundredThousand => format!("{value}/100 000"),
        }
    }
}

/// Who produces the data for an indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Partners upload it by hand; subject to auto-validation.
    #[default]
    Manual,
    /// Imported from the automated feed.
    Feed,
}

impl Origin {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Origin::Manual => "Manual",
            Origin::Feed => "Feed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionType {
    #[default]
    Routine,
    Survey,
}

impl CollectionType {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            CollectionType::Routine => "Routine",
            CollectionType::Survey => "Survey",
        }
    }
}

/// Static per-metric configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub slug: String,
    pub number: String,
    pub name: String,
    #[serde(default)]
    pub origin: Origin,
    #[serde(rename = "type")]
    pub itype: IndicatorType,
    #[serde(default)]
    pub number_format: NumberFormat,
    #[serde(default)]
    pub value_format: ValueFormat,
    #[serde(default)]
    pub collection_type: CollectionType,
    pub collection_level: Level,
    /// In months.
    pub collection_period: u32,
    /// In days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmission_delay: Option<u32>,
    /// In days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_transmission_delay: Option<u32>,
    /// In days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_delay: Option<u32>,
}

fn days(delay: Option<u32>) -> Option<Duration> {
    delay.filter(|d| *d > 0).map(|d| Duration::days(i64::from(d)))
}

impl Indicator {
    /// Load a list of indicator definitions from YAML (or JSON).
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Io`] or [`SurvError::Serialization`].
    pub fn load_all(path: &Path) -> Result<Vec<Indicator>> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| SurvError::Serialization(e.to_string()))
    }

    #[must_use]
    pub fn is_number(&self) -> bool {
        self.itype == IndicatorType::Number
    }

    #[must_use]
    pub fn is_routine(&self) -> bool {
        self.collection_type == CollectionType::Routine
    }

    /// Value for a numerator/denominator pair.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::DivisionByZero`] when `denominator` is 0.
    pub fn compute_value(
        &self,
        numerator: f64,
        denominator: f64,
    ) -> std::result::Result<f64, ValueError> {
        if denominator == 0.0 {
            return Err(ValueError::DivisionByZero);
        }
        match self.itype.coefficient() {
            None => Ok(numerator / denominator),
            Some(coef) => Ok((numerator * coef) / denominator),
        }
    }

    #[must_use]
    pub fn format_number(&self, value: f64, locale: Locale) -> String {
        self.number_format.format(value, locale)
    }

    /// Render a value with this indicator's template; `None` renders "n/a".
    #[must_use]
    pub fn format_value(
        &self,
        value: Option<f64>,
        numerator: f64,
        denominator: f64,
        locale: Locale,
    ) -> String {
        let Some(value) = value else {
            return "n/a".to_string();
        };
        self.value_format.render(
            &self.format_number(value, locale),
            &self.format_number(numerator, locale),
            &self.format_number(denominator, locale),
        )
    }

    /// Fallback deadline used when no explicit delay is configured.
    fn collection_deadline(&self, period: &Period) -> Option<DateTime<Utc>> {
        (self.collection_period > 0)
            .then(|| period.end() + Duration::weeks(i64::from(self.collection_period) * 4))
    }

    /// Last instant at which data for `period` may be transmitted.
    #[must_use]
    pub fn transmission_deadline(&self, period: &Period) -> Option<DateTime<Utc>> {
        match days(self.transmission_delay) {
            Some(delay) => Some(period.end() + delay),
            None => self.collection_deadline(period),
        }
    }

    /// Submissions open once the period is over and close at the
    /// transmission deadline, if any.
    #[must_use]
    pub fn can_submit_on(&self, on: DateTime<Utc>, period: &Period) -> bool {
        if on < period.end() {
            return false;
        }
        match self.transmission_deadline(period) {
            Some(deadline) => on < deadline,
            None => true,
        }
    }

    /// Timeliness of a record first received at `on`.
    #[must_use]
    pub fn arrival_status_on(&self, on: DateTime<Utc>, period: &Period) -> ArrivalStatus {
        match days(self.prompt_transmission_delay) {
            None => ArrivalStatus::Arrived,
            Some(delay) if on < period.end() + delay => ArrivalStatus::OnTime,
            Some(_) => ArrivalStatus::Late,
        }
    }

    /// After this instant a record still awaiting review may be
    /// auto-validated.
    #[must_use]
    pub fn validation_deadline(
        &self,
        period: &Period,
        created_on: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match days(self.validation_delay) {
            Some(delay) => Some(created_on + delay),
            None => self.collection_deadline(period),
        }
    }
}
