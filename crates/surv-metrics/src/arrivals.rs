//! Completeness and promptness of reporting.
//!
//! For an indicator and an entity, the *expected* set is the entities at
//! which the indicator must be reported; *arrived* counts the records of
//! that set which count toward completeness, and *prompt* those of them
//! received on time.

use serde::{Deserialize, Serialize};
use tracing::debug;

use surv_core::error::{AggregationError, Result, SurvError, ValueError};
use surv_core::hierarchy::{Entity, Hierarchy};
use surv_core::indicator::Indicator;
use surv_core::period::Period;
use surv_store::{ArrivalCounts, RecordStore};

/// Counts and ratios for one aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArrivalStats {
    pub expected: u64,
    pub arrived: u64,
    pub prompt: u64,
    pub completeness: f64,
    pub promptness: f64,
}

impl ArrivalStats {
    /// # Errors
    ///
    /// Returns [`ValueError::DivisionByZero`] when `expected` is 0.
    pub fn from_counts(expected: u64, counts: ArrivalCounts) -> std::result::Result<Self, ValueError> {
        if expected == 0 {
            return Err(ValueError::DivisionByZero);
        }
        Ok(Self {
            expected,
            arrived: counts.arrived,
            prompt: counts.prompt,
            completeness: counts.arrived as f64 / expected as f64,
            promptness: counts.prompt as f64 / expected as f64,
        })
    }
}

/// Aggregation result with a sentinel for "nothing expected here", so one
/// indicator without expected entities cannot abort a whole dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Completeness {
    Measured(ArrivalStats),
    NotExpected,
}

impl Completeness {
    #[must_use]
    pub fn stats(&self) -> Option<&ArrivalStats> {
        match self {
            Completeness::Measured(stats) => Some(stats),
            Completeness::NotExpected => None,
        }
    }
}

/// Completeness over one period in a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub period: Period,
    #[serde(flatten)]
    pub completeness: Completeness,
}

/// Averaged completeness of one child entity, for map display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessPoint {
    pub entity: String,
    pub name: String,
    #[serde(flatten)]
    pub completeness: Completeness,
}

/// Summed values of the valid records of an indicator at one entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueAggregate {
    pub records: usize,
    pub numerator: f64,
    pub denominator: f64,
    /// `None` when the denominator sums to 0.
    pub value: Option<f64>,
}

/// Aggregation over a record store and an entity hierarchy.
pub struct ArrivalEngine<'a, H: Hierarchy + ?Sized> {
    store: &'a RecordStore,
    hierarchy: &'a H,
}

impl<'a, H: Hierarchy + ?Sized> ArrivalEngine<'a, H> {
    #[must_use]
    pub fn new(store: &'a RecordStore, hierarchy: &'a H) -> Self {
        Self { store, hierarchy }
    }

    #[must_use]
    pub fn store(&self) -> &'a RecordStore {
        self.store
    }

    #[must_use]
    pub fn hierarchy(&self) -> &'a H {
        self.hierarchy
    }

    fn entity(&self, id: &str) -> Result<&'a Entity> {
        self.hierarchy
            .entity(id)
            .ok_or_else(|| AggregationError::UnknownEntity(id.to_string()).into())
    }

    /// Entities at which `indicator` must be reported for `entity`.
    ///
    /// `[entity]` at the collection level, nothing below it, otherwise the
    /// descendants at the collection level.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::UnknownEntity`].
    pub fn expected_entities_for(&self, indicator: &Indicator, entity: &str) -> Result<Vec<&'a Entity>> {
        let entity = self.entity(entity)?;
        let level = indicator.collection_level;
        if entity.level == level {
            Ok(vec![entity])
        } else if entity.level.is_deeper_than(level) {
            Ok(Vec::new())
        } else {
            Ok(self.hierarchy.descendants_at(&entity.id, level))
        }
    }

    /// # Errors
    ///
    /// Returns [`AggregationError::UnknownEntity`].
    pub fn nb_expected_records_for(&self, indicator: &Indicator, entity: &str) -> Result<usize> {
        Ok(self.expected_entities_for(indicator, entity)?.len())
    }

    /// Arrival stats over `periods`. Expected is the size of the expected
    /// set whatever the number of periods, while arrived counts every
    /// matching record in any of them.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::NoExpectedEntities`] when nothing is
    /// expected at `entity`.
    pub fn agg_arrival_over(
        &self,
        indicator: &Indicator,
        entity: &str,
        periods: &[Period],
    ) -> Result<ArrivalStats> {
        let expected = self.expected_entities_for(indicator, entity)?;
        if expected.is_empty() {
            return Err(AggregationError::NoExpectedEntities {
                indicator: indicator.slug.clone(),
                entity: entity.to_string(),
            }
            .into());
        }
        let ids: Vec<&str> = expected.iter().map(|e| e.id.as_str()).collect();
        let counts = self.store.count_arrivals(&indicator.slug, periods, &ids)?;
        let nb_expected = ids.len() as u64;
        debug!(
            indicator = %indicator.slug,
            entity,
            expected = nb_expected,
            arrived = counts.arrived,
            prompt = counts.prompt,
            "aggregated arrivals"
        );
        Ok(ArrivalStats::from_counts(nb_expected, counts)?)
    }

    /// Arrival stats for one month, or the whole year when `month` is
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Period`] for an out-of-range period and
    /// [`AggregationError::NoExpectedEntities`] when nothing is expected.
    pub fn agg_arrival_for(
        &self,
        indicator: &Indicator,
        entity: &str,
        year: i32,
        month: Option<u32>,
    ) -> Result<ArrivalStats> {
        let periods = self.periods_for(year, month)?;
        self.agg_arrival_over(indicator, entity, &periods)
    }

    /// # Errors
    ///
    /// See [`agg_arrival_for`](Self::agg_arrival_for).
    pub fn agg_arrival_for_period(
        &self,
        indicator: &Indicator,
        entity: &str,
        period: Period,
    ) -> Result<ArrivalStats> {
        self.agg_arrival_over(indicator, entity, &[period])
    }

    /// Like [`agg_arrival_for_period`](Self::agg_arrival_for_period) with
    /// the "nothing expected" case mapped to the sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::UnknownEntity`] or store errors.
    pub fn completeness_for_period(
        &self,
        indicator: &Indicator,
        entity: &str,
        period: Period,
    ) -> Result<Completeness> {
        sentinel(self.agg_arrival_for_period(indicator, entity, period))
    }

    /// One point per period, in order, for trend charts.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::UnknownEntity`] or store errors.
    pub fn agg_arrival_for_periods(
        &self,
        indicator: &Indicator,
        entity: &str,
        periods: &[Period],
    ) -> Result<Vec<SeriesPoint>> {
        periods
            .iter()
            .map(|period| {
                Ok(SeriesPoint {
                    period: *period,
                    completeness: self.completeness_for_period(indicator, entity, *period)?,
                })
            })
            .collect()
    }

    /// Weighted average over every routine indicator: raw counts are
    /// summed first and divided once. Indicators expecting nothing at
    /// `entity` are left out.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Period`], [`AggregationError::UnknownEntity`]
    /// or store errors.
    pub fn avg_arrival_for(
        &self,
        entity: &str,
        year: i32,
        month: Option<u32>,
    ) -> Result<Completeness> {
        let periods = self.periods_for(year, month)?;
        self.avg_arrival_over(entity, &periods)
    }

    /// # Errors
    ///
    /// See [`avg_arrival_for`](Self::avg_arrival_for).
    pub fn avg_arrival_for_period(&self, entity: &str, period: Period) -> Result<Completeness> {
        self.avg_arrival_over(entity, &[period])
    }

    fn avg_arrival_over(&self, entity: &str, periods: &[Period]) -> Result<Completeness> {
        let mut expected = 0_u64;
        let mut totals = ArrivalCounts::default();

        for indicator in self.store.routine_indicators()? {
            let stats = match self.agg_arrival_over(&indicator, entity, periods) {
                Ok(stats) => stats,
                Err(SurvError::Aggregation(AggregationError::NoExpectedEntities { .. })) => continue,
                Err(e) => return Err(e),
            };
            expected += stats.expected;
            totals.arrived += stats.arrived;
            totals.prompt += stats.prompt;
        }

        match ArrivalStats::from_counts(expected, totals) {
            Ok(stats) => Ok(Completeness::Measured(stats)),
            Err(ValueError::DivisionByZero) => Ok(Completeness::NotExpected),
        }
    }

    /// Averaged completeness of each direct child of `entity` for `period`.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::UnknownEntity`] or store errors.
    pub fn completeness_points_for(
        &self,
        entity: &str,
        period: Period,
    ) -> Result<Vec<CompletenessPoint>> {
        self.entity(entity)?;
        self.hierarchy
            .children(entity)
            .into_iter()
            .map(|child| {
                Ok(CompletenessPoint {
                    entity: child.id.clone(),
                    name: child.name.clone(),
                    completeness: self.avg_arrival_for_period(&child.id, period)?,
                })
            })
            .collect()
    }

    /// Numerators and denominators of the valid records of `indicator` at
    /// `entity`, summed over one month or the whole year.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Period`] or store errors.
    pub fn data_for(
        &self,
        indicator: &Indicator,
        entity: &str,
        year: i32,
        month: Option<u32>,
    ) -> Result<ValueAggregate> {
        let periods = self.periods_for(year, month)?;
        let records = self.store.records_for(&indicator.slug, &periods, &[entity])?;
        let numerator: f64 = records.iter().map(|r| r.numerator()).sum();
        let denominator: f64 = records.iter().map(|r| r.denominator()).sum();
        Ok(ValueAggregate {
            records: records.len(),
            numerator,
            denominator,
            value: indicator.compute_value(numerator, denominator).ok(),
        })
    }

    fn periods_for(&self, year: i32, month: Option<u32>) -> Result<Vec<Period>> {
        let bounds = self.store.bounds();
        match month {
            Some(month) => Ok(vec![bounds.period(year, month)?]),
            None => Ok(bounds.year(year)?),
        }
    }
}

/// Map "nothing expected" to [`Completeness::NotExpected`].
fn sentinel(result: Result<ArrivalStats>) -> Result<Completeness> {
    match result {
        Ok(stats) => Ok(Completeness::Measured(stats)),
        Err(SurvError::Aggregation(AggregationError::NoExpectedEntities { .. })) => {
            Ok(Completeness::NotExpected)
        }
        Err(e) => Err(e),
    }
}
