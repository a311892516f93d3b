//! Calendar-month periods and period arithmetic.
//!
//! A [`Period`] is a (year, month) pair. Construction always goes through
//! [`PeriodBounds`], which rejects anything outside the configured years.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PeriodError;

/// One calendar month.
///
/// Equality is by identifier. Ordering is boundary based: `a < b` when `a`
/// ends before `b` starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    fn unchecked(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    #[must_use]
    pub fn year(&self) -> i32 {
        self.year
    }

    #[must_use]
    pub fn month(&self) -> u32 {
        self.month
    }

    /// `YYYY-MM` identifier.
    #[must_use]
    pub fn strid(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    /// `YYYYMM` identifier, as used by automated feeds.
    #[must_use]
    pub fn compact_id(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    /// Human label, e.g. "April 2023".
    #[must_use]
    pub fn name(&self) -> String {
        self.start().format("%B %Y").to_string()
    }

    /// First instant of the month.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        month_start(self.year, self.month)
    }

    /// Last second of the month.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        month_start(year, month) - Duration::seconds(1)
    }

    /// Whether `instant` falls inside this month.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start() && instant <= self.end()
    }

    /// Number of months from `self` to `other` (negative if `other` is earlier).
    #[must_use]
    pub fn months_until(&self, other: &Period) -> i64 {
        (i64::from(other.year) - i64::from(self.year)) * 12
            + (i64::from(other.month) - i64::from(self.month))
    }

    /// Next month, wrapping into the next year.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::OutOfRange`] past the upper bound.
    pub fn following(&self, bounds: &PeriodBounds) -> Result<Period, PeriodError> {
        if self.month == 12 {
            bounds.period(self.year + 1, 1)
        } else {
            bounds.period(self.year, self.month + 1)
        }
    }

    /// Previous month, wrapping into the previous year.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::OutOfRange`] before the lower bound.
    pub fn previous(&self, bounds: &PeriodBounds) -> Result<Period, PeriodError> {
        if self.month == 1 {
            bounds.period(self.year - 1, 12)
        } else {
            bounds.period(self.year, self.month - 1)
        }
    }
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    // Periods are validated on construction; the fallback only covers
    // degenerate values, which then sort by their identifiers.
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or_default()
}

impl PartialEq for Period {
    fn eq(&self, other: &Self) -> bool {
        self.strid() == other.strid()
    }
}

impl Eq for Period {}

impl Hash for Period {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.strid().hash(state);
    }
}

impl Ord for Period {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            Ordering::Equal
        } else if self.end() < other.start() {
            Ordering::Less
        } else if self.start() > other.end() {
            Ordering::Greater
        } else {
            (self.year, self.month).cmp(&(other.year, other.month))
        }
    }
}

impl PartialOrd for Period {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Parses `YYYY-MM` or `YYYYMM`. Only the shape and month are checked here;
/// year bounds are enforced by [`PeriodBounds::parse`].
impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PeriodError::Malformed(s.to_string());
        let trimmed = s.trim();
        if !trimmed.is_ascii() {
            return Err(malformed());
        }
        let (year, month) = match trimmed.len() {
            7 if trimmed.as_bytes()[4] == b'-' => (&trimmed[..4], &trimmed[5..]),
            6 => (&trimmed[..4], &trimmed[4..]),
            _ => return Err(malformed()),
        };
        if !year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let year: i32 = year.parse().map_err(|_| malformed())?;
        let month: u32 = month.parse().map_err(|_| malformed())?;
        if !(1..=12).contains(&month) {
            return Err(malformed());
        }
        Ok(Period::unchecked(year, month))
    }
}

impl TryFrom<String> for Period {
    type Error = PeriodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.strid()
    }
}

/// Inclusive year range in which periods may exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodBounds {
    pub min_year: i32,
    pub max_year: i32,
}

impl Default for PeriodBounds {
    fn default() -> Self {
        Self {
            min_year: 2014,
            max_year: 2030,
        }
    }
}

impl PeriodBounds {
    #[must_use]
    pub fn new(min_year: i32, max_year: i32) -> Self {
        Self { min_year, max_year }
    }

    fn out_of_range(&self, year: i32, month: u32) -> PeriodError {
        PeriodError::OutOfRange {
            year,
            month,
            min_year: self.min_year,
            max_year: self.max_year,
        }
    }

    /// Build a period, checking year bounds and month range.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::OutOfRange`] outside the bounds or for a month
    /// not in `1..=12`.
    pub fn period(&self, year: i32, month: u32) -> Result<Period, PeriodError> {
        if year < self.min_year || year > self.max_year || !(1..=12).contains(&month) {
            return Err(self.out_of_range(year, month));
        }
        Ok(Period::unchecked(year, month))
    }

    /// Parse a `YYYY-MM`/`YYYYMM` identifier and check it against the bounds.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::Malformed`] or [`PeriodError::OutOfRange`].
    pub fn parse(&self, s: &str) -> Result<Period, PeriodError> {
        let p: Period = s.parse()?;
        self.check(p)
    }

    /// Re-check a period (e.g. one deserialized from storage).
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::OutOfRange`] if `p` is outside the bounds.
    pub fn check(&self, p: Period) -> Result<Period, PeriodError> {
        self.period(p.year, p.month)
    }

    /// The period containing `instant`.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::OutOfRange`] if that month is outside the bounds.
    pub fn containing(&self, instant: DateTime<Utc>) -> Result<Period, PeriodError> {
        self.period(instant.year(), instant.month())
    }

    /// The current period as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::OutOfRange`] if `now` is outside the bounds.
    pub fn current(&self, now: DateTime<Utc>) -> Result<Period, PeriodError> {
        self.containing(now)
    }

    #[must_use]
    pub fn first(&self) -> Period {
        Period::unchecked(self.min_year, 1)
    }

    #[must_use]
    pub fn last(&self) -> Period {
        Period::unchecked(self.max_year, 12)
    }

    /// Ordered inclusive sequence from `from` to `to`.
    ///
    /// Stops at the upper bound rather than failing.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::InvalidRange`] if `from > to`.
    pub fn all_from(&self, from: Period, to: Period) -> Result<Vec<Period>, PeriodError> {
        if from > to {
            return Err(PeriodError::InvalidRange {
                from: from.strid(),
                to: to.strid(),
            });
        }
        let mut periods = Vec::new();
        let mut period = from;
        while period <= to {
            periods.push(period);
            match period.following(self) {
                Ok(next) => period = next,
                Err(_) => break,
            }
        }
        Ok(periods)
    }

    /// Like [`all_from`](Self::all_from) with the current period as the end.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::OutOfRange`] if `now` is out of bounds, or
    /// [`PeriodError::InvalidRange`] if `from` is in the future.
    pub fn all_till(&self, from: Period, now: DateTime<Utc>) -> Result<Vec<Period>, PeriodError> {
        let to = self.current(now)?;
        self.all_from(from, to)
    }

    /// The twelve months of `year`.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::OutOfRange`] if the year is outside the bounds.
    pub fn year(&self, year: i32) -> Result<Vec<Period>, PeriodError> {
        self.all_from(self.period(year, 1)?, self.period(year, 12)?)
    }
}
