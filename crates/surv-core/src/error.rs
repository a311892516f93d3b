//! Error types for surv.

use thiserror::Error;

/// Top-level result type for surv operations.
pub type Result<T> = std::result::Result<T, SurvError>;

/// Top-level error type for surv.
#[derive(Debug, Error)]
pub enum SurvError {
    #[error("period error: {0}")]
    Period(#[from] PeriodError),

    #[error("value error: {0}")]
    Value(#[from] ValueError),

    #[error("transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("hierarchy error: {0}")]
    Hierarchy(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors related to period construction and arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodError {
    #[error("period {year}-{month:02} is outside the configured bounds ({min_year}..={max_year})")]
    OutOfRange {
        year: i32,
        month: u32,
        min_year: i32,
        max_year: i32,
    },

    #[error("invalid range: {from} is after {to}")]
    InvalidRange { from: String, to: String },

    #[error("malformed period identifier '{0}': expected YYYY-MM or YYYYMM")]
    Malformed(String),
}

/// Errors raised while computing an indicator value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("division by zero: denominator is 0")]
    DivisionByZero,
}

/// Commands the record state machine refuses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("validation deadline for record {record} has not passed (deadline: {deadline})")]
    DeadlineNotReached { record: String, deadline: String },

    #[error("record {0} has no validation deadline")]
    NoDeadline(String),

    #[error("record {record} is {status}, only records awaiting review can be auto-validated")]
    NotPending { record: String, status: String },
}

/// Errors raised by the aggregation engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("no entities expected to report indicator '{indicator}' at '{entity}'")]
    NoExpectedEntities { indicator: String, entity: String },

    #[error("unknown entity: {0}")]
    UnknownEntity(String),
}
