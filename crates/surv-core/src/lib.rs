//! # surv-core
//!
//! Core types for the surveillance reporting engine.
//!
//! This crate defines the foundational types used across all other surv crates:
//! - [`Period`] and [`PeriodBounds`] — calendar months and period arithmetic
//! - [`Indicator`] — per-metric configuration, value computation and formatting
//! - [`Hierarchy`] and [`EntityTree`] — read-only navigation of the entity tree
//! - [`DataRecord`] — one observation and its validation/arrival state machine
//! - [`SubmissionCheck`] — row-level checking of submitted data
//! - [`Config`] — `surv.toml` configuration
//! - Error hierarchy ([`SurvError`], [`PeriodError`], [`ValueError`], ...)

pub mod config;
pub mod error;
pub mod format;
pub mod hierarchy;
pub mod indicator;
pub mod period;
pub mod record;
pub mod submission;

pub use config::Config;
pub use error::{
    AggregationError, PeriodError, Result, SurvError, TransitionError, ValueError,
};
pub use format::{Locale, NumberFormat};
pub use hierarchy::{Entity, EntityTree, Hierarchy, Level, LEVELS};
pub use indicator::{CollectionType, Indicator, IndicatorType, Origin, ValueFormat};
pub use period::{Period, PeriodBounds};
pub use record::{
    Actor, ArrivalStatus, DataRecord, RecordKey, RecordParts, RecordView, Source,
    ValidationStatus,
};
pub use submission::{
    CheckedBatch, RawValue, RowError, RowErrorKind, Submission, SubmissionCheck, SubmissionRow,
};
