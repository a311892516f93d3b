//! # surv-metrics
//!
//! Aggregation engine and computed-value cache for surv.
//!
//! Includes:
//! - [`ArrivalEngine`]: expected entities, completeness/promptness,
//!   weighted averages, series and per-child points
//! - [`CacheStore`]: typed, durable memoization of aggregation results
//! - [`sweep`]: maintenance refresh of the cache
//! - [`formatter`]: JSON, table and markdown rendering of results

pub mod arrivals;
pub mod cache;
pub mod formatter;
pub mod sweep;

pub use arrivals::{
    ArrivalEngine, ArrivalStats, Completeness, CompletenessPoint, SeriesPoint, ValueAggregate,
};
pub use cache::{CacheKey, CacheStore, ComputationKind, IndicatorScope};
pub use formatter::{format_report, OutputFormat, Report};
pub use sweep::{refresh_all, SweepReport};

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, TimeZone, Utc};

    use surv_core::format::NumberFormat;
    use surv_core::hierarchy::{Entity, EntityTree, Level};
    use surv_core::indicator::{CollectionType, Indicator, IndicatorType, Origin, ValueFormat};
    use surv_core::period::{Period, PeriodBounds};
    use surv_core::record::{Actor, RecordKey};
    use surv_core::submission::Submission;
    use surv_store::{IngestOptions, RecordStore};

    pub(crate) fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    pub(crate) fn april() -> Period {
        PeriodBounds::default().period(2023, 4).unwrap()
    }

    /// rdc > kinshasa (5 zones, one with an area) and katanga (2 zones).
    pub(crate) fn tree() -> EntityTree {
        let entity = |id: &str, level: Level, parent: Option<&str>| Entity {
            id: id.to_string(),
            name: id.to_uppercase(),
            level,
            parent: parent.map(str::to_string),
            code: None,
        };
        let mut entities = vec![
            entity("rdc", Level::Country, None),
            entity("kinshasa", Level::Province, Some("rdc")),
            entity("katanga", Level::Province, Some("rdc")),
        ];
        for zone in ["gombe", "limete", "lingwala", "masina", "ngaliema"] {
            entities.push(entity(zone, Level::Zone, Some("kinshasa")));
        }
        for zone in ["lubumbashi", "likasi"] {
            entities.push(entity(zone, Level::Zone, Some("katanga")));
        }
        entities.push(entity("gombe-a", Level::Area, Some("gombe")));
        EntityTree::new(entities).unwrap()
    }

    pub(crate) fn indicator(slug: &str, number: &str, level: Level) -> Indicator {
        Indicator {
            slug: slug.to_string(),
            number: number.to_string(),
            name: format!("Indicator {number}"),
            origin: Origin::Manual,
            itype: IndicatorType::Percentage,
            number_format: NumberFormat::OneDecimal,
            value_format: ValueFormat::Percent,
            collection_type: CollectionType::Routine,
            collection_level: level,
            collection_period: 1,
            transmission_delay: Some(45),
            prompt_transmission_delay: Some(15),
            validation_delay: Some(10),
        }
    }

    pub(crate) fn store_with(indicators: &[Indicator]) -> RecordStore {
        let store = RecordStore::in_memory(PeriodBounds::default()).unwrap();
        for indicator in indicators {
            store.upsert_indicator(indicator).unwrap();
        }
        store
    }

    /// Submit one record for April 2023 at `received`, then validate it.
    pub(crate) fn report(
        store: &mut RecordStore,
        indicator: &str,
        entity: &str,
        values: (f64, f64),
        received: DateTime<Utc>,
    ) -> i64 {
        let submission = Submission {
            ident: entity.to_string(),
            key: RecordKey {
                indicator: indicator.to_string(),
                period: april(),
                entity: entity.to_string(),
            },
            numerator: values.0,
            denominator: values.1,
        };
        let ingested = store
            .batch_ingest(
                &[submission],
                &IngestOptions::upload(Actor::new("partner-1"), received),
            )
            .unwrap();
        let id = ingested.rows[0].record_id;
        store
            .validate_record(id, Actor::new("reviewer"), received)
            .unwrap();
        id
    }

    /// The reference scenario: 5 zones in kinshasa, 3 reported, 2 on time.
    pub(crate) fn scenario() -> (RecordStore, Indicator) {
        let ind = indicator("malaria-cases", "01", Level::Zone);
        let mut store = store_with(std::slice::from_ref(&ind));
        report(&mut store, "malaria-cases", "gombe", (30.0, 120.0), utc(2023, 5, 3));
        report(&mut store, "malaria-cases", "limete", (10.0, 50.0), utc(2023, 5, 10));
        report(&mut store, "malaria-cases", "masina", (4.0, 40.0), utc(2023, 5, 25));
        (store, ind)
    }
}
