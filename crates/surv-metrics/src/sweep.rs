//! Cache maintenance.
//!
//! Recomputes completeness for every top-level entity below the root,
//! every period up to now and every indicator plus the all-indicator
//! average, along with per-child points and per-indicator series. Entries
//! for periods older than the live window are frozen: they are only
//! computed when missing, so a killed sweep is cheap to re-run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use surv_core::error::Result;
use surv_core::hierarchy::Hierarchy;

use crate::arrivals::ArrivalEngine;
use crate::cache::{CacheKey, CacheStore, IndicatorScope};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub computed: usize,
    pub skipped: usize,
}

struct Sweeper<'c> {
    cache: &'c CacheStore,
    now: DateTime<Utc>,
    report: SweepReport,
}

impl Sweeper<'_> {
    fn refresh<T, F>(&mut self, key: CacheKey, frozen: bool, compute: F) -> Result<()>
    where
        T: Serialize,
        F: FnOnce() -> Result<T>,
    {
        if frozen && self.cache.cache_exists_for(&key)? {
            debug!(%key, "frozen entry kept");
            self.report.skipped += 1;
            return Ok(());
        }
        self.cache.refresh(&key, self.now, compute)?;
        self.report.computed += 1;
        Ok(())
    }
}

/// Refresh the whole cache.
///
/// The last `live_window` periods are always recomputed.
///
/// # Errors
///
/// Propagates store, cache and aggregation errors; entries already written
/// stay written.
pub fn refresh_all<H: Hierarchy + ?Sized>(
    engine: &ArrivalEngine<'_, H>,
    cache: &CacheStore,
    live_window: usize,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let store = engine.store();
    let periods = store.all_periods_till(now)?;
    let indicators = store.indicators()?;
    let Some(root) = engine.hierarchy().root() else {
        return Ok(SweepReport::default());
    };
    let top_level = engine.hierarchy().children(&root.id);
    let frozen_before = periods.len().saturating_sub(live_window);

    info!(
        periods = periods.len(),
        entities = top_level.len(),
        indicators = indicators.len(),
        "refreshing computed-value cache"
    );

    let mut sweeper = Sweeper {
        cache,
        now,
        report: SweepReport::default(),
    };

    for (index, &period) in periods.iter().enumerate() {
        let frozen = index < frozen_before;
        for entity in &top_level {
            let id = entity.id.as_str();
            for indicator in &indicators {
                sweeper.refresh(
                    CacheKey::completeness(id, period, IndicatorScope::One(indicator.slug.clone())),
                    frozen,
                    || engine.completeness_for_period(indicator, id, period),
                )?;
            }
            sweeper.refresh(
                CacheKey::completeness(id, period, IndicatorScope::All),
                frozen,
                || engine.avg_arrival_for_period(id, period),
            )?;
            sweeper.refresh(
                CacheKey::completeness_points(id, period),
                frozen,
                || engine.completeness_points_for(id, period),
            )?;
        }
    }

    if let (Some(&first), Some(&last)) = (periods.first(), periods.last()) {
        for entity in &top_level {
            for indicator in &indicators {
                sweeper.refresh(
                    CacheKey::arrival_series(&entity.id, first, last, &indicator.slug),
                    false,
                    || engine.agg_arrival_for_periods(indicator, &entity.id, &periods),
                )?;
            }
        }
    }

    let report = sweeper.report;
    info!(
        computed = report.computed,
        skipped = report.skipped,
        "cache refreshed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrivals::{Completeness, CompletenessPoint, SeriesPoint};
    use crate::fixtures::{april, scenario, tree, utc};

    #[test]
    fn first_sweep_computes_everything() {
        let (store, ind) = scenario();
        let tree = tree();
        let engine = ArrivalEngine::new(&store, &tree);
        let cache = CacheStore::in_memory().unwrap();

        // Periods 2023-04..=2023-06, provinces katanga and kinshasa, one indicator.
        let report = refresh_all(&engine, &cache, 4, utc(2023, 6, 15)).unwrap();
        // Per period and province: one indicator, the average and the points.
        assert_eq!(report.computed, 3 * 2 * 3 + 2);
        assert_eq!(report.skipped, 0);

        let key = CacheKey::completeness("kinshasa", april(), IndicatorScope::One(ind.slug.clone()));
        let cached: Completeness = cache.get(&key).unwrap().unwrap();
        assert_eq!(cached.stats().unwrap().completeness, 0.6);

        let points: Vec<CompletenessPoint> = cache
            .get(&CacheKey::completeness_points("kinshasa", april()))
            .unwrap()
            .unwrap();
        assert_eq!(points.len(), 5);

        let bounds = store.bounds();
        let series_key = CacheKey::arrival_series(
            "kinshasa",
            april(),
            bounds.period(2023, 6).unwrap(),
            &ind.slug,
        );
        let series: Vec<SeriesPoint> = cache.get(&series_key).unwrap().unwrap();
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn periods_outside_the_live_window_are_frozen() {
        let (store, _) = scenario();
        let tree = tree();
        let engine = ArrivalEngine::new(&store, &tree);
        let cache = CacheStore::in_memory().unwrap();

        refresh_all(&engine, &cache, 1, utc(2023, 6, 15)).unwrap();
        let report = refresh_all(&engine, &cache, 1, utc(2023, 6, 16)).unwrap();

        // 2023-04 and 2023-05 are frozen; 2023-06 and the series are recomputed.
        assert_eq!(report.skipped, 2 * 2 * 3);
        assert_eq!(report.computed, 2 * 3 + 2);

        let key = CacheKey::completeness("kinshasa", april(), IndicatorScope::All);
        assert_eq!(cache.computed_at(&key).unwrap(), Some(utc(2023, 6, 15)));
    }

    #[test]
    fn empty_store_sweeps_nothing() {
        let store = crate::fixtures::store_with(&[]);
        let tree = tree();
        let engine = ArrivalEngine::new(&store, &tree);
        let cache = CacheStore::in_memory().unwrap();

        let report = refresh_all(&engine, &cache, 4, utc(2023, 6, 15)).unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(cache.is_empty().unwrap());
    }
}
