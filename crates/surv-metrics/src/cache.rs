//! Durable memoization of aggregation results.
//!
//! Entries never expire: they are overwritten by [`CacheStore::refresh`]
//! or by the maintenance [`sweep`](crate::sweep). Values are stored as
//! JSON in a separate SQLite file so the cache can be dropped at will.
//!
//! Concurrent misses on one key may both compute and write; the last write
//! wins, which is harmless since a computation only depends on the records.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use surv_core::error::{Result, SurvError};
use surv_core::period::Period;

fn cache_err(e: rusqlite::Error) -> SurvError {
    SurvError::Cache(e.to_string())
}

/// What a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationKind {
    /// [`Completeness`](crate::Completeness) of an entity for one period.
    Completeness,
    /// [`SeriesPoint`](crate::SeriesPoint)s over a period range.
    ArrivalSeries,
    /// [`CompletenessPoint`](crate::CompletenessPoint)s of an entity's children.
    CompletenessPoints,
}

impl ComputationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ComputationKind::Completeness => "completeness",
            ComputationKind::ArrivalSeries => "arrival_series",
            ComputationKind::CompletenessPoints => "completeness_points",
        }
    }
}

/// One indicator, or the weighted average of all routine ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorScope {
    All,
    One(String),
}

impl fmt::Display for IndicatorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorScope::All => f.write_str("-"),
            IndicatorScope::One(slug) => f.write_str(slug),
        }
    }
}

/// Typed key of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub kind: ComputationKind,
    pub entity: String,
    pub from: Period,
    pub to: Period,
    pub indicator: IndicatorScope,
}

impl CacheKey {
    #[must_use]
    pub fn completeness(entity: &str, period: Period, indicator: IndicatorScope) -> Self {
        Self {
            kind: ComputationKind::Completeness,
            entity: entity.to_string(),
            from: period,
            to: period,
            indicator,
        }
    }

    #[must_use]
    pub fn arrival_series(entity: &str, from: Period, to: Period, indicator: &str) -> Self {
        Self {
            kind: ComputationKind::ArrivalSeries,
            entity: entity.to_string(),
            from,
            to,
            indicator: IndicatorScope::One(indicator.to_string()),
        }
    }

    #[must_use]
    pub fn completeness_points(entity: &str, period: Period) -> Self {
        Self {
            kind: ComputationKind::CompletenessPoints,
            entity: entity.to_string(),
            from: period,
            to: period,
            indicator: IndicatorScope::All,
        }
    }

    /// Flat storage identifier, e.g. `completeness/kinshasa/2023-04_2023-04/-`.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!(
            "{}/{}/{}_{}/{}",
            self.kind.as_str(),
            self.entity,
            self.from,
            self.to,
            self.indicator
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Key-value store of computed results.
pub struct CacheStore {
    conn: Connection,
}

impl CacheStore {
    /// Open or create a cache database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Cache`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(cache_err)?;
        let cache = Self { conn };
        cache.create_schema()?;
        Ok(cache)
    }

    /// Create an in-memory cache (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Cache`] if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(cache_err)?;
        let cache = Self { conn };
        cache.create_schema()?;
        Ok(cache)
    }

    fn create_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                value TEXT NOT NULL,
                computed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_kind ON cache_entries(kind);
            ",
            )
            .map_err(cache_err)?;
        Ok(())
    }

    /// The stored value, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Cache`] on database failure and
    /// [`SurvError::Serialization`] if the value does not decode as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM cache_entries WHERE key = ?1",
                params![key.storage_key()],
                |row| row.get(0),
            )
            .optional()
            .map_err(cache_err)?;
        raw.map(|v| serde_json::from_str(&v).map_err(|e| SurvError::Serialization(e.to_string())))
            .transpose()
    }

    /// Store `value` under `key`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Serialization`] or [`SurvError::Cache`].
    pub fn put<T: Serialize>(&self, key: &CacheKey, value: &T, now: DateTime<Utc>) -> Result<()> {
        let json =
            serde_json::to_string(value).map_err(|e| SurvError::Serialization(e.to_string()))?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO cache_entries (key, kind, value, computed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.storage_key(), key.kind.as_str(), json, now.to_rfc3339()],
            )
            .map_err(cache_err)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`SurvError::Cache`] on database failure.
    pub fn cache_exists_for(&self, key: &CacheKey) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM cache_entries WHERE key = ?1)",
                params![key.storage_key()],
                |row| row.get(0),
            )
            .map_err(cache_err)
    }

    /// The cached value, computing and storing it on a miss.
    ///
    /// After a miss the entry is read back exactly once; if it is still
    /// missing the result is `None`.
    ///
    /// # Errors
    ///
    /// Propagates errors from `compute` and the cache database.
    pub fn get_or_compute<T, F>(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
        compute: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.get(key)? {
            debug!(%key, "cache hit");
            return Ok(Some(value));
        }
        debug!(%key, "cache miss");
        self.put(key, &compute()?, now)?;
        self.get(key)
    }

    /// Recompute and overwrite.
    ///
    /// # Errors
    ///
    /// Propagates errors from `compute` and the cache database.
    pub fn refresh<T, F>(&self, key: &CacheKey, now: DateTime<Utc>, compute: F) -> Result<T>
    where
        T: Serialize,
        F: FnOnce() -> Result<T>,
    {
        let value = compute()?;
        self.put(key, &value, now)?;
        Ok(value)
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Cache`] on database failure.
    pub fn len(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))
            .map_err(cache_err)?;
        Ok(count as u64)
    }

    /// # Errors
    ///
    /// Returns [`SurvError::Cache`] on database failure.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// When the entry was last computed.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Cache`] on database failure or a corrupt stamp.
    pub fn computed_at(&self, key: &CacheKey) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT computed_at FROM cache_entries WHERE key = ?1",
                params![key.storage_key()],
                |row| row.get(0),
            )
            .optional()
            .map_err(cache_err)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| SurvError::Cache(e.to_string()))
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrivals::{ArrivalEngine, Completeness};
    use crate::fixtures::{april, scenario, tree, utc};
    use std::cell::Cell;

    #[test]
    fn storage_key_names_every_parameter() {
        let key = CacheKey::completeness("kinshasa", april(), IndicatorScope::All);
        assert_eq!(key.storage_key(), "completeness/kinshasa/2023-04_2023-04/-");

        let key = CacheKey::completeness(
            "kinshasa",
            april(),
            IndicatorScope::One("malaria-cases".to_string()),
        );
        assert_eq!(
            key.storage_key(),
            "completeness/kinshasa/2023-04_2023-04/malaria-cases"
        );
    }

    #[test]
    fn get_or_compute_computes_once_on_miss() {
        let cache = CacheStore::in_memory().unwrap();
        let key = CacheKey::completeness_points("rdc", april());
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok(vec![1_u32, 2, 3])
        };

        let first: Option<Vec<u32>> = cache.get_or_compute(&key, utc(2023, 5, 1), compute).unwrap();
        let second: Option<Vec<u32>> = cache
            .get_or_compute(&key, utc(2023, 5, 2), || {
                calls.set(calls.get() + 1);
                Ok(vec![9])
            })
            .unwrap();

        assert_eq!(first, Some(vec![1, 2, 3]));
        assert_eq!(second, Some(vec![1, 2, 3]));
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.computed_at(&key).unwrap(), Some(utc(2023, 5, 1)));
    }

    #[test]
    fn refresh_overwrites() {
        let cache = CacheStore::in_memory().unwrap();
        let key = CacheKey::completeness("rdc", april(), IndicatorScope::All);
        cache.put(&key, &1_u32, utc(2023, 5, 1)).unwrap();

        let fresh = cache.refresh(&key, utc(2023, 5, 2), || Ok(2_u32)).unwrap();
        assert_eq!(fresh, 2);
        assert_eq!(cache.get::<u32>(&key).unwrap(), Some(2));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn compute_errors_propagate_and_store_nothing() {
        let cache = CacheStore::in_memory().unwrap();
        let key = CacheKey::completeness("rdc", april(), IndicatorScope::All);
        let result: Result<Option<u32>> = cache.get_or_compute(&key, utc(2023, 5, 1), || {
            Err(SurvError::NotFound("indicator".to_string()))
        });
        assert!(result.is_err());
        assert!(!cache.cache_exists_for(&key).unwrap());
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn caches_engine_results() {
        let (store, ind) = scenario();
        let tree = tree();
        let engine = ArrivalEngine::new(&store, &tree);
        let cache = CacheStore::in_memory().unwrap();
        let key = CacheKey::completeness(
            "kinshasa",
            april(),
            IndicatorScope::One(ind.slug.clone()),
        );

        let value: Option<Completeness> = cache
            .get_or_compute(&key, utc(2023, 6, 1), || {
                engine.completeness_for_period(&ind, "kinshasa", april())
            })
            .unwrap();
        let stats = value.unwrap();
        assert_eq!(stats.stats().unwrap().completeness, 0.6);
        assert_eq!(cache.get::<Completeness>(&key).unwrap(), Some(stats));
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let key = CacheKey::completeness("rdc", april(), IndicatorScope::All);
        CacheStore::open(&path)
            .unwrap()
            .put(&key, &"cached", utc(2023, 5, 1))
            .unwrap();
        let cache = CacheStore::open(&path).unwrap();
        assert_eq!(cache.get::<String>(&key).unwrap().as_deref(), Some("cached"));
    }
}
