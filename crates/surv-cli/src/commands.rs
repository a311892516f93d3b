//! Command implementations. Each returns the text printed on stdout.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use surv_core::config::Config;
use surv_core::hierarchy::EntityTree;
use surv_core::indicator::Indicator;
use surv_core::record::{Actor, DataRecord};
use surv_core::submission::SubmissionRow;
use surv_metrics::{
    format_report, refresh_all, ArrivalEngine, CacheKey, CacheStore, Completeness,
    CompletenessPoint, IndicatorScope, OutputFormat, Report, SeriesPoint,
};
use surv_store::{IngestOptions, RecordStore};

/// Resolved configuration and clock for one invocation.
pub struct Context {
    config: Config,
    config_path: PathBuf,
    now: DateTime<Utc>,
}

impl Context {
    /// Resolve the configuration. Relative paths in it are taken from the
    /// directory holding the file.
    pub fn new(path: Option<&Path>, now: DateTime<Utc>) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().context("cannot read the working directory")?;
        let (config_path, config) =
            Config::resolve(path, &cwd).context("cannot load the configuration")?;
        Ok(Self {
            config,
            config_path,
            now,
        })
    }

    fn store(&self) -> anyhow::Result<RecordStore> {
        RecordStore::open(&self.config.database, self.config.periods)
            .with_context(|| format!("cannot open {}", self.config.database.display()))
    }

    fn cache(&self) -> anyhow::Result<CacheStore> {
        CacheStore::open(&self.config.cache_database)
            .with_context(|| format!("cannot open {}", self.config.cache_database.display()))
    }

    fn hierarchy(&self) -> anyhow::Result<EntityTree> {
        EntityTree::load(&self.config.hierarchy)
            .with_context(|| format!("cannot load hierarchy {}", self.config.hierarchy.display()))
    }

    fn view(&self, store: &RecordStore, record: &DataRecord) -> anyhow::Result<String> {
        let indicator = store.require_indicator(record.indicator())?;
        to_json(&record.view(&indicator, self.config.locale))
    }
}

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[derive(Serialize)]
struct InitSummary<'a> {
    config: &'a Path,
    database: &'a Path,
    cache_database: &'a Path,
    created_config: bool,
}

pub fn init(ctx: &Context) -> anyhow::Result<String> {
    let created_config = !ctx.config_path.exists();
    if created_config {
        std::fs::write(&ctx.config_path, Config::default().to_toml()?)
            .with_context(|| format!("cannot write {}", ctx.config_path.display()))?;
    }
    ctx.store()?;
    ctx.cache()?;
    info!(config = %ctx.config_path.display(), "initialized");
    to_json(&InitSummary {
        config: &ctx.config_path,
        database: &ctx.config.database,
        cache_database: &ctx.config.cache_database,
        created_config,
    })
}

pub fn load_indicators(ctx: &Context, file: &Path) -> anyhow::Result<String> {
    let indicators = Indicator::load_all(file)
        .with_context(|| format!("cannot load indicators from {}", file.display()))?;
    let store = ctx.store()?;
    for indicator in &indicators {
        store.upsert_indicator(indicator)?;
    }
    info!(count = indicators.len(), "indicators loaded");
    let slugs: Vec<&str> = indicators.iter().map(|i| i.slug.as_str()).collect();
    to_json(&serde_json::json!({ "loaded": slugs.len(), "indicators": slugs }))
}

pub fn ingest(
    ctx: &Context,
    file: &Path,
    feed: bool,
    auto_validate: bool,
    actor: &str,
) -> anyhow::Result<String> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let rows: Vec<SubmissionRow> = serde_yaml::from_str(&content)
        .with_context(|| format!("{} is not a list of submission rows", file.display()))?;

    let mut options = if feed {
        IngestOptions::feed(ctx.now)
    } else {
        IngestOptions::upload(Actor::new(actor), ctx.now)
    };
    if auto_validate {
        options = options.auto_validated();
    }

    let hierarchy = ctx.hierarchy()?;
    let mut store = ctx.store()?;
    let report = store.ingest(rows, &hierarchy, &options)?;
    to_json(&report)
}

pub fn validate(ctx: &Context, id: i64, actor: &str) -> anyhow::Result<String> {
    let store = ctx.store()?;
    let record = store.validate_record(id, Actor::new(actor), ctx.now)?;
    ctx.view(&store, &record)
}

pub fn reject(ctx: &Context, id: i64, actor: &str) -> anyhow::Result<String> {
    let store = ctx.store()?;
    let record = store.reject_record(id, Actor::new(actor), ctx.now)?;
    ctx.view(&store, &record)
}

pub fn edit(
    ctx: &Context,
    id: i64,
    numerator: f64,
    denominator: f64,
    actor: &str,
) -> anyhow::Result<String> {
    let store = ctx.store()?;
    let record = store.edit_record(id, Actor::new(actor), ctx.now, numerator, denominator)?;
    ctx.view(&store, &record)
}

pub fn record(ctx: &Context, id: i64) -> anyhow::Result<String> {
    let store = ctx.store()?;
    let record = store.require_record(id)?;
    ctx.view(&store, &record)
}

pub fn auto_validate(ctx: &Context) -> anyhow::Result<String> {
    let mut store = ctx.store()?;
    let report = store.auto_validate_due(ctx.now)?;
    to_json(&report)
}

pub fn completeness(
    ctx: &Context,
    entity: &str,
    period: &str,
    indicator: Option<&str>,
    points: bool,
    format: OutputFormat,
) -> anyhow::Result<String> {
    let store = ctx.store()?;
    let hierarchy = ctx.hierarchy()?;
    let cache = ctx.cache()?;
    let engine = ArrivalEngine::new(&store, &hierarchy);
    let period = store.bounds().parse(period)?;

    let report = if points {
        let key = CacheKey::completeness_points(entity, period);
        let points: Vec<CompletenessPoint> = cache
            .get_or_compute(&key, ctx.now, || engine.completeness_points_for(entity, period))?
            .ok_or_else(|| anyhow!("cache entry {key} could not be read back"))?;
        Report::points(&points)
    } else {
        let (key, completeness) = match indicator {
            Some(slug) => {
                let indicator = store.require_indicator(slug)?;
                let key = CacheKey::completeness(
                    entity,
                    period,
                    IndicatorScope::One(indicator.slug.clone()),
                );
                let value: Option<Completeness> = cache.get_or_compute(&key, ctx.now, || {
                    engine.completeness_for_period(&indicator, entity, period)
                })?;
                (key, value)
            }
            None => {
                let key = CacheKey::completeness(entity, period, IndicatorScope::All);
                let value: Option<Completeness> = cache.get_or_compute(&key, ctx.now, || {
                    engine.avg_arrival_for_period(entity, period)
                })?;
                (key, value)
            }
        };
        let completeness =
            completeness.ok_or_else(|| anyhow!("cache entry {key} could not be read back"))?;
        Report::completeness(entity, &period.strid(), &completeness)
    };

    Ok(format_report(&report, format))
}

pub fn series(
    ctx: &Context,
    entity: &str,
    from: &str,
    to: &str,
    indicator: &str,
    format: OutputFormat,
) -> anyhow::Result<String> {
    let store = ctx.store()?;
    let hierarchy = ctx.hierarchy()?;
    let cache = ctx.cache()?;
    let engine = ArrivalEngine::new(&store, &hierarchy);
    let bounds = store.bounds();
    let (from, to) = (bounds.parse(from)?, bounds.parse(to)?);
    let periods = bounds.all_from(from, to)?;
    let indicator = store.require_indicator(indicator)?;

    let key = CacheKey::arrival_series(entity, from, to, &indicator.slug);
    let series: Vec<SeriesPoint> = cache
        .get_or_compute(&key, ctx.now, || {
            engine.agg_arrival_for_periods(&indicator, entity, &periods)
        })?
        .ok_or_else(|| anyhow!("cache entry {key} could not be read back"))?;
    Ok(format_report(&Report::series(&series), format))
}

pub fn refresh_cache(ctx: &Context) -> anyhow::Result<String> {
    let store = ctx.store()?;
    let hierarchy = ctx.hierarchy()?;
    let cache = ctx.cache()?;
    let engine = ArrivalEngine::new(&store, &hierarchy);
    let report = refresh_all(&engine, &cache, ctx.config.cache.live_window, ctx.now)?;
    to_json(&report)
}
