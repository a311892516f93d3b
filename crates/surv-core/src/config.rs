//! Configuration loaded from `surv.toml`.
//!
//! Every key has a default, so an absent file is the same as an empty one.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SurvError};
use crate::format::Locale;
use crate::period::PeriodBounds;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "surv.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relational store holding periods, indicators and records.
    pub database: PathBuf,
    /// Key-value store for computed aggregation results.
    pub cache_database: PathBuf,
    /// YAML/JSON export of the entity tree.
    pub hierarchy: PathBuf,
    pub locale: Locale,
    pub periods: PeriodBounds,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Most recent periods always recomputed by the maintenance sweep.
    pub live_window: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { live_window: 4 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("surv.db"),
            cache_database: PathBuf::from("surv-cache.db"),
            hierarchy: PathBuf::from("hierarchy.yaml"),
            locale: Locale::default(),
            periods: PeriodBounds::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Config`] if the TOML is invalid or the period
    /// bounds are inverted.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| SurvError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Load from a file.
    ///
    /// # Errors
    ///
    /// Returns [`SurvError::Io`] if the file cannot be read, or
    /// [`SurvError::Config`] if it is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Locate and load the configuration file: `path` when given, else
    /// `surv.toml` in `dir`. A missing file yields the defaults, so `init`
    /// can write it later. Relative paths are rooted at the file's directory.
    ///
    /// Returns the file location with the configuration.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn resolve(path: Option<&Path>, dir: &Path) -> Result<(PathBuf, Self)> {
        let file = path.map_or_else(|| dir.join(CONFIG_FILE), Path::to_path_buf);
        let base = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| dir.to_path_buf(), Path::to_path_buf);
        let config = if file.exists() {
            Self::load(&file)?
        } else {
            Self::default()
        };
        Ok((file, config.rooted_at(&base)))
    }

    /// Make relative paths relative to `base`.
    #[must_use]
    pub fn rooted_at(mut self, base: &Path) -> Self {
        for path in [&mut self.database, &mut self.cache_database, &mut self.hierarchy] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    fn check(&self) -> Result<()> {
        if self.periods.min_year > self.periods.max_year {
            return Err(SurvError::Config(format!(
                "periods.min_year ({}) is after periods.max_year ({})",
                self.periods.min_year, self.periods.max_year
            )));
        }
        if self.cache.live_window == 0 {
            return Err(SurvError::Config(
                "cache.live_window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`SurvError::Serialization`] if a value has no TOML form.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SurvError::Serialization(e.to_string()))
    }
}
