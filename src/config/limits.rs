//! Thread-limit configuration and the sources that supply it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::{AppResult, ConfigError};

/// Default minimum worker count.
pub const DEFAULT_MIN_THREADS: u32 = 20;
/// Default maximum worker count.
pub const DEFAULT_MAX_THREADS: u32 = 20;

/// Worker-count bounds for an affinity pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadLimits {
    /// Workers created at construction.
    pub min_threads: u32,
    /// Upper bound on workers.
    pub max_threads: u32,
}

impl Default for ThreadLimits {
    fn default() -> Self {
        Self {
            min_threads: DEFAULT_MIN_THREADS,
            max_threads: DEFAULT_MAX_THREADS,
        }
    }
}

impl ThreadLimits {
    /// Build limits from explicit values.
    #[must_use]
    pub const fn new(min_threads: u32, max_threads: u32) -> Self {
        Self {
            min_threads,
            max_threads,
        }
    }

    /// A fixed-size pool of `threads` workers.
    #[must_use]
    pub const fn fixed(threads: u32) -> Self {
        Self::new(threads, threads)
    }

    /// Validate that both bounds are positive and ordered.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_threads == 0 {
            return Err(ConfigError::NotPositive("min_threads"));
        }
        if self.max_threads == 0 {
            return Err(ConfigError::NotPositive("max_threads"));
        }
        if self.min_threads > self.max_threads {
            return Err(ConfigError::InvertedLimits {
                min: self.min_threads,
                max: self.max_threads,
            });
        }
        Ok(())
    }

    /// Parse limits from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] on malformed input, or a validation error.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let limits: Self =
            serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        limits.validate()?;
        Ok(limits)
    }
}

/// Supplies thread limits, read once when a pool is constructed.
pub trait ThreadLimitsSource {
    /// Current thread limits.
    fn thread_limits(&self) -> ThreadLimits;
}

impl ThreadLimitsSource for ThreadLimits {
    fn thread_limits(&self) -> ThreadLimits {
        *self
    }
}

/// Thread limits backed by a JSON file.
///
/// A missing or empty file is replaced with the defaults; an unreadable or
/// invalid file is left untouched and the defaults are used.
#[derive(Debug, Clone)]
pub struct JsonFileLimits {
    path: PathBuf,
    limits: ThreadLimits,
}

impl JsonFileLimits {
    /// Environment variable overriding `min_threads`.
    pub const MIN_THREADS_ENV: &'static str = "AFFINITY_SYNC_MIN_THREADS";
    /// Environment variable overriding `max_threads`.
    pub const MAX_THREADS_ENV: &'static str = "AFFINITY_SYNC_MAX_THREADS";

    /// Load limits from `path`, falling back to (and persisting) defaults.
    pub fn load_or_init(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let limits = match read_limits(&path) {
            Ok(Some(limits)) => limits,
            Ok(None) => {
                let defaults = ThreadLimits::default();
                if let Err(err) = write_limits(&path, &defaults) {
                    debug!(path = %path.display(), error = %format!("{err:#}"), "could not persist default thread limits");
                }
                defaults
            }
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "invalid thread limits file, using defaults");
                ThreadLimits::default()
            }
        };
        Self { path, limits }
    }

    /// Apply `AFFINITY_SYNC_MIN_THREADS` / `AFFINITY_SYNC_MAX_THREADS`
    /// overrides from the environment (a `.env` file is loaded first if
    /// present). Overrides that do not validate are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        let _ = dotenvy::dotenv();
        let mut limits = self.limits;
        if let Some(min) = env_u32(Self::MIN_THREADS_ENV) {
            limits.min_threads = min;
        }
        if let Some(max) = env_u32(Self::MAX_THREADS_ENV) {
            limits.max_threads = max;
        }
        match limits.validate() {
            Ok(()) => self.limits = limits,
            Err(err) => warn!(error = %err, "ignoring thread limit overrides"),
        }
        self
    }

    /// Path backing these limits.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current limits back to the file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be serialized or written.
    pub fn save(&self) -> AppResult<()> {
        write_limits(&self.path, &self.limits)
    }
}

impl ThreadLimitsSource for JsonFileLimits {
    fn thread_limits(&self) -> ThreadLimits {
        self.limits
    }
}

/// `Ok(None)` when there is nothing to load.
fn read_limits(path: &Path) -> AppResult<Option<ThreadLimits>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    let limits: ThreadLimits = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    if let Err(err) = limits.validate() {
        bail!("{}: {err}", path.display());
    }
    Ok(Some(limits))
}

fn write_limits(path: &Path, limits: &ThreadLimits) -> AppResult<()> {
    let content = serde_json::to_string_pretty(limits)?;
    fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn env_u32(name: &str) -> Option<u32> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(variable = name, value = %raw, error = %err, "ignoring non-numeric override");
            None
        }
    }
}
