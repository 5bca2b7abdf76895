//! Typed view over the `settings` table of the config database.
//!
//! Values are stored as strings; [`Settings::load`] parses them, applies
//! defaults for anything unset, and lets a few `DOCSCOPE_*` environment
//! variables override the stored choice of embedding backend.

use std::{fmt, str::FromStr, time::Duration};

use serde::Serialize;

use crate::{
    chunking::DEFAULT_MAX_PASSAGE_CHARS,
    config_db::ConfigDb,
    embedding::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_IN_FLIGHT},
    error::{Error, Result},
};

pub const PROVIDER_KEY: &str = "provider";
pub const MODEL_KEY: &str = "model";
pub const ENDPOINT_KEY: &str = "endpoint";
pub const TIMEOUT_MS_KEY: &str = "timeout_ms";
pub const BATCH_SIZE_KEY: &str = "batch_size";
pub const MAX_IN_FLIGHT_KEY: &str = "max_in_flight";
pub const MAX_PASSAGE_CHARS_KEY: &str = "max_passage_chars";
pub const DIMENSION_KEY: &str = "dimension";
pub const MAX_DISTANCE_KEY: &str = "max_distance";

/// Every key accepted by `settings set`.
pub const KNOWN_KEYS: &[&str] = &[
    PROVIDER_KEY,
    MODEL_KEY,
    ENDPOINT_KEY,
    TIMEOUT_MS_KEY,
    BATCH_SIZE_KEY,
    MAX_IN_FLIGHT_KEY,
    MAX_PASSAGE_CHARS_KEY,
    DIMENSION_KEY,
    MAX_DISTANCE_KEY,
];

pub const PROVIDER_ENV_VAR: &str = "DOCSCOPE_PROVIDER";
pub const MODEL_ENV_VAR: &str = "DOCSCOPE_MODEL";
pub const ENDPOINT_ENV_VAR: &str = "DOCSCOPE_ENDPOINT";

pub const DEFAULT_HTTP_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_DIMENSION: usize = 256;

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local deterministic feature hashing; needs no network.
    Hashing,
    /// Remote embedding server over HTTP.
    Http,
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashing" => Ok(ProviderKind::Hashing),
            "http" => Ok(ProviderKind::Http),
            other => Err(Error::Config(format!(
                "unknown provider '{other}' (expected 'hashing' or 'http')"
            ))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderKind::Hashing => "hashing",
            ProviderKind::Http => "http",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub provider: ProviderKind,
    /// Model name sent to the HTTP backend. Ignored by the hashing backend.
    pub model: String,
    pub endpoint: String,
    pub timeout_ms: u64,
    pub batch_size: usize,
    pub max_in_flight: usize,
    pub max_passage_chars: usize,
    /// Vector length of the hashing backend.
    pub dimension: usize,
    /// Drop search results farther than this. Unset keeps everything.
    pub max_distance: Option<f32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Hashing,
            model: DEFAULT_HTTP_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_passage_chars: DEFAULT_MAX_PASSAGE_CHARS,
            dimension: DEFAULT_DIMENSION,
            max_distance: None,
        }
    }
}

impl Settings {
    /// Load settings from the config database and the process environment.
    pub fn load(db: &ConfigDb) -> Result<Self> {
        Self::load_with_env(db, |key| std::env::var(key).ok())
    }

    /// Like [`Settings::load`], reading environment overrides through `env`.
    pub fn load_with_env(
        db: &ConfigDb,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in db.list_settings()? {
            settings.apply(&key, &value)?;
        }

        for (var, key) in [
            (PROVIDER_ENV_VAR, PROVIDER_KEY),
            (MODEL_ENV_VAR, MODEL_KEY),
            (ENDPOINT_ENV_VAR, ENDPOINT_KEY),
        ] {
            if let Some(value) = env(var).filter(|v| !v.trim().is_empty()) {
                settings.apply(key, &value)?;
            }
        }

        Ok(settings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Parse `value` for `key` and store it. Unknown keys are ignored so a
    /// database written by a newer version still loads.
    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            PROVIDER_KEY => self.provider = value.parse()?,
            MODEL_KEY => self.model = value.trim().to_string(),
            ENDPOINT_KEY => {
                self.endpoint = value.trim().trim_end_matches('/').to_string()
            }
            TIMEOUT_MS_KEY => self.timeout_ms = parse_positive(key, value)?,
            BATCH_SIZE_KEY => self.batch_size = parse_positive(key, value)?,
            MAX_IN_FLIGHT_KEY => {
                self.max_in_flight = parse_positive(key, value)?
            }
            MAX_PASSAGE_CHARS_KEY => {
                self.max_passage_chars = parse_positive(key, value)?
            }
            DIMENSION_KEY => self.dimension = parse_positive(key, value)?,
            MAX_DISTANCE_KEY => {
                let distance: f32 = value.trim().parse().map_err(|_| {
                    Error::Config(format!("{key}: '{value}' is not a number"))
                })?;
                if !(0.0..=2.0).contains(&distance) {
                    return Err(Error::Config(format!(
                        "{key}: {distance} is outside 0.0..=2.0"
                    )));
                }
                self.max_distance = Some(distance);
            }
            _ => tracing::debug!(key, "ignoring unknown setting"),
        }
        Ok(())
    }
}

/// Validate a `settings set` request before it is stored.
pub fn validate(key: &str, value: &str) -> Result<()> {
    if !KNOWN_KEYS.contains(&key) {
        return Err(Error::NotFound {
            kind: "setting",
            name: key.to_string(),
        });
    }
    Settings::default().apply(key, value)
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(n) if n > T::default() => Ok(n),
        _ => Err(Error::Config(format!(
            "{key}: '{value}' is not a positive integer"
        ))),
    }
}
