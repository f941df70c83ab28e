//! # cf-config
//!
//! Layered settings for the campus feed binary.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. `campus-feed.toml` in the working directory (optional)
//! 3. environment variables prefixed `CAMPUS_FEED__`, nesting with `__`
//!    (e.g. `CAMPUS_FEED__BACKEND__PROJECT_ID`). A `.env` file is read first.

use std::path::Path;
use std::time::Duration;

use cf_core::models::Space;
use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_FILE: &str = "campus-feed.toml";
pub const ENV_PREFIX: &str = "CAMPUS_FEED";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

#[derive(Debug, Deserialize)]
pub struct BackendSettings {
    pub project_id: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    pub auth_domain: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedSettings {
    /// Space names to subscribe to.
    pub spaces: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerificationSettings {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize)]
pub struct PollSettings {
    /// Uids allowed to delete polls.
    #[serde(default)]
    pub admins: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LinkSettings {
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

#[derive(Debug, Deserialize)]
pub struct LogSettings {
    /// `EnvFilter` directive, used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub backend: BackendSettings,
    pub feed: FeedSettings,
    pub verification: VerificationSettings,
    pub polls: PollSettings,
    pub links: LinkSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Loads `.env`, the default file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::from_sources(Some(Path::new(DEFAULT_FILE)), None)
    }

    /// Builds settings from an optional TOML file and either the process
    /// environment or, when given, an explicit variable map.
    pub fn from_sources(
        file: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("backend.project_id", "campus-feed-dev")?
            .set_default("backend.auth_domain", "localhost")?
            .set_default(
                "feed.spaces",
                Space::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            )?
            .set_default("verification.poll_interval_ms", 2_000)?
            .set_default("verification.max_attempts", 150)?
            .set_default("polls.admins", Vec::<String>::new())?
            .set_default("links.base_url", "http://localhost:3000")?
            .set_default("log.level", "info")?
            .set_default("log.format", "plain")?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("feed.spaces")
                    .with_list_parse_key("polls.admins")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.project_id.trim().is_empty() {
            return Err(invalid("backend.project_id", "must not be empty"));
        }
        self.spaces()?;
        if self.verification.poll_interval_ms == 0 {
            return Err(invalid("verification.poll_interval_ms", "must be positive"));
        }
        if self.verification.max_attempts == 0 {
            return Err(invalid("verification.max_attempts", "must be positive"));
        }
        Ok(())
    }

    /// Configured spaces, parsed. An empty list means every space.
    pub fn spaces(&self) -> Result<Vec<Space>, ConfigError> {
        if self.feed.spaces.is_empty() {
            return Ok(Space::ALL.to_vec());
        }
        self.feed
            .spaces
            .iter()
            .map(|name| {
                name.trim()
                    .parse::<Space>()
                    .map_err(|e| invalid("feed.spaces", e.to_string()))
            })
            .collect()
    }

    pub fn verification_interval(&self) -> Duration {
        Duration::from_millis(self.verification.poll_interval_ms)
    }
}
