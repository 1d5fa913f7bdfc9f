//! Configuration loaded from the environment.

use anyhow::{Context, anyhow};
use chrono_tz::Tz;
use custom_debug_derive::Debug;
use figment::{Figment, providers::Env};
use fundu::DurationParser;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::gate::{DEFAULT_MAX_AGE, DEFAULT_MIN_INTERVAL};
use crate::policy::{AttendancePolicy, DEFAULT_ATTENDANCE_THRESHOLD};

/// Every field maps to the upper-cased environment variable of the same name
/// (`VTOP_BASE_URL`, `CACHE_MAX_AGE`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub vtop_base_url: String,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub vtop_username: Option<String>,
    #[debug(skip)]
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub vtop_password: Option<String>,
    #[serde(default = "default_session_file")]
    pub vtop_session_file: PathBuf,
    /// Last export document per identity, reused across runs.
    #[serde(default = "default_cache_file")]
    pub vtop_cache_file: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_request_timeout", deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
    #[serde(default = "default_cache_max_age", deserialize_with = "deserialize_duration")]
    pub cache_max_age: Duration,
    #[serde(default = "default_min_request_interval", deserialize_with = "deserialize_duration")]
    pub min_request_interval: Duration,
    #[serde(default = "default_attendance_threshold")]
    pub attendance_threshold: f64,
    /// How many terms back a "latest" request may fall. Unset means all.
    #[debug(with = crate::fmt::opt)]
    #[serde(default)]
    pub fallback_depth: Option<usize>,
    #[serde(default = "default_portal_timezone")]
    pub portal_timezone: String,
}

fn default_base_url() -> String {
    "https://vtop.vit.ac.in".to_owned()
}

fn default_session_file() -> PathBuf {
    PathBuf::from("vtop-session.json")
}

fn default_cache_file() -> PathBuf {
    PathBuf::from("vtop-cache.json")
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_cache_max_age() -> Duration {
    DEFAULT_MAX_AGE
}

fn default_min_request_interval() -> Duration {
    DEFAULT_MIN_INTERVAL
}

fn default_attendance_threshold() -> f64 {
    DEFAULT_ATTENDANCE_THRESHOLD
}

fn default_portal_timezone() -> String {
    "Asia/Kolkata".to_owned()
}

impl Config {
    pub fn figment() -> Figment {
        Figment::new().merge(Env::raw())
    }

    /// Load from the environment and check every derived value.
    pub fn load() -> anyhow::Result<Self> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to load config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.base_url()?;
        self.timezone()?;
        self.attendance_policy()?;
        Ok(())
    }

    pub fn base_url(&self) -> anyhow::Result<Url> {
        Url::parse(&self.vtop_base_url)
            .with_context(|| format!("Invalid VTOP_BASE_URL {:?}", self.vtop_base_url))
    }

    pub fn timezone(&self) -> anyhow::Result<Tz> {
        self.portal_timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Invalid PORTAL_TIMEZONE {:?}: {e}", self.portal_timezone))
    }

    pub fn attendance_policy(&self) -> anyhow::Result<AttendancePolicy> {
        AttendancePolicy::new(self.attendance_threshold).ok_or_else(|| {
            anyhow!(
                "ATTENDANCE_THRESHOLD must be between 0 and 1, got {}",
                self.attendance_threshold
            )
        })
    }
}

/// Durations accept bare seconds (`30`) or a unit suffix (`500ms`, `2m`, `1h`).
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let parsed = DurationParser::with_all_time_units()
        .parse(text.trim())
        .map_err(|e| format!("invalid duration {text:?}: {e}"))?;
    parsed
        .try_into()
        .map_err(|e| format!("invalid duration {text:?}: {e}"))
}

/// The environment provider turns numeric-looking values into numbers, which
/// would reject a numeric password or username.
fn deserialize_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?
        .map(|raw| match raw {
            Raw::Text(text) => text,
            Raw::Integer(n) => n.to_string(),
            Raw::Float(n) => n.to_string(),
        })
        .filter(|s| !s.is_empty()))
}
