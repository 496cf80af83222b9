use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Seconds before a single request is abandoned
    #[serde(default = "default_timeout")]
    pub timeout: Option<f32>,

    #[serde(default = "default_on_dl_error")]
    pub on_dl_error: OnError,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            throttle: ThrottleConfig::default(),
            timeout: default_timeout(),
            on_dl_error: default_on_dl_error(),
        }
    }
}

fn default_user_agent() -> String {
    String::from("EAbot")
}

fn default_timeout() -> Option<f32> {
    None
}

fn default_on_dl_error() -> OnError {
    OnError::SkipAndLog
}

impl CrawlerConfig {
    pub fn timeout(&self) -> Result<Option<Duration>> {
        self.timeout.map(|t| secs("timeout", t)).transpose()
    }
}

/// Minimum delay in seconds between two requests of each transport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleConfig {
    #[serde(default = "default_get")]
    pub get: f32,

    #[serde(default = "default_get_uncached")]
    pub get_uncached: f32,

    #[serde(default = "default_post")]
    pub post: f32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            get: default_get(),
            get_uncached: default_get_uncached(),
            post: default_post(),
        }
    }
}

fn default_get() -> f32 {
    2.
}

fn default_get_uncached() -> f32 {
    2.
}

fn default_post() -> f32 {
    5.
}

impl ThrottleConfig {
    /// No delay at all, for sites that don't need one and for tests.
    pub fn none() -> Self {
        Self {
            get: 0.,
            get_uncached: 0.,
            post: 0.,
        }
    }

    pub fn get_interval(&self) -> Result<Duration> {
        secs("throttle.get", self.get)
    }

    pub fn get_uncached_interval(&self) -> Result<Duration> {
        secs("throttle.getUncached", self.get_uncached)
    }

    pub fn post_interval(&self) -> Result<Duration> {
        secs("throttle.post", self.post)
    }
}

/// Non-positive and NaN delays mean no delay, values too large for a
/// [`Duration`] are rejected.
fn secs(field: &str, s: f32) -> Result<Duration> {
    if s.is_nan() || s <= 0. {
        return Ok(Duration::ZERO);
    }
    Duration::try_from_secs_f32(s)
        .map_err(|e| Error::config(format!("{field}: {s} seconds, {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ArgEnum))]
pub enum OnError {
    Fail,
    SkipAndLog,
}
