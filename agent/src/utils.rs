//! Utility functions

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Timestamp format used in result records
pub const RECORD_TIME_FMT: &str = "%Y-%m-%dT%H:%M:%S";

/// Timestamp format safe for use in file names
pub const FILE_STAMP_FMT: &str = "%Y-%m-%d_%H-%M-%S-%3f";

/// Version information for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Parse an IANA timezone name such as `Asia/Singapore` or `UTC`
pub fn parse_timezone(name: &str) -> Result<Tz, DeployError> {
    name.parse::<Tz>()
        .map_err(|_| DeployError::ValidationError(format!("Unknown timezone: {}", name)))
}

/// Wall-clock time in the given timezone, without the offset
pub fn local_now(tz: &Tz) -> NaiveDateTime {
    localize(Utc::now(), tz)
}

/// Convert a UTC instant to naive local time in `tz`
pub fn localize(now: DateTime<Utc>, tz: &Tz) -> NaiveDateTime {
    now.with_timezone(tz).naive_local()
}

/// Format a local time the way result records carry it
pub fn record_time_string(now: &NaiveDateTime) -> String {
    now.format(RECORD_TIME_FMT).to_string()
}

/// Format a local time for use inside a file name
pub fn file_stamp(now: &NaiveDateTime) -> String {
    now.format(FILE_STAMP_FMT).to_string()
}

/// Cooldown options for exponential backoff
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Calculate exponential backoff delay
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(attempt as i32);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64());
    Duration::from_secs_f64(capped_delay)
}

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
