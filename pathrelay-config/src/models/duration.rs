//! Duration values accepted in config files and environment variables.
//!
//! A bare integer is a number of hours (`settle_window = 24`); a string is
//! parsed with `humantime` (`settle_window = "90s"`).

use std::time::Duration;

use serde::{Deserialize, Deserializer};

const SECS_PER_HOUR: u64 = 60 * 60;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Hours(u64),
    Text(String),
}

pub fn hours(value: u64) -> Result<Duration, String> {
    value
        .checked_mul(SECS_PER_HOUR)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("{value} hours is out of range"))
}

/// Parse a textual duration: digits only means hours, anything else goes
/// through `humantime`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(value) = trimmed.parse::<u64>() {
        return hours(value);
    }
    humantime::parse_duration(trimmed).map_err(|err| err.to_string())
}

pub fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawDuration>::deserialize(deserializer)?;
    raw.map(|raw| match raw {
        RawDuration::Hours(value) => hours(value),
        RawDuration::Text(text) => parse_duration(&text),
    })
    .transpose()
    .map_err(serde::de::Error::custom)
}
