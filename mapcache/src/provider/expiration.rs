use std::time::{Duration, SystemTime};

use log::debug;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

use crate::config::TileCacheConfig;

/// Computes when a downloaded tile expires from the `Expires` and `Cache-Control` headers of the
/// tile server response.
///
/// A disk cache tile counts as expired once it is older than the configured maximum age, so the
/// expiry time is stored as the modification time of the file: `expires - max_age`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ExpirationPolicy {
    tile_max_age: Duration,
    expiration_override: Option<Duration>,
    expiration_extension: Duration,
}

impl ExpirationPolicy {
    pub(crate) fn new(config: &TileCacheConfig) -> Self {
        Self {
            tile_max_age: config.tile_max_age,
            expiration_override: config.expiration_override,
            expiration_extension: config.expiration_extension,
        }
    }

    /// `max-age` of `Cache-Control` wins over `Expires`. Without either header the tile lives for
    /// the configured maximum age. The override replaces all of it.
    pub(crate) fn expiration_time(
        &self,
        expires: Option<&str>,
        cache_control: Option<&str>,
        now: SystemTime,
    ) -> SystemTime {
        if let Some(age) = self.expiration_override {
            return now + age;
        }

        let expires_at = match cache_control.and_then(cache_control_max_age) {
            Some(max_age) => now + max_age,
            None => expires
                .and_then(http_date)
                .unwrap_or(now + self.tile_max_age),
        };

        expires_at + self.expiration_extension
    }

    /// Modification time to give the cached file so that it expires at `expires_at`.
    pub(crate) fn file_timestamp(&self, expires_at: SystemTime) -> SystemTime {
        let max_age = self.expiration_override.unwrap_or(self.tile_max_age);
        expires_at
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

/// Value of the `max-age` directive.
pub(crate) fn cache_control_max_age(header: &str) -> Option<Duration> {
    let value = header
        .split(',')
        .find_map(|directive| directive.trim().strip_prefix("max-age="))?;

    match value.trim().parse::<u64>() {
        Ok(seconds) => Some(Duration::from_secs(seconds)),
        Err(_) => {
            debug!("Invalid max-age in Cache-Control header: {header}");
            None
        }
    }
}

/// Parses an HTTP date such as `Fri, 19 Oct 2018 17:47:00 GMT`.
pub(crate) fn http_date(value: &str) -> Option<SystemTime> {
    let value = value.trim();
    let normalized = match value.strip_suffix("GMT") {
        Some(date) => format!("{date}+0000"),
        None => value.to_string(),
    };

    match OffsetDateTime::parse(&normalized, &Rfc2822) {
        Ok(date) => Some(date.into()),
        Err(err) => {
            debug!("Invalid date in Expires header '{value}': {err}");
            None
        }
    }
}
