//! Tuning constants of the tile pipeline.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration of the caches, worker pools and network access.
///
/// Defaults are tuned for a single map view on a mobile class device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct TileCacheConfig {
    /// Number of decoded tiles kept in memory.
    pub memory_cache_capacity: usize,
    /// Worker threads of the network downloader.
    pub download_threads: usize,
    /// Pending queue size of the network downloader.
    pub download_max_queue_size: usize,
    /// Worker threads of the filesystem cache provider.
    pub filesystem_threads: usize,
    /// Pending queue size of the filesystem cache provider.
    pub filesystem_max_queue_size: usize,
    /// Worker threads of the archive provider.
    pub archive_threads: usize,
    /// Pending queue size of the archive provider.
    pub archive_max_queue_size: usize,
    /// When the disk cache grows above this size (bytes) it is trimmed.
    pub disk_cache_max_bytes: u64,
    /// Size (bytes) the disk cache is trimmed down to.
    pub disk_cache_trim_bytes: u64,
    /// Tiles in the disk cache older than this are reported as expired.
    pub tile_max_age: Duration,
    /// If set, replaces `tile_max_age` for every tile and the expiry sent by the tile server.
    /// Zero makes every cached tile expired.
    pub expiration_override: Option<Duration>,
    /// Added to the expiry time of every downloaded tile.
    pub expiration_extension: Duration,
    /// User agent sent with tile requests.
    pub user_agent: String,
    /// Timeout of establishing a connection to the tile server.
    pub connect_timeout: Duration,
    /// Timeout of the whole tile request.
    pub read_timeout: Duration,
}

const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const MB: u64 = 1024 * 1024;

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            memory_cache_capacity: 9,
            download_threads: 2,
            download_max_queue_size: 40,
            filesystem_threads: 8,
            filesystem_max_queue_size: 40,
            archive_threads: 8,
            archive_max_queue_size: 40,
            disk_cache_max_bytes: 600 * MB,
            disk_cache_trim_bytes: 500 * MB,
            tile_max_age: WEEK,
            expiration_override: None,
            expiration_extension: Duration::ZERO,
            user_agent: concat!("mapcache/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }
}

impl TileCacheConfig {
    /// Maximum age of a disk cache tile, taking the override into account.
    pub fn effective_max_age(&self) -> Duration {
        self.expiration_override.unwrap_or(self.tile_max_age)
    }

    /// Disk cache limits as `(max, trim)`, with the trim target never above the maximum.
    pub fn disk_limits(&self) -> (u64, u64) {
        (
            self.disk_cache_max_bytes,
            self.disk_cache_trim_bytes.min(self.disk_cache_max_bytes),
        )
    }
}
