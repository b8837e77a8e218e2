use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use log::warn;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use super::ArchiveFile;
use crate::error::TileError;
use crate::tile_key::TileKey;
use crate::tile_source::TileSource;

/// Sqlite database with a `tiles(key, provider, tile)` table.
pub struct DatabaseArchive {
    connection: Mutex<Connection>,
    ignore_source: AtomicBool,
}

impl DatabaseArchive {
    /// Opens the database read only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TileError> {
        let connection = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self::from_connection(connection))
    }

    pub(crate) fn from_connection(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(connection),
            ignore_source: AtomicBool::new(false),
        }
    }
}

/// Packs the tile index into the `key` column value: `(((z << z) + x) << z) + y`.
pub(crate) fn database_key(key: &TileKey) -> i64 {
    let z = key.zoom;
    ((z as i64).wrapping_shl(z).wrapping_add(key.x as i64))
        .wrapping_shl(z)
        .wrapping_add(key.y as i64)
}

impl ArchiveFile for DatabaseArchive {
    fn tile_bytes(&self, source: &TileSource, key: &TileKey) -> Result<Option<Bytes>, TileError> {
        let connection = self.connection.lock();
        let index = database_key(key);

        let tile: Option<Vec<u8>> = if self.ignore_source.load(Ordering::Relaxed) {
            connection
                .query_row("SELECT tile FROM tiles WHERE key = ?1", params![index], |row| {
                    row.get(0)
                })
                .optional()?
        } else {
            connection
                .query_row(
                    "SELECT tile FROM tiles WHERE key = ?1 AND provider = ?2",
                    params![index, source.name()],
                    |row| row.get(0),
                )
                .optional()?
        };

        Ok(tile.map(Bytes::from))
    }

    fn tile_sources(&self) -> Vec<String> {
        let connection = self.connection.lock();
        let result = connection
            .prepare("SELECT DISTINCT provider FROM tiles")
            .and_then(|mut statement| {
                let sources = statement
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>();
                sources
            });

        result.unwrap_or_else(|err| {
            warn!("Failed to read tile sources from database: {err}");
            vec![]
        })
    }

    fn set_ignore_tile_source(&self, ignore: bool) {
        self.ignore_source.store(ignore, Ordering::Relaxed);
    }
}
