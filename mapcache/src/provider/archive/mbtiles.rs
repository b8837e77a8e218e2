use std::path::Path;

use bytes::Bytes;
use log::debug;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use super::ArchiveFile;
use crate::error::TileError;
use crate::tile_key::TileKey;
use crate::tile_source::TileSource;

/// MBTiles database. Rows are stored in the TMS scheme, counted from the south.
///
/// An MBTiles file holds a single tileset, so the requested source is not checked.
pub struct MbTilesArchive {
    connection: Mutex<Connection>,
}

impl MbTilesArchive {
    /// Opens the database read only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TileError> {
        let connection = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self::from_connection(connection))
    }

    pub(crate) fn from_connection(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(connection),
        }
    }
}

impl ArchiveFile for MbTilesArchive {
    fn tile_bytes(&self, _source: &TileSource, key: &TileKey) -> Result<Option<Bytes>, TileError> {
        let Some(row) = key.tms_y() else {
            return Ok(None);
        };

        let tile: Option<Vec<u8>> = self
            .connection
            .lock()
            .query_row(
                "SELECT tile_data FROM tiles WHERE tile_column = ?1 AND tile_row = ?2 AND zoom_level = ?3",
                params![key.x, row, key.zoom],
                |row| row.get(0),
            )
            .optional()?;

        Ok(tile.map(Bytes::from))
    }

    fn tile_sources(&self) -> Vec<String> {
        let name: Result<Option<String>, _> = self
            .connection
            .lock()
            .query_row("SELECT value FROM metadata WHERE name = 'name'", [], |row| {
                row.get(0)
            })
            .optional();

        match name {
            Ok(name) => name.into_iter().collect(),
            Err(err) => {
                debug!("MBTiles file has no metadata: {err}");
                vec![]
            }
        }
    }

    fn set_ignore_tile_source(&self, _ignore: bool) {}
}
