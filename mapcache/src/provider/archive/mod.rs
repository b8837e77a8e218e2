//! Offline tile archives.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, trace, warn};
use parking_lot::RwLock;

use super::{ModuleKind, TileLoad, TileModule};
use crate::error::TileError;
use crate::tile_key::TileKey;
use crate::tile_source::TileSource;

mod database;
mod gemf;
mod mbtiles;
mod zip;

pub use database::DatabaseArchive;
pub use gemf::GemfArchive;
pub use mbtiles::MbTilesArchive;
pub use self::zip::ZipArchive;

/// File containing tiles of one or more sources.
pub trait ArchiveFile: Send + Sync {
    /// Raw bytes of the tile. `Ok(None)` means the archive does not have the tile.
    fn tile_bytes(&self, source: &TileSource, key: &TileKey) -> Result<Option<Bytes>, TileError>;

    /// Names of the tile sources stored in the archive.
    fn tile_sources(&self) -> Vec<String>;

    /// If set, tiles are returned regardless of the source they were stored for.
    fn set_ignore_tile_source(&self, ignore: bool);
}

/// Opens the archive with the reader matching the file extension: `zip`, `sqlite`, `mbtiles` or
/// `gemf`.
pub fn open_archive(path: impl AsRef<Path>) -> Result<Box<dyn ArchiveFile>, TileError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let archive: Box<dyn ArchiveFile> = match extension.as_str() {
        "zip" => Box::new(ZipArchive::open(path)?),
        "sqlite" => Box::new(DatabaseArchive::open(path)?),
        "mbtiles" => Box::new(MbTilesArchive::open(path)?),
        "gemf" => Box::new(GemfArchive::open(path)?),
        _ => return Err(TileError::UnsupportedArchive(path.display().to_string())),
    };

    debug!("Opened tile archive {path:?}");
    Ok(archive)
}

/// Loads tiles from a list of archives. The first archive that has the tile wins.
pub struct ArchiveProvider {
    archives: Vec<Box<dyn ArchiveFile>>,
    source: RwLock<Arc<TileSource>>,
}

impl ArchiveProvider {
    /// Creates a provider for already opened archives.
    pub fn new(archives: Vec<Box<dyn ArchiveFile>>, source: Arc<TileSource>) -> Self {
        Self {
            archives,
            source: RwLock::new(source),
        }
    }

    /// Opens every file in `paths`. Files that cannot be opened are skipped.
    pub fn open(paths: &[PathBuf], source: Arc<TileSource>) -> Self {
        let archives = paths
            .iter()
            .filter_map(|path| match open_archive(path) {
                Ok(archive) => Some(archive),
                Err(err) => {
                    warn!("Skipping tile archive {path:?}: {err}");
                    None
                }
            })
            .collect();

        Self::new(archives, source)
    }

    /// Number of open archives.
    pub fn archive_count(&self) -> usize {
        self.archives.len()
    }

    /// Sets [`ArchiveFile::set_ignore_tile_source`] for every archive.
    pub fn set_ignore_tile_source(&self, ignore: bool) {
        for archive in &self.archives {
            archive.set_ignore_tile_source(ignore);
        }
    }
}

impl TileModule for ArchiveProvider {
    fn name(&self) -> &str {
        "archive"
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Archive
    }

    fn min_zoom(&self) -> u32 {
        self.source.read().min_zoom()
    }

    fn max_zoom(&self) -> u32 {
        self.source.read().max_zoom()
    }

    fn set_tile_source(&self, source: Arc<TileSource>) {
        *self.source.write() = source;
    }

    fn load(&self, key: TileKey) -> Result<TileLoad, TileError> {
        let source = self.source.read().clone();
        for archive in &self.archives {
            match archive.tile_bytes(&source, &key) {
                Ok(Some(bytes)) => {
                    trace!("Tile {key} found in archive");
                    return Ok(TileLoad::Fresh(source.decode(&bytes)?));
                }
                Ok(None) => {}
                Err(err) => debug!("Failed to read tile {key} from archive: {err}"),
            }
        }

        Err(TileError::NotFound)
    }
}
