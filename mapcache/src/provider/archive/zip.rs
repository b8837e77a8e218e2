use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use ::zip::result::ZipError;
use bytes::Bytes;
use parking_lot::Mutex;

use super::ArchiveFile;
use crate::error::TileError;
use crate::tile_key::TileKey;
use crate::tile_source::TileSource;

/// Entries larger than this are not tiles.
const MAX_ENTRY_SIZE: u64 = 16 * 1024 * 1024;

/// Zip file with tiles stored as `<source>/<zoom>/<x>/<y><extension>` entries.
pub struct ZipArchive {
    archive: Mutex<::zip::ZipArchive<File>>,
    sources: Vec<String>,
    ignore_source: AtomicBool,
}

impl ZipArchive {
    /// Opens the zip file and indexes the source folders in it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TileError> {
        let archive = ::zip::ZipArchive::new(File::open(path)?)?;
        let sources = archive
            .file_names()
            .filter_map(|name| name.split_once('/').map(|(source, _)| source.to_string()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(Self {
            archive: Mutex::new(archive),
            sources,
            ignore_source: AtomicBool::new(false),
        })
    }

    fn read_entry(&self, name: &str) -> Result<Option<Bytes>, TileError> {
        let mut archive = self.archive.lock();
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if entry.size() > MAX_ENTRY_SIZE {
            return Err(TileError::Decoding(format!(
                "zip entry {name} is too large ({} bytes)",
                entry.size()
            )));
        }

        // The declared size may be wrong.
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        (&mut entry).take(MAX_ENTRY_SIZE + 1).read_to_end(&mut bytes)?;
        if bytes.len() as u64 > MAX_ENTRY_SIZE {
            return Err(TileError::Decoding(format!("zip entry {name} is too large")));
        }

        Ok(Some(bytes.into()))
    }
}

impl ArchiveFile for ZipArchive {
    fn tile_bytes(&self, source: &TileSource, key: &TileKey) -> Result<Option<Bytes>, TileError> {
        if !self.ignore_source.load(Ordering::Relaxed) {
            return self.read_entry(&source.relative_path(key));
        }

        let tile_path = format!("{}/{}/{}{}", key.zoom, key.x, key.y, source.file_extension());
        for folder in &self.sources {
            if let Some(bytes) = self.read_entry(&format!("{folder}/{tile_path}"))? {
                return Ok(Some(bytes));
            }
        }

        Ok(None)
    }

    fn tile_sources(&self) -> Vec<String> {
        self.sources.clone()
    }

    fn set_ignore_tile_source(&self, ignore: bool) {
        self.ignore_source.store(ignore, Ordering::Relaxed);
    }
}
