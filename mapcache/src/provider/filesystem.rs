use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::trace;
use parking_lot::RwLock;

use super::{ModuleKind, TileLoad, TileModule};
use crate::config::TileCacheConfig;
use crate::error::TileError;
use crate::tile_key::TileKey;
use crate::tile_source::TileSource;

/// Loads tiles saved to the disk cache by a [`TileWriter`](super::TileWriter).
///
/// Tiles older than the maximum age are returned as [`TileLoad::Expired`], so that the network
/// module can refresh them.
pub struct FilesystemProvider {
    root: PathBuf,
    source: RwLock<Arc<TileSource>>,
    max_age: Duration,
}

impl FilesystemProvider {
    /// Creates a provider reading tiles from the `root` cache folder.
    pub fn new(root: impl AsRef<Path>, source: Arc<TileSource>, config: &TileCacheConfig) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            source: RwLock::new(source),
            max_age: config.effective_max_age(),
        }
    }

    fn is_expired(&self, modified: SystemTime) -> bool {
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age > self.max_age,
            // Modified in the future.
            Err(_) => false,
        }
    }
}

impl TileModule for FilesystemProvider {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Filesystem
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
        let path = self.root.join(source.relative_path(&key));

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(TileError::NotFound),
            Err(err) => return Err(err.into()),
        };

        let modified = fs::metadata(&path)?.modified()?;
        let image = source.decode(&bytes)?;

        if self.is_expired(modified) {
            trace!("Tile {key} in disk cache is expired");
            Ok(TileLoad::Expired(image))
        } else {
            Ok(TileLoad::Fresh(image))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::png_bytes;
    use assert_matches::assert_matches;
    use std::fs::{File, FileTimes};

    fn write_tile(root: &Path, key: &TileKey, age: Duration) {
        let path = root.join(TileSource::osm().relative_path(key));
        fs::create_dir_all(path.parent().expect("has parent")).expect("created");
        fs::write(&path, png_bytes(2, 2)).expect("written");
        let file = File::options().write(true).open(&path).expect("opened");
        file.set_times(FileTimes::new().set_modified(SystemTime::now() - age))
            .expect("set mtime");
    }

    fn provider(root: &Path, config: &TileCacheConfig) -> FilesystemProvider {
        FilesystemProvider::new(root, Arc::new(TileSource::osm()), config)
    }

    #[test]
    fn missing_tile_is_not_found() {
        let dir = tempfile::tempdir().expect("temp dir");
        let provider = provider(dir.path(), &TileCacheConfig::default());
        assert_matches!(provider.load(TileKey::new(10, 5, 3)), Err(TileError::NotFound));
    }

    #[test]
    fn fresh_and_expired_tiles() {
        let dir = tempfile::tempdir().expect("temp dir");
        let fresh = TileKey::new(10, 5, 3);
        let old = TileKey::new(10, 5, 4);
        write_tile(dir.path(), &fresh, Duration::from_secs(60));
        write_tile(dir.path(), &old, Duration::from_secs(8 * 24 * 60 * 60));

        let provider = provider(dir.path(), &TileCacheConfig::default());
        assert_matches!(provider.load(fresh), Ok(TileLoad::Fresh(_)));
        assert_matches!(provider.load(old), Ok(TileLoad::Expired(_)));
    }

    #[test]
    fn zero_expiration_override_expires_everything() {
        let dir = tempfile::tempdir().expect("temp dir");
        let key = TileKey::new(3, 1, 1);
        write_tile(dir.path(), &key, Duration::from_secs(1));

        let config = TileCacheConfig {
            expiration_override: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_matches!(provider(dir.path(), &config).load(key), Ok(TileLoad::Expired(_)));
    }

    #[test]
    fn corrupted_file_is_decode_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let key = TileKey::new(3, 1, 1);
        let path = dir.path().join(TileSource::osm().relative_path(&key));
        fs::create_dir_all(path.parent().expect("has parent")).expect("created");
        fs::write(&path, b"garbage").expect("written");

        let result = provider(dir.path(), &TileCacheConfig::default()).load(key);
        assert_matches!(result, Err(TileError::ImageDecode(_)));
    }

    #[test]
    fn source_change_changes_folder() {
        let dir = tempfile::tempdir().expect("temp dir");
        let key = TileKey::new(3, 1, 1);
        write_tile(dir.path(), &key, Duration::from_secs(1));

        let provider = provider(dir.path(), &TileCacheConfig::default());
        provider.set_tile_source(Arc::new(TileSource::new("Other", "http://localhost/{z}/{x}/{y}")));
        assert_matches!(provider.load(key), Err(TileError::NotFound));
        assert_eq!(provider.max_zoom(), 19);
    }
}
