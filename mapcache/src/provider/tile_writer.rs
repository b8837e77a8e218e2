use std::fs::{self, File, FileTimes};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::config::TileCacheConfig;
use crate::error::TileError;
use crate::tile_key::TileKey;
use crate::tile_source::TileSource;

/// Time given to another thread to finish creating a cache folder before giving up.
const CREATE_FOLDER_WAIT: Duration = Duration::from_millis(500);

/// Bytes used by the disk cache.
///
/// Shared by every [`TileWriter`] writing into the same folder.
#[derive(Debug)]
pub struct DiskUsage {
    used: Mutex<u64>,
    trim_lock: Mutex<()>,
    ready: Mutex<bool>,
    ready_signal: Condvar,
    max_bytes: u64,
    trim_bytes: u64,
}

impl DiskUsage {
    /// Creates an empty counter. When usage grows above `max_bytes` the cache is trimmed down to
    /// `trim_bytes`.
    pub fn new(max_bytes: u64, trim_bytes: u64) -> Self {
        Self {
            used: Mutex::new(0),
            trim_lock: Mutex::new(()),
            ready: Mutex::new(false),
            ready_signal: Condvar::new(),
            max_bytes,
            trim_bytes: trim_bytes.min(max_bytes),
        }
    }

    /// Bytes currently used.
    pub fn used(&self) -> u64 {
        *self.used.lock()
    }

    /// Usage above which the cache is trimmed.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Usage the cache is trimmed down to.
    pub fn trim_bytes(&self) -> u64 {
        self.trim_bytes
    }

    /// Returns true if usage is above the maximum.
    pub fn needs_trim(&self) -> bool {
        self.used() > self.max_bytes
    }

    /// Returns true when the initial scan of the cache folder is finished.
    pub fn is_ready(&self) -> bool {
        *self.ready.lock()
    }

    /// Blocks until the initial scan of the cache folder is finished or the timeout elapses.
    /// Returns true if the scan is finished.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.lock();
        if !*ready {
            let _ = self
                .ready_signal
                .wait_while_for(&mut ready, |ready| !*ready, timeout);
        }

        *ready
    }

    fn add(&self, bytes: u64) {
        *self.used.lock() += bytes;
    }

    fn subtract(&self, bytes: u64) {
        let mut used = self.used.lock();
        *used = used.saturating_sub(bytes);
    }

    fn set_ready(&self) {
        *self.ready.lock() = true;
        self.ready_signal.notify_all();
    }
}

/// Saves tiles to the disk cache.
///
/// Files are stored as `<root>/<source name>/<zoom>/<x>/<y><extension>`. Total size of the files
/// is tracked by [`DiskUsage`]. When it goes above the maximum, the oldest files are deleted
/// until usage is at the trim target.
///
/// ```no_run
/// use mapcache::{TileCacheConfig, TileKey, TileSource, TileWriter};
///
/// let writer = TileWriter::new("target/tiles", &TileCacheConfig::default())?;
/// let mut bytes: &[u8] = &[0, 1, 2];
/// writer.save_file(&TileSource::osm(), &TileKey::new(1, 0, 0), &mut bytes)?;
/// # Ok::<(), mapcache::error::TileError>(())
/// ```
#[derive(Debug, Clone)]
pub struct TileWriter {
    root: PathBuf,
    usage: Arc<DiskUsage>,
}

impl TileWriter {
    /// Creates the cache folder if needed and starts a background scan of its size.
    pub fn new(root: impl AsRef<Path>, config: &TileCacheConfig) -> Result<Self, TileError> {
        let (max_bytes, trim_bytes) = config.disk_limits();
        Self::with_usage(root, Arc::new(DiskUsage::new(max_bytes, trim_bytes)))
    }

    /// Creates a writer sharing the usage counter with other writers.
    pub fn with_usage(root: impl AsRef<Path>, usage: Arc<DiskUsage>) -> Result<Self, TileError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|err| {
            warn!("Failed to create tile cache folder {root:?}: {err}");
            TileError::FsIo(err)
        })?;

        let writer = Self { root, usage };
        let scanner = writer.clone();
        std::thread::Builder::new()
            .name("tile-cache-scan".into())
            .spawn(move || scanner.initialize())
            .map_err(|err| TileError::Generic(format!("failed to start cache scan: {err}")))?;

        Ok(writer)
    }

    fn initialize(&self) {
        let files = collect_files(&self.root);
        let total = files.iter().map(|file| file.len).sum();
        self.usage.add(total);
        debug!("Tile cache {:?} uses {total} bytes", self.root);

        if self.usage.needs_trim() {
            self.trim();
        }

        self.usage.set_ready();
    }

    /// Root folder of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Disk usage counter.
    pub fn usage(&self) -> &Arc<DiskUsage> {
        &self.usage
    }

    /// Blocks until the initial scan of the cache folder is done.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        self.usage.wait_ready(timeout)
    }

    /// Path of the tile file.
    pub fn file_path(&self, source: &TileSource, key: &TileKey) -> PathBuf {
        self.root.join(source.relative_path(key))
    }

    /// Returns true if the tile file exists.
    pub fn exists(&self, source: &TileSource, key: &TileKey) -> bool {
        self.file_path(source, key).is_file()
    }

    /// Writes the tile read from `reader`. Returns the number of bytes written.
    pub fn save_file(
        &self,
        source: &TileSource,
        key: &TileKey,
        reader: &mut impl Read,
    ) -> Result<u64, TileError> {
        let path = self.file_path(source, key);
        let folder = path.parent().ok_or(TileError::IO)?;
        create_folder(folder)?;

        let replaced = fs::metadata(&path).map(|metadata| metadata.len()).unwrap_or(0);
        self.usage.subtract(replaced);

        let mut file = File::create(&path)?;
        let written = match io::copy(reader, &mut file) {
            Ok(written) => written,
            Err(err) => {
                drop(file);
                let _ = fs::remove_file(&path);
                return Err(err.into());
            }
        };

        self.usage.add(written);
        if self.usage.needs_trim() {
            self.trim();
        }

        Ok(written)
    }

    /// Sets the modification time of a saved tile. The disk cache provider reports the tile as
    /// expired once it is older than the maximum age.
    pub fn set_modified(
        &self,
        source: &TileSource,
        key: &TileKey,
        modified: SystemTime,
    ) -> Result<(), TileError> {
        let file = File::options()
            .write(true)
            .open(self.file_path(source, key))?;
        file.set_times(FileTimes::new().set_modified(modified))?;
        Ok(())
    }

    /// Deletes the tile file. Returns true if the file existed.
    pub fn remove(&self, source: &TileSource, key: &TileKey) -> Result<bool, TileError> {
        let path = self.file_path(source, key);
        let len = match fs::metadata(&path) {
            Ok(metadata) => metadata.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        fs::remove_file(&path)?;
        self.usage.subtract(len);
        Ok(true)
    }

    /// Deletes the oldest files until usage is at the trim target. Does nothing if another
    /// thread is already trimming or if usage is below the maximum.
    pub fn trim(&self) {
        let Some(_guard) = self.usage.trim_lock.try_lock() else {
            return;
        };

        if !self.usage.needs_trim() {
            return;
        }

        info!(
            "Trimming tile cache {:?} from {} to {} bytes",
            self.root,
            self.usage.used(),
            self.usage.trim_bytes()
        );

        let mut files = collect_files(&self.root);
        files.sort_by_key(|file| file.modified);

        let mut removed = 0;
        for file in files {
            if self.usage.used() <= self.usage.trim_bytes() {
                break;
            }

            match fs::remove_file(&file.path) {
                Ok(()) => {
                    self.usage.subtract(file.len);
                    removed += 1;
                }
                Err(err) => debug!("Failed to delete cached tile {:?}: {err}", file.path),
            }
        }

        info!(
            "Deleted {removed} files from tile cache, {} bytes used",
            self.usage.used()
        );
    }
}

fn create_folder(folder: &Path) -> Result<(), TileError> {
    if let Err(err) = fs::create_dir_all(folder) {
        // Another thread may be creating the same folder.
        std::thread::sleep(CREATE_FOLDER_WAIT);
        if !folder.is_dir() {
            warn!("Failed to create tile folder {folder:?}: {err}");
            return Err(err.into());
        }
    }

    Ok(())
}

#[derive(Debug)]
struct CachedFile {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}

fn collect_files(root: &Path) -> Vec<CachedFile> {
    let mut files = vec![];
    visit_folder(root, &mut files);
    files
}

fn visit_folder(folder: &Path, files: &mut Vec<CachedFile>) {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("Cannot read cache folder {folder:?}: {err}");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(metadata) = fs::metadata(&path) else {
            continue;
        };

        if metadata.is_dir() {
            if !is_symlinked(folder, &path) {
                visit_folder(&path, files);
            }
        } else if metadata.is_file() {
            files.push(CachedFile {
                path,
                len: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
    }
}

/// A folder is a symlink if its canonical path is not inside the canonical path of its parent.
fn is_symlinked(parent: &Path, folder: &Path) -> bool {
    match (fs::canonicalize(parent), fs::canonicalize(folder)) {
        (Ok(parent), Ok(folder)) => folder.parent() != Some(parent.as_path()),
        _ => true,
    }
}
