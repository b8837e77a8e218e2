use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::config::TileCacheConfig;
use crate::decoded_image::TileImageRef;
use crate::error::TileError;
use crate::listener::{EventHandler, TileEvent, TileListener};
use crate::provider::archive::ArchiveProvider;
use crate::provider::{
    ApproximationModule, FilesystemProvider, ModuleProvider, NetworkAvailability,
    NetworkDownloader, TileModule, TileWriter,
};
use crate::provider_array::TileProviderArray;
use crate::tile_source::TileSource;

/// Constructor for a [`TileProviderArray`].
///
/// Requests go through the modules in this order: the disk cache (if set with
/// [`TileProviderBuilder::with_file_cache`]), archive files, approximation from lower zoom levels
/// (if enabled), custom modules and finally the network downloader.
///
/// ```no_run
/// use mapcache::{TileProviderBuilder, TileSource};
///
/// let provider = TileProviderBuilder::new(TileSource::osm())
///     .with_file_cache("target/tiles")
///     .with_archives(["maps/city.mbtiles"])
///     .build()?;
/// # Ok::<(), mapcache::error::TileError>(())
/// ```
pub struct TileProviderBuilder {
    source: TileSource,
    config: TileCacheConfig,
    cache_root: Option<PathBuf>,
    archives: Vec<PathBuf>,
    ignore_archive_source: bool,
    modules: Vec<CustomModule>,
    availability: Option<Arc<dyn NetworkAvailability>>,
    listener: Option<Arc<dyn TileListener>>,
    failure_image: Option<TileImageRef>,
    offline_mode: bool,
    approximation: bool,
}

struct CustomModule {
    module: Arc<dyn TileModule>,
    threads: usize,
    queue_size: usize,
}

impl TileProviderBuilder {
    /// Initializes a builder loading tiles of the given source from the network only.
    pub fn new(source: TileSource) -> Self {
        Self {
            source,
            config: TileCacheConfig::default(),
            cache_root: None,
            archives: vec![],
            ignore_archive_source: false,
            modules: vec![],
            availability: None,
            listener: None,
            failure_image: None,
            offline_mode: false,
            approximation: false,
        }
    }

    /// Stores downloaded tiles in the given folder and loads them from there.
    ///
    /// Tiles are saved under `<source name>/<zoom>/<x>/<y><extension>`, so several sources can
    /// share one folder. The folder is created when the provider is built.
    pub fn with_file_cache(mut self, path: impl AsRef<Path>) -> Self {
        self.cache_root = Some(path.as_ref().into());
        self
    }

    /// Loads tiles from offline archives. Files that cannot be opened are skipped with a warning.
    pub fn with_archives<P: AsRef<Path>>(mut self, paths: impl IntoIterator<Item = P>) -> Self {
        self.archives
            .extend(paths.into_iter().map(|path| path.as_ref().to_path_buf()));
        self
    }

    /// Makes the archives return tiles of any source they contain.
    pub fn with_archive_source_ignored(mut self) -> Self {
        self.ignore_archive_source = true;
        self
    }

    /// Adds a module to the chain before the network downloader.
    pub fn with_module(
        mut self,
        module: impl TileModule + 'static,
        threads: usize,
        queue_size: usize,
    ) -> Self {
        self.modules.push(CustomModule {
            module: Arc::new(module),
            threads,
            queue_size,
        });
        self
    }

    /// Downloads are attempted only when the predicate returns true.
    pub fn with_network_availability(
        mut self,
        availability: impl NetworkAvailability + 'static,
    ) -> Self {
        self.availability = Some(Arc::new(availability));
        self
    }

    /// Sets the listener notified about loaded tiles.
    pub fn with_listener(mut self, listener: impl TileListener + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Calls the handler with every tile event. Replaces the listener.
    pub fn with_event_handler(
        self,
        handler: impl Fn(TileEvent) + Send + Sync + 'static,
    ) -> Self {
        self.with_listener(EventHandler(handler))
    }

    /// Image put into the cache for tiles that no module could load.
    pub fn with_failure_image(mut self, image: TileImageRef) -> Self {
        self.failure_image = Some(image);
        self
    }

    /// Replaces the default configuration.
    pub fn with_config(mut self, config: TileCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Shows missing tiles scaled up from lower zoom tiles of the disk cache and archives until
    /// the real tile is loaded.
    pub fn with_approximation(mut self) -> Self {
        self.approximation = true;
        self
    }

    /// Does not add the network downloader.
    pub fn with_offline_mode(mut self) -> Self {
        self.offline_mode = true;
        self
    }

    /// Starts the worker pools and creates the provider.
    pub fn build(self) -> Result<Arc<TileProviderArray>, TileError> {
        let Self {
            source,
            config,
            cache_root,
            archives,
            ignore_archive_source,
            modules,
            availability,
            listener,
            failure_image,
            offline_mode,
            approximation,
        } = self;

        if offline_mode && cache_root.is_none() && archives.is_empty() && modules.is_empty() {
            return Err(TileError::Configuration(
                "offline mode cannot be used without a file cache or archives".into(),
            ));
        }

        let source = Arc::new(source);
        let mut providers = vec![];
        let mut offline_modules: Vec<Arc<dyn TileModule>> = vec![];

        let writer = match &cache_root {
            Some(root) => {
                let writer = TileWriter::new(root, &config)?;
                let module: Arc<dyn TileModule> =
                    Arc::new(FilesystemProvider::new(root, source.clone(), &config));
                providers.push(ModuleProvider::new(
                    module.clone(),
                    config.filesystem_threads,
                    config.filesystem_max_queue_size,
                )?);
                offline_modules.push(module);
                Some(writer)
            }
            None => None,
        };

        if !archives.is_empty() {
            let module = ArchiveProvider::open(&archives, source.clone());
            module.set_ignore_tile_source(ignore_archive_source);
            debug!("Opened {} of {} tile archives", module.archive_count(), archives.len());
            let module: Arc<dyn TileModule> = Arc::new(module);
            providers.push(ModuleProvider::new(
                module.clone(),
                config.archive_threads,
                config.archive_max_queue_size,
            )?);
            offline_modules.push(module);
        }

        if approximation && !offline_modules.is_empty() {
            providers.push(ModuleProvider::new(
                Arc::new(ApproximationModule::new(offline_modules)),
                config.filesystem_threads,
                config.filesystem_max_queue_size,
            )?);
        }

        for custom in modules {
            providers.push(ModuleProvider::new(
                custom.module,
                custom.threads,
                custom.queue_size,
            )?);
        }

        if !offline_mode {
            let mut downloader = NetworkDownloader::new(source.clone(), &config)?;
            if let Some(writer) = writer {
                downloader = downloader.with_writer(writer);
            }
            if let Some(availability) = availability {
                downloader =
                    downloader.with_availability(move || availability.is_network_available());
            }

            providers.push(ModuleProvider::new(
                Arc::new(downloader),
                config.download_threads,
                config.download_max_queue_size,
            )?);
        }

        let array = TileProviderArray::new(source, providers, config.memory_cache_capacity);
        if let Some(listener) = listener {
            array.set_shared_listener(listener);
        }
        array.set_failure_image(failure_image);

        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;
    use crate::provider::ModuleKind;
    use crate::tests::{init_logger, png_bytes, Scripted, TestModule, TestServer, TIMEOUT};
    use crate::tile_key::TileKey;

    const KEY: TileKey = TileKey {
        zoom: 10,
        x: 5,
        y: 3,
    };

    fn names(array: &TileProviderArray) -> Vec<String> {
        array
            .providers()
            .iter()
            .map(|provider| provider.name().to_string())
            .collect()
    }

    #[test]
    fn offline_mode_does_not_work_without_storage() {
        let result = TileProviderBuilder::new(TileSource::osm())
            .with_offline_mode()
            .build();

        assert_matches!(result.err(), Some(TileError::Configuration(_)));
    }

    #[test]
    fn file_cache_fails_build_if_cannot_init_folder() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"not a folder").expect("written");

        let result = TileProviderBuilder::new(TileSource::osm())
            .with_file_cache(&file)
            .build();

        assert_matches!(result.err(), Some(TileError::FsIo(_)));
    }

    #[test]
    fn chain_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        let array = TileProviderBuilder::new(TileSource::osm())
            .with_file_cache(dir.path())
            .with_archives([dir.path().join("missing.zip")])
            .with_module(TestModule::new("custom", ModuleKind::Custom), 1, 4)
            .build()
            .expect("built");

        assert_eq!(names(&array), vec!["filesystem", "archive", "custom", "downloader"]);
        array.detach();

        let array = TileProviderBuilder::new(TileSource::osm())
            .with_file_cache(dir.path())
            .with_archives([dir.path().join("missing.zip")])
            .with_approximation()
            .build()
            .expect("built");

        assert_eq!(
            names(&array),
            vec!["filesystem", "archive", "approximation", "downloader"]
        );
        array.detach();

        // Nothing to approximate from without offline storage.
        let array = TileProviderBuilder::new(TileSource::osm())
            .with_approximation()
            .build()
            .expect("built");

        assert_eq!(names(&array), vec!["downloader"]);
        array.detach();

        let array = TileProviderBuilder::new(TileSource::osm())
            .with_file_cache(dir.path())
            .with_offline_mode()
            .build()
            .expect("built");

        assert_eq!(names(&array), vec!["filesystem"]);
        array.detach();
    }

    #[test]
    fn threads_come_from_config() {
        let array = TileProviderBuilder::new(TileSource::osm())
            .with_config(TileCacheConfig {
                download_threads: 3,
                memory_cache_capacity: 20,
                ..Default::default()
            })
            .build()
            .expect("built");

        assert_eq!(array.providers()[0].worker_count(), 3);
        assert_eq!(array.cache().capacity(), 20);
        array.detach();
    }

    #[test]
    fn downloads_and_caches_tile() {
        init_logger();
        let server = TestServer::start(HashMap::from([("/10/5/3.png".to_string(), png_bytes(4, 4))]));
        let dir = tempfile::tempdir().expect("temp dir");
        let source = || TileSource::new("Test", server.url_template());

        let (sender, events) = crossbeam_channel::unbounded();
        let array = TileProviderBuilder::new(source())
            .with_file_cache(dir.path())
            .with_listener(sender)
            .build()
            .expect("built");

        assert!(array.request_tile(KEY).is_none());
        assert_matches!(events.recv_timeout(TIMEOUT), Ok(TileEvent::Ready(key, _)) if key == KEY);
        assert!(array.request_tile(KEY).is_some());
        assert!(dir.path().join("Test/10/5/3.png").is_file());
        assert_eq!(server.requests(), vec!["/10/5/3.png"]);
        array.detach();

        // Loaded from the disk cache without touching the server.
        let (sender, events) = crossbeam_channel::unbounded();
        let array = TileProviderBuilder::new(source())
            .with_file_cache(dir.path())
            .with_offline_mode()
            .with_event_handler(move |event| {
                let _ = sender.send(event);
            })
            .build()
            .expect("built");

        array.request_tile(KEY);
        assert_matches!(events.recv_timeout(TIMEOUT), Ok(TileEvent::Ready(key, _)) if key == KEY);
        assert_eq!(server.requests().len(), 1);
        array.detach();
    }

    #[test]
    fn network_availability_is_checked() {
        let (sender, events) = crossbeam_channel::unbounded();
        let array = TileProviderBuilder::new(TileSource::osm())
            .with_module(TestModule::new("custom", ModuleKind::Custom), 1, 4)
            .with_network_availability(|| false)
            .with_listener(sender)
            .build()
            .expect("built");

        array.request_tile(KEY);
        assert_matches!(events.recv_timeout(TIMEOUT), Ok(TileEvent::Failed(key)) if key == KEY);
        array.detach();
    }

    #[test]
    fn custom_module_serves_tiles() {
        let (sender, events) = crossbeam_channel::unbounded();
        let array = TileProviderBuilder::new(TileSource::osm())
            .with_module(
                TestModule::new("custom", ModuleKind::Custom).with_result(KEY, Scripted::Fresh(7)),
                1,
                4,
            )
            .with_offline_mode()
            .with_listener(sender)
            .build()
            .expect("built");

        array.request_tile(KEY);
        assert_matches!(events.recv_timeout(TIMEOUT), Ok(TileEvent::Ready(key, _)) if key == KEY);
        array.detach();
    }
}
