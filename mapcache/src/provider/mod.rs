//! Modules that load tiles and the worker pools running them.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use crate::decoded_image::TileImageRef;
use crate::error::TileError;
use crate::tile_key::TileKey;
use crate::tile_source::TileSource;

mod approximation;
pub mod archive;
mod downloader;
mod expiration;
mod filesystem;
mod module_provider;
mod tile_writer;

pub use approximation::ApproximationModule;
pub use downloader::{NetworkAvailability, NetworkDownloader};
pub use filesystem::FilesystemProvider;
pub use module_provider::ModuleProvider;
pub use tile_writer::{DiskUsage, TileWriter};

/// Kind of the storage a module loads tiles from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Tiles previously saved to the disk cache.
    Filesystem,
    /// Offline archive files (zip, sqlite, mbtiles, gemf).
    Archive,
    /// Tiles scaled up from lower zoom levels of offline storages.
    Approximation,
    /// Tile server.
    Network,
    /// Module provided by the application.
    Custom,
}

/// Successful result of loading a tile.
#[derive(Debug, Clone)]
pub enum TileLoad {
    /// Tile is up to date.
    Fresh(TileImageRef),
    /// Tile was found, but is older than allowed. It can be displayed until a fresh copy is
    /// loaded by the next module in the chain.
    Expired(TileImageRef),
}

/// Storage or service able to load tiles.
///
/// `load` is called from worker threads of a [`ModuleProvider`] and is allowed to block.
pub trait TileModule: Send + Sync {
    /// Name of the module, used for logging and worker thread names.
    fn name(&self) -> &str;

    /// Kind of the module.
    fn kind(&self) -> ModuleKind;

    /// Returns true if the module needs network access to load tiles. Such modules are skipped
    /// while network is disabled.
    fn uses_network(&self) -> bool {
        self.kind() == ModuleKind::Network
    }

    /// Minimum zoom level the module can load.
    fn min_zoom(&self) -> u32;

    /// Maximum zoom level the module can load.
    fn max_zoom(&self) -> u32;

    /// Replaces the tile source the module loads tiles for.
    fn set_tile_source(&self, source: Arc<TileSource>);

    /// Loads a tile.
    ///
    /// Errors for which [`TileError::cannot_continue`] is true make the provider drop all pending
    /// requests.
    fn load(&self, key: TileKey) -> Result<TileLoad, TileError>;
}

/// Receives results of loading a [`TileRequest`].
pub trait TileRequestCallback: Send + Sync {
    /// The tile has been loaded and is up to date.
    fn tile_loaded(&self, request: TileRequest, image: TileImageRef);

    /// An expired copy of the tile has been loaded.
    fn tile_expired(&self, request: TileRequest, image: TileImageRef);

    /// The provider could not load the tile.
    fn tile_failed(&self, request: TileRequest);

    /// The request was pushed out of a full pending queue, or the queue was cleared after a fatal
    /// error. The tile was not tried by the provider and the request is not passed further.
    fn tile_dropped(&self, request: TileRequest);
}

/// A tile being loaded together with the providers that have not been tried yet.
#[derive(Clone)]
pub struct TileRequest {
    key: TileKey,
    generation: u64,
    chain: VecDeque<Weak<ModuleProvider>>,
    callback: Weak<dyn TileRequestCallback>,
}

impl std::fmt::Debug for TileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileRequest")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .field("remaining_providers", &self.chain.len())
            .finish()
    }
}

impl TileRequest {
    /// Creates a request that will be passed through the `providers` in order.
    pub fn new<'a>(
        key: TileKey,
        providers: impl IntoIterator<Item = &'a Arc<ModuleProvider>>,
        callback: Weak<dyn TileRequestCallback>,
    ) -> Self {
        Self {
            key,
            generation: 0,
            chain: providers.into_iter().map(Arc::downgrade).collect(),
            callback,
        }
    }

    /// Marks the request with the generation of its callback. Results of requests from an older
    /// generation are ignored by [`TileProviderArray`](crate::TileProviderArray).
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Key of the requested tile.
    pub fn key(&self) -> TileKey {
        self.key
    }

    /// Generation the request was created in.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Removes the next provider from the chain. Providers that have been dropped are skipped.
    pub fn next_provider(&mut self) -> Option<Arc<ModuleProvider>> {
        while let Some(provider) = self.chain.pop_front() {
            if let Some(provider) = provider.upgrade() {
                return Some(provider);
            }
        }

        None
    }

    /// Number of providers left in the chain, including dropped ones.
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }

    /// Object the results are reported to, if it still exists.
    pub fn callback(&self) -> Option<Arc<dyn TileRequestCallback>> {
        self.callback.upgrade()
    }
}
