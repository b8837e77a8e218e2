use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, trace};
use parking_lot::{Mutex, RwLock};

use crate::cache::{MemoryCache, TileState};
use crate::decoded_image::TileImageRef;
use crate::listener::TileListener;
use crate::provider::{ModuleProvider, TileRequest, TileRequestCallback};
use crate::tile_key::TileKey;
use crate::tile_source::TileSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkingStatus {
    /// No module has returned anything for the tile yet.
    Started,
    /// An expired copy has been found, a fresh one is being looked for.
    Found,
}

#[derive(Debug, Clone, Copy)]
struct Working {
    status: WorkingStatus,
    generation: u64,
}

/// Entry point of the tile pipeline.
///
/// Tiles are served from the [`MemoryCache`] when possible. Otherwise a [`TileRequest`] is passed
/// along the chain of [`ModuleProvider`]s until one of them loads the tile, and the
/// [`TileListener`] is notified about the result. At most one request per tile is in flight.
///
/// Changing the tile source or detaching starts a new generation. Results of requests from an
/// older generation are discarded.
pub struct TileProviderArray {
    cache: MemoryCache,
    working: Mutex<HashMap<TileKey, Working>>,
    generation: AtomicU64,
    providers: RwLock<Vec<Arc<ModuleProvider>>>,
    source: RwLock<Arc<TileSource>>,
    listener: RwLock<Option<Arc<dyn TileListener>>>,
    failure_image: RwLock<Option<TileImageRef>>,
    network_enabled: AtomicBool,
    self_ref: Weak<TileProviderArray>,
}

impl TileProviderArray {
    /// Creates the orchestrator. Requests go through `providers` in the given order.
    pub fn new(
        source: Arc<TileSource>,
        providers: Vec<Arc<ModuleProvider>>,
        cache_capacity: usize,
    ) -> Arc<Self> {
        for provider in &providers {
            provider.set_tile_source(source.clone());
        }

        Arc::new_cyclic(|self_ref| Self {
            cache: MemoryCache::new(cache_capacity),
            working: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            providers: RwLock::new(providers),
            source: RwLock::new(source),
            listener: RwLock::new(None),
            failure_image: RwLock::new(None),
            network_enabled: AtomicBool::new(true),
            self_ref: self_ref.clone(),
        })
    }

    /// Returns the tile if it is in the memory cache.
    ///
    /// If the cached tile is missing or not up to date, loading starts in background unless it is
    /// already in progress. In this case an expired or placeholder tile may still be returned.
    pub fn request_tile(&self, key: TileKey) -> Option<TileImageRef> {
        let cached = self.cache.get_with_state(&key);
        if let Some((image, TileState::UpToDate)) = &cached {
            return Some(image.clone());
        }

        let generation = {
            let mut working = self.working.lock();
            if working.contains_key(&key) {
                return cached.map(|(image, _)| image);
            }

            // The tile could have been loaded since the cache was checked.
            if let Some((image, TileState::UpToDate)) = self.cache.get_with_state(&key) {
                return Some(image);
            }

            let generation = self.generation.load(Ordering::Acquire);
            working.insert(
                key,
                Working {
                    status: WorkingStatus::Started,
                    generation,
                },
            );
            generation
        };

        trace!("Requesting tile {key}");
        let callback: Weak<dyn TileRequestCallback> = self.self_ref.clone();
        let request = TileRequest::new(key, self.providers.read().iter(), callback)
            .with_generation(generation);
        self.run_next_provider(request);

        cached.map(|(image, _)| image)
    }

    fn run_next_provider(&self, mut request: TileRequest) {
        match self.find_next_provider(&mut request) {
            Some(provider) => provider.load_tile_async(request),
            None => self.finish_unsuccessful(&request),
        }
    }

    fn find_next_provider(&self, request: &mut TileRequest) -> Option<Arc<ModuleProvider>> {
        let key = request.key();
        while let Some(provider) = request.next_provider() {
            let registered = self
                .providers
                .read()
                .iter()
                .any(|registered| Arc::ptr_eq(registered, &provider));
            if !registered {
                continue;
            }

            if provider.uses_network() && !self.is_network_enabled() {
                trace!("Skipping {} for {key}: network is disabled", provider.name());
                continue;
            }

            if !provider.is_tile_reachable(&key) {
                continue;
            }

            return Some(provider);
        }

        None
    }

    /// Returns the working entry of the request if it belongs to the current generation.
    fn current<'a>(
        working: &'a mut HashMap<TileKey, Working>,
        request: &TileRequest,
    ) -> Option<&'a mut Working> {
        working
            .get_mut(&request.key())
            .filter(|entry| entry.generation == request.generation())
    }

    fn finish_unsuccessful(&self, request: &TileRequest) {
        let key = request.key();
        {
            let mut working = self.working.lock();
            let status = match Self::current(&mut working, request) {
                Some(entry) => entry.status,
                None => return,
            };
            working.remove(&key);
            if status != WorkingStatus::Started {
                return;
            }

            let failure_image = self.failure_image.read().clone();
            if let Some(image) = failure_image {
                self.cache.put_with_state(key, image, TileState::NotFound);
            }
        }

        debug!("No module could load tile {key}");

        if let Some(listener) = self.listener() {
            listener.tile_failed(key);
        }
    }

    fn listener(&self) -> Option<Arc<dyn TileListener>> {
        self.listener.read().clone()
    }

    /// Sets the object notified about loaded tiles.
    pub fn set_listener(&self, listener: impl TileListener + 'static) {
        self.set_shared_listener(Arc::new(listener));
    }

    pub(crate) fn set_shared_listener(&self, listener: Arc<dyn TileListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Sets the placeholder put into the cache for tiles that cannot be loaded.
    pub fn set_failure_image(&self, image: Option<TileImageRef>) {
        *self.failure_image.write() = image;
    }

    /// Current tile source.
    pub fn tile_source(&self) -> Arc<TileSource> {
        self.source.read().clone()
    }

    /// Replaces the tile source. Cached tiles and requests in progress are dropped.
    pub fn set_tile_source(&self, source: TileSource) {
        let source = Arc::new(source);
        debug!("Switching tile source to {}", source.name());
        *self.source.write() = source.clone();
        self.start_generation();

        let providers = self.providers.read().clone();
        for provider in providers {
            provider.clear_queue();
            provider.set_tile_source(source.clone());
        }

        self.cache.clear();
    }

    /// Stops all providers and drops cached tiles. The array cannot load tiles afterwards.
    pub fn detach(&self) {
        self.start_generation();
        let providers = std::mem::take(&mut *self.providers.write());
        for provider in providers {
            provider.detach();
        }

        self.cache.clear();
    }

    fn start_generation(&self) {
        let mut working = self.working.lock();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("Starting request generation {generation}, {} requests dropped", working.len());
        working.clear();
    }

    /// Removes the provider from the chain and stops it.
    pub fn remove_provider(&self, provider: &Arc<ModuleProvider>) {
        self.providers
            .write()
            .retain(|registered| !Arc::ptr_eq(registered, provider));
        provider.detach();
    }

    /// Providers in chain order.
    pub fn providers(&self) -> Vec<Arc<ModuleProvider>> {
        self.providers.read().clone()
    }

    /// Enables or disables modules that use network.
    pub fn set_network_enabled(&self, enabled: bool) {
        self.network_enabled.store(enabled, Ordering::Release);
    }

    /// Returns true if modules that use network are enabled.
    pub fn is_network_enabled(&self) -> bool {
        self.network_enabled.load(Ordering::Acquire)
    }

    /// Memory cache of the array.
    pub fn cache(&self) -> &MemoryCache {
        &self.cache
    }

    /// Grows the memory cache to hold at least `capacity` tiles, e.g. after the map view has been
    /// resized.
    pub fn ensure_capacity(&self, capacity: usize) {
        self.cache.ensure_capacity(capacity);
    }

    /// Releases all tiles in the memory cache.
    pub fn clear_tile_cache(&self) {
        self.cache.clear();
    }

    /// Number of tiles being loaded.
    pub fn queue_size(&self) -> usize {
        self.working.lock().len()
    }

    /// Returns true if the tile is being loaded.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.working.lock().contains_key(key)
    }

    /// Smallest zoom level any provider can load.
    pub fn min_zoom(&self) -> u32 {
        self.providers
            .read()
            .iter()
            .map(|provider| provider.min_zoom())
            .min()
            .unwrap_or_else(|| self.source.read().min_zoom())
    }

    /// Largest zoom level any provider can load.
    pub fn max_zoom(&self) -> u32 {
        self.providers
            .read()
            .iter()
            .map(|provider| provider.max_zoom())
            .max()
            .unwrap_or_else(|| self.source.read().max_zoom())
    }
}

impl TileRequestCallback for TileProviderArray {
    fn tile_loaded(&self, request: TileRequest, image: TileImageRef) {
        let key = request.key();
        {
            let mut working = self.working.lock();
            if Self::current(&mut working, &request).is_none() {
                trace!("Tile {key} loaded after its request was dropped");
                return;
            }

            working.remove(&key);
            self.cache.put(key, image.clone());
        }

        if let Some(listener) = self.listener() {
            listener.tile_ready(key, image);
        }
    }

    fn tile_expired(&self, request: TileRequest, image: TileImageRef) {
        let key = request.key();
        {
            let mut working = self.working.lock();
            match Self::current(&mut working, &request) {
                Some(entry) => entry.status = WorkingStatus::Found,
                None => return,
            }

            self.cache.put_with_state(key, image.clone(), TileState::Expired);
        }

        if let Some(listener) = self.listener() {
            listener.tile_expired(key, image);
        }

        self.run_next_provider(request);
    }

    fn tile_failed(&self, request: TileRequest) {
        if Self::current(&mut self.working.lock(), &request).is_none() {
            return;
        }

        self.run_next_provider(request);
    }

    fn tile_dropped(&self, request: TileRequest) {
        let mut working = self.working.lock();
        if Self::current(&mut working, &request).is_some() {
            trace!("Request for tile {} was dropped by a provider", request.key());
            working.remove(&request.key());
        }
    }
}

impl std::fmt::Debug for TileProviderArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileProviderArray")
            .field("source", &self.source.read().name())
            .field("providers", &*self.providers.read())
            .field("cached", &self.cache.len())
            .field("working", &self.queue_size())
            .finish()
    }
}
