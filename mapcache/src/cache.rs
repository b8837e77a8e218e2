//! In-memory LRU cache of decoded tiles.

use std::num::NonZeroUsize;
use std::sync::Arc;

use log::trace;
use lru::LruCache;
use parking_lot::RwLock;

use crate::decoded_image::TileImageRef;
use crate::tile_key::TileKey;

/// Freshness of a cached tile. Variants are ordered by priority: a tile in the cache is never
/// replaced by a tile with a lower priority state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TileState {
    /// Placeholder shown for a tile that could not be loaded.
    NotFound,
    /// Tile older than the maximum age of the source. A fresh copy is being requested.
    Expired,
    /// Fresh tile.
    UpToDate,
}

#[derive(Debug)]
struct CachedTile {
    image: TileImageRef,
    state: TileState,
}

/// Bounded map of decoded tiles with least-recently-used eviction.
///
/// The cache owns the images put into it: an image that leaves the cache (eviction, replacement,
/// removal or [`MemoryCache::clear`]) is released with [`TileImage::release`](crate::TileImage::release).
#[derive(Debug)]
pub struct MemoryCache {
    tiles: RwLock<LruCache<TileKey, CachedTile>>,
}

impl MemoryCache {
    /// Creates a cache holding at most `capacity` tiles. Zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            tiles: RwLock::new(LruCache::new(non_zero(capacity))),
        }
    }

    /// Maximum number of tiles.
    pub fn capacity(&self) -> usize {
        self.tiles.read().cap().get()
    }

    /// Number of cached tiles.
    pub fn len(&self) -> usize {
        self.tiles.read().len()
    }

    /// Returns true if no tiles are cached.
    pub fn is_empty(&self) -> bool {
        self.tiles.read().is_empty()
    }

    /// Grows the cache to hold at least `capacity` tiles. The cache never shrinks.
    pub fn ensure_capacity(&self, capacity: usize) {
        let mut tiles = self.tiles.write();
        if capacity > tiles.cap().get() {
            trace!("Growing tile cache from {} to {capacity}", tiles.cap());
            tiles.resize(non_zero(capacity));
        }
    }

    /// Returns the tile and marks it as the most recently used one.
    pub fn get(&self, key: &TileKey) -> Option<TileImageRef> {
        self.get_with_state(key).map(|(image, _)| image)
    }

    /// Returns the tile with its state and marks it as the most recently used one.
    pub fn get_with_state(&self, key: &TileKey) -> Option<(TileImageRef, TileState)> {
        self.tiles
            .write()
            .get(key)
            .map(|tile| (tile.image.clone(), tile.state))
    }

    /// Returns true if the tile is cached. Does not change the recency of the tile.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.tiles.read().contains(key)
    }

    /// Puts an up-to-date tile into the cache.
    pub fn put(&self, key: TileKey, image: TileImageRef) {
        self.put_with_state(key, image, TileState::UpToDate);
    }

    /// Puts a tile into the cache unless the cache already has the tile in a higher priority
    /// state. Images that have already been released are ignored.
    ///
    /// Returns true if the tile was stored.
    pub fn put_with_state(&self, key: TileKey, image: TileImageRef, state: TileState) -> bool {
        if image.is_released() {
            return false;
        }

        let mut tiles = self.tiles.write();
        if let Some(existing) = tiles.peek(&key) {
            if existing.state > state {
                return false;
            }
        }

        let inserted = image.clone();
        let displaced = tiles.push(key, CachedTile { image, state });
        drop(tiles);

        if let Some((displaced_key, displaced)) = displaced {
            if !Arc::ptr_eq(&inserted, &displaced.image) {
                if displaced_key != key {
                    trace!("Evicting tile {displaced_key} from memory cache");
                }
                displaced.image.release();
            }
        }

        true
    }

    /// Removes the tile from the cache and releases it.
    pub fn remove(&self, key: &TileKey) {
        let removed = self.tiles.write().pop(key);
        if let Some(tile) = removed {
            tile.image.release();
        }
    }

    /// Releases and removes every tile.
    ///
    /// Tiles are popped one at a time, so images inserted by other threads while the cache is being
    /// cleared are released too.
    pub fn clear(&self) {
        loop {
            let next = self.tiles.write().pop_lru();
            match next {
                Some((_, tile)) => tile.image.release(),
                None => break,
            }
        }
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoded_image::TileImage;
    use crate::tests::TestImage;

    fn key(x: u32) -> TileKey {
        TileKey::new(10, x, 0)
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = MemoryCache::new(3);
        let images: Vec<_> = (0..4).map(TestImage::new).collect();

        for (x, image) in images.iter().enumerate().take(3) {
            cache.put(key(x as u32), image.clone());
        }

        assert!(cache.get(&key(0)).is_some(), "tile 0 should be cached");
        cache.put(key(3), images[3].clone());

        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&key(0)), "recently used tile must not be evicted");
        assert!(!cache.contains(&key(1)), "least recently used tile must be evicted");
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));

        assert_eq!(images[1].release_count(), 1);
        for i in [0, 2, 3] {
            assert_eq!(images[i].release_count(), 0, "image {i} must not be released");
        }
    }

    #[test]
    fn never_exceeds_capacity() {
        let cache = MemoryCache::new(5);
        let images: Vec<_> = (0..50).map(TestImage::new).collect();
        for (i, image) in images.iter().enumerate() {
            cache.put(key(i as u32), image.clone());
            if i % 3 == 0 {
                let _ = cache.get(&key((i / 2) as u32));
            }
            assert!(cache.len() <= 5);
        }

        let released = images.iter().filter(|image| image.release_count() == 1).count();
        assert_eq!(released, 45);
        assert!(images.iter().all(|image| image.release_count() <= 1));
    }

    #[test]
    fn contains_does_not_promote() {
        let cache = MemoryCache::new(2);
        cache.put(key(0), TestImage::new(0));
        cache.put(key(1), TestImage::new(1));

        assert!(cache.contains(&key(0)));
        cache.put(key(2), TestImage::new(2));
        assert!(!cache.contains(&key(0)));
    }

    #[test]
    fn clear_releases_every_tile_once() {
        let cache = MemoryCache::new(10);
        let images: Vec<_> = (0..6).map(TestImage::new).collect();
        for (i, image) in images.iter().enumerate() {
            cache.put(key(i as u32), image.clone());
        }

        cache.clear();
        cache.clear();

        assert!(cache.is_empty());
        assert!(images.iter().all(|image| image.release_count() == 1));
    }

    #[test]
    fn released_image_is_not_stored() {
        let cache = MemoryCache::new(2);
        let image = TestImage::new(0);
        image.release();

        assert!(!cache.put_with_state(key(0), image, TileState::UpToDate));
        assert!(cache.is_empty());
    }

    #[test]
    fn replacing_tile_releases_old_image() {
        let cache = MemoryCache::new(2);
        let old = TestImage::new(0);
        let new = TestImage::new(1);
        cache.put_with_state(key(0), old.clone(), TileState::Expired);
        cache.put(key(0), new.clone());

        assert_eq!(old.release_count(), 1);
        assert_eq!(new.release_count(), 0);
        assert_eq!(cache.len(), 1);

        cache.put(key(0), new.clone());
        assert_eq!(new.release_count(), 0, "putting the same image again must not release it");
    }

    #[test]
    fn keeps_higher_priority_state() {
        let cache = MemoryCache::new(2);
        let fresh = TestImage::new(0);
        let expired = TestImage::new(1);
        cache.put(key(0), fresh.clone());

        assert!(!cache.put_with_state(key(0), expired.clone(), TileState::Expired));
        let (image, state) = cache.get_with_state(&key(0)).expect("tile is cached");
        assert_eq!(state, TileState::UpToDate);
        assert!(Arc::ptr_eq(&image, &(fresh as TileImageRef)));
        assert_eq!(expired.release_count(), 0);
    }

    #[test]
    fn ensure_capacity_only_grows() {
        let cache = MemoryCache::new(4);
        cache.ensure_capacity(2);
        assert_eq!(cache.capacity(), 4);
        cache.ensure_capacity(9);
        assert_eq!(cache.capacity(), 9);
    }

    #[test]
    fn remove_releases_image() {
        let cache = MemoryCache::new(4);
        let image = TestImage::new(0);
        cache.put(key(0), image.clone());
        cache.remove(&key(0));
        cache.remove(&key(0));

        assert!(!cache.contains(&key(0)));
        assert_eq!(image.release_count(), 1);
    }

    #[test]
    fn concurrent_access() {
        let cache = Arc::new(MemoryCache::new(16));
        let handles: Vec<_> = (0..4)
            .map(|thread| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let mut images = vec![];
                    for i in 0..200 {
                        let image = TestImage::new(thread * 1000 + i);
                        cache.put(key((thread * 1000 + i) as u32), image.clone());
                        let _ = cache.get(&key((thread * 1000 + i / 2) as u32));
                        images.push(image);
                    }
                    images
                })
            })
            .collect();

        let images: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();
        cache.clear();

        assert!(images.iter().all(|image| image.release_count() == 1));
    }
}
