use crossbeam_channel::Sender;
use log::debug;

use crate::decoded_image::TileImageRef;
use crate::tile_key::TileKey;

/// Receives notifications about tiles loaded in background.
///
/// Methods are called from worker threads. Implementations are expected to forward the
/// notification to the UI thread (e.g. request a redraw) and return quickly.
pub trait TileListener: Send + Sync {
    /// The tile has been loaded and put into the memory cache.
    fn tile_ready(&self, key: TileKey, image: TileImageRef);

    /// No module could load the tile.
    fn tile_failed(&self, key: TileKey);

    /// An outdated copy of the tile was found and put into the memory cache. Loading of a fresh
    /// copy continues.
    fn tile_expired(&self, key: TileKey, image: TileImageRef) {
        self.tile_ready(key, image);
    }
}

/// Notification about a tile, as sent into channels.
#[derive(Debug, Clone)]
pub enum TileEvent {
    /// See [`TileListener::tile_ready`].
    Ready(TileKey, TileImageRef),
    /// See [`TileListener::tile_expired`].
    Expired(TileKey, TileImageRef),
    /// See [`TileListener::tile_failed`].
    Failed(TileKey),
}

impl TileEvent {
    /// Key of the tile the event is about.
    pub fn key(&self) -> TileKey {
        match self {
            TileEvent::Ready(key, _) | TileEvent::Expired(key, _) | TileEvent::Failed(key) => *key,
        }
    }
}

impl TileListener for Sender<TileEvent> {
    fn tile_ready(&self, key: TileKey, image: TileImageRef) {
        send(self, TileEvent::Ready(key, image));
    }

    fn tile_failed(&self, key: TileKey) {
        send(self, TileEvent::Failed(key));
    }

    fn tile_expired(&self, key: TileKey, image: TileImageRef) {
        send(self, TileEvent::Expired(key, image));
    }
}

fn send(sender: &Sender<TileEvent>, event: TileEvent) {
    if let Err(err) = sender.send(event) {
        debug!("Tile event for {} dropped: receiver is gone", err.0.key());
    }
}

/// Listener calling a closure with every event.
pub(crate) struct EventHandler<F>(pub(crate) F);

impl<F> TileListener for EventHandler<F>
where
    F: Fn(TileEvent) + Send + Sync,
{
    fn tile_ready(&self, key: TileKey, image: TileImageRef) {
        (self.0)(TileEvent::Ready(key, image));
    }

    fn tile_failed(&self, key: TileKey) {
        (self.0)(TileEvent::Failed(key));
    }

    fn tile_expired(&self, key: TileKey, image: TileImageRef) {
        (self.0)(TileEvent::Expired(key, image));
    }
}
