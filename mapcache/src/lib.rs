//! Mapcache is a tile cache and asynchronous tile loading pipeline for slippy maps.
//!
//! # Quick start
//!
//! ```no_run
//! use mapcache::{TileKey, TileProviderBuilder, TileSource};
//!
//! let provider = TileProviderBuilder::new(TileSource::osm())
//!     .with_file_cache("target/tiles")
//!     .with_event_handler(|event| println!("{event:?}"))
//!     .build()?;
//!
//! // Returns the tile at once if it is in memory, otherwise loading starts in background and the
//! // listener is notified when the tile is ready.
//! let tile = provider.request_tile(TileKey::new(10, 550, 335));
//! # Ok::<(), mapcache::error::TileError>(())
//! ```
//!
//! # Main components
//!
//! * [`TileProviderArray`] is the entry point. It keeps decoded tiles in a [`MemoryCache`] and
//!   makes sure that only one request for a tile is in flight at a time.
//! * On a cache miss the request travels through a chain of [`ModuleProvider`]s. Each of them
//!   wraps a [`TileModule`] (filesystem cache, archive files, network) and runs it on its own
//!   worker threads.
//! * Tiles loaded from the network are stored on disk by the [`TileWriter`], which keeps the disk
//!   cache within its size budget.
//!
//! Projection and grid line math lives in the [`mapcache_types`] crate, which is re-exported.

#![warn(clippy::unwrap_used)]
#![warn(missing_docs)]

mod builder;
pub mod cache;
pub mod config;
pub mod decoded_image;
pub mod error;
mod listener;
pub mod provider;
mod provider_array;
mod tile_key;
mod tile_source;

#[cfg(test)]
pub(crate) mod tests;

pub use builder::TileProviderBuilder;
pub use cache::{MemoryCache, TileState};
pub use config::TileCacheConfig;
pub use decoded_image::{DecodedImage, TileImage, TileImageRef};
pub use listener::{TileEvent, TileListener};
pub use mapcache_types;
pub use provider::{
    ModuleKind, ModuleProvider, TileLoad, TileModule, TileRequest, TileRequestCallback,
    TileWriter,
};
pub use provider_array::TileProviderArray;
pub use tile_key::TileKey;
pub use tile_source::{TileDecoder, TileSource};
