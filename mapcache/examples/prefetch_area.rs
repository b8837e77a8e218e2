//! This example downloads all tiles of an area into the disk cache, so that they are available
//! offline later.

use std::time::Duration;

use mapcache::mapcache_types::{mercator, GeoBoundingBox};
use mapcache::{TileEvent, TileKey, TileProviderBuilder, TileSource};

const CACHE_FOLDER: &str = "target/tile_cache";

fn main() {
    env_logger::init();

    // Seoul city center.
    let area = GeoBoundingBox::new(37.60, 127.05, 37.52, 126.93);
    let keys: Vec<TileKey> = (10..=13)
        .flat_map(|zoom| tiles_in_area(&area, zoom))
        .collect();

    let (sender, events) = crossbeam_channel::unbounded();
    let provider = TileProviderBuilder::new(TileSource::osm())
        .with_file_cache(CACHE_FOLDER)
        .with_listener(sender)
        .build()
        .expect("failed to create tile provider");

    for key in &keys {
        provider.request_tile(*key);
    }

    let mut loaded = 0;
    let mut failed = 0;
    while loaded + failed < keys.len() {
        match events.recv_timeout(Duration::from_secs(60)) {
            Ok(TileEvent::Ready(..)) => loaded += 1,
            Ok(TileEvent::Failed(key)) => {
                println!("Failed to load tile {key}");
                failed += 1;
            }
            Ok(TileEvent::Expired(..)) => {}
            Err(_) => break,
        }
    }

    println!(
        "Loaded {loaded} of {} tiles into {CACHE_FOLDER}, {failed} failed",
        keys.len()
    );
    provider.detach();
}

fn tiles_in_area(area: &GeoBoundingBox, zoom: u32) -> Vec<TileKey> {
    let (left, top) = mercator::project(area.north(), area.west(), zoom);
    let (right, bottom) = mercator::project(area.south(), area.east(), zoom);

    (left..=right)
        .flat_map(|x| (top..=bottom).map(move |y| TileKey::new(zoom, x as u32, y as u32)))
        .collect()
}
