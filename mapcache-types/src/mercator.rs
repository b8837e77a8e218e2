//! Slippy map tiling math.
//!
//! The world at zoom level `z` is a square of `2^z` by `2^z` tiles. Column `0` starts at the
//! antimeridian (`-180°`) and row `0` starts at the north edge of the Web Mercator square
//! ([`MAX_LATITUDE`]).

use std::f64::consts::{FRAC_PI_4, PI};

use crate::bounding_box::GeoBoundingBox;
use crate::error::TypesError;
use crate::geo::{GeoPoint, GeoPoint2d, NewGeoPoint};

/// Latitude of the north edge of the Web Mercator square.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Number of tiles along one side of the world at the given zoom level.
pub fn tiles_count(zoom: u32) -> f64 {
    2f64.powi(zoom as i32)
}

/// Continuous (not floored) tile coordinates of a point.
pub fn project_fractional(lat: f64, lon: f64, zoom: u32) -> (f64, f64) {
    let n = tiles_count(zoom);
    let lat_rad = lat.to_radians();
    let x = (lon + 180.0) / 360.0 * n;
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n;
    (x, y)
}

/// Coordinates of the tile containing the point.
///
/// Only valid for `|lat| < 90`. Callers are expected to clamp the latitude to the range the tile
/// source supports (see [`clamp_latitude`]) or use [`try_project`].
pub fn project(lat: f64, lon: f64, zoom: u32) -> (i64, i64) {
    let (x, y) = project_fractional(lat, lon, zoom);
    (x.floor() as i64, y.floor() as i64)
}

/// Same as [`project`] but rejects latitudes the formula cannot handle.
pub fn try_project(lat: f64, lon: f64, zoom: u32) -> Result<(i64, i64), TypesError> {
    if !lat.is_finite() || lat.abs() >= 90.0 {
        return Err(TypesError::InvalidLatitude(lat));
    }
    if !lon.is_finite() {
        return Err(TypesError::InvalidLongitude(lon));
    }

    Ok(project(lat, lon, zoom))
}

/// Coordinates of the tile containing the point.
pub fn project_point(point: &impl GeoPoint<Num = f64>, zoom: u32) -> (i64, i64) {
    project(point.lat(), point.lon(), zoom)
}

/// Longitude of the west edge of the tile column `x`.
pub fn tile_to_lon(x: i64, zoom: u32) -> f64 {
    x as f64 / tiles_count(zoom) * 360.0 - 180.0
}

/// Latitude of the north edge of the tile row `y`.
pub fn tile_to_lat(y: i64, zoom: u32) -> f64 {
    let n = PI - 2.0 * PI * y as f64 / tiles_count(zoom);
    gudermann(n)
}

/// North-west corner of the tile.
pub fn tile_to_point(x: i64, y: i64, zoom: u32) -> GeoPoint2d {
    GeoPoint2d::latlon(tile_to_lat(y, zoom), tile_to_lon(x, zoom))
}

/// Geographic bounds of a single tile.
pub fn bounding_box_of_tile(x: i64, y: i64, zoom: u32) -> GeoBoundingBox {
    GeoBoundingBox::new(
        tile_to_lat(y, zoom),
        tile_to_lon(x + 1, zoom),
        tile_to_lat(y + 1, zoom),
        tile_to_lon(x, zoom),
    )
}

/// Geographic bounds of the rectangle of tiles with the given edges. Fractional edges are
/// truncated towards zero.
pub fn bounding_box_of_tiles(left: f64, top: f64, right: f64, bottom: f64, zoom: u32) -> GeoBoundingBox {
    GeoBoundingBox::new(
        tile_to_lat(top as i64, zoom),
        tile_to_lon(right as i64, zoom),
        tile_to_lat(bottom as i64, zoom),
        tile_to_lon(left as i64, zoom),
    )
}

/// Converts a point into global pixel coordinates for tiles of `tile_size` pixels.
pub fn lat_lon_to_pixel(lat: f64, lon: f64, zoom: u32, tile_size: u32) -> (f64, f64) {
    let (x, y) = project_fractional(clamp_latitude(lat), lon, zoom);
    (x * tile_size as f64, y * tile_size as f64)
}

/// Converts global pixel coordinates back into a geographic point.
pub fn pixel_to_lat_lon(pixel_x: f64, pixel_y: f64, zoom: u32, tile_size: u32) -> GeoPoint2d {
    let size = tiles_count(zoom) * tile_size as f64;
    let lon = pixel_x / size * 360.0 - 180.0;
    let lat = gudermann(PI - 2.0 * PI * pixel_y / size);
    GeoPoint2d::latlon(lat, lon)
}

/// Tile that contains the given global pixel.
pub fn pixel_to_tile(pixel_x: f64, pixel_y: f64, tile_size: u32) -> (i64, i64) {
    let size = tile_size as f64;
    ((pixel_x / size).floor() as i64, (pixel_y / size).floor() as i64)
}

/// Clamps latitude into the range covered by the Web Mercator square.
pub fn clamp_latitude(lat: f64) -> f64 {
    lat.clamp(-MAX_LATITUDE, MAX_LATITUDE)
}

/// Gudermannian function: converts a Mercator `y` (in radians) into latitude in degrees.
pub fn gudermann(y: f64) -> f64 {
    y.sinh().atan().to_degrees()
}

/// Inverse Gudermannian function: converts latitude in degrees into Mercator `y` in radians.
pub fn gudermann_inverse(lat: f64) -> f64 {
    (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln()
}
