use std::fmt::{Display, Formatter};

use mapcache_types::geo::{GeoPoint, GeoPoint2d};
use mapcache_types::mercator;
use mapcache_types::GeoBoundingBox;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Slippy map tile index.
///
/// The source the tile belongs to is implied by the [`crate::TileProviderArray`] the key is used
/// with.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TileKey {
    /// Zoom level.
    pub zoom: u32,
    /// Column, counted from the antimeridian eastwards.
    pub x: u32,
    /// Row, counted from the north edge southwards.
    pub y: u32,
}

impl TileKey {
    /// Create a new key.
    pub fn new(zoom: u32, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    /// Key of the tile containing the point. Returns `None` if the point cannot be projected
    /// (poles and non-finite coordinates).
    pub fn containing(point: &impl GeoPoint<Num = f64>, zoom: u32) -> Option<Self> {
        let (x, y) = mercator::try_project(point.lat(), point.lon(), zoom).ok()?;
        let max = mercator::tiles_count(zoom) as i64 - 1;

        Some(Self {
            zoom,
            x: x.clamp(0, max) as u32,
            y: y.clamp(0, max) as u32,
        })
    }

    /// Geographic bounds of the tile.
    pub fn bounding_box(&self) -> GeoBoundingBox {
        mercator::bounding_box_of_tile(self.x as i64, self.y as i64, self.zoom)
    }

    /// North-west corner of the tile.
    pub fn north_west(&self) -> GeoPoint2d {
        mercator::tile_to_point(self.x as i64, self.y as i64, self.zoom)
    }

    /// Row index in the TMS scheme, where `y == 0` is the southernmost row. Returns `None` if `y`
    /// is outside the grid of the zoom level.
    pub fn tms_y(&self) -> Option<u32> {
        let rows = 1u64.checked_shl(self.zoom)?;
        let row = rows.checked_sub(self.y as u64 + 1)?;
        u32::try_from(row).ok()
    }
}

impl Display for TileKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}
