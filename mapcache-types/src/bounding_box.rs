use approx::AbsDiffEq;
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::geo::point::wrap_longitude;
use crate::geo::{GeoPoint, GeoPoint2d, NewGeoPoint};
use crate::mercator::{self, gudermann, gudermann_inverse};

/// Below this zoom level linear interpolation of latitude inside a tile is off by more than a
/// pixel, so the exact Gudermann interpolation is used instead.
pub const GUDERMANN_ZOOM_THRESHOLD: u32 = 7;

/// Rectangle in geographic coordinates given by its four edges in degrees.
///
/// Relative positions used by this type are `(x, y)` pairs where `(0, 0)` is the north-west
/// corner and `(1, 1)` is the south-east corner of the box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBoundingBox {
    north: f64,
    east: f64,
    south: f64,
    west: f64,
}

impl GeoBoundingBox {
    /// Creates a new bounding box. No validation is done, see [`GeoBoundingBox::try_new`].
    pub fn new(north: f64, east: f64, south: f64, west: f64) -> Self {
        Self {
            north,
            east,
            south,
            west,
        }
    }

    /// Creates a new bounding box, checking that every edge is a valid coordinate.
    pub fn try_new(north: f64, east: f64, south: f64, west: f64) -> Result<Self, TypesError> {
        for lat in [north, south] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(TypesError::InvalidLatitude(lat));
            }
        }
        for lon in [east, west] {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(TypesError::InvalidLongitude(lon));
            }
        }

        Ok(Self::new(north, east, south, west))
    }

    /// Smallest box containing all the points. Returns `None` for an empty iterator.
    pub fn from_points<'a, P: GeoPoint<Num = f64> + 'a>(
        mut points: impl Iterator<Item = &'a P>,
    ) -> Option<Self> {
        let first = points.next()?;
        let mut bbox = Self::new(first.lat(), first.lon(), first.lat(), first.lon());
        for p in points {
            bbox.north = bbox.north.max(p.lat());
            bbox.south = bbox.south.min(p.lat());
            bbox.east = bbox.east.max(p.lon());
            bbox.west = bbox.west.min(p.lon());
        }

        Some(bbox)
    }

    /// North edge.
    pub fn north(&self) -> f64 {
        self.north
    }

    /// East edge.
    pub fn east(&self) -> f64 {
        self.east
    }

    /// South edge.
    pub fn south(&self) -> f64 {
        self.south
    }

    /// West edge.
    pub fn west(&self) -> f64 {
        self.west
    }

    /// Latitude span in degrees.
    pub fn lat_span(&self) -> f64 {
        (self.north - self.south).abs()
    }

    /// Longitude span in degrees.
    pub fn lon_span(&self) -> f64 {
        (self.east - self.west).abs()
    }

    /// Center point.
    pub fn center(&self) -> GeoPoint2d {
        GeoPoint2d::latlon(
            (self.north + self.south) / 2.0,
            (self.east + self.west) / 2.0,
        )
    }

    /// Returns true if the point is strictly inside the box.
    pub fn contains(&self, point: &impl GeoPoint<Num = f64>) -> bool {
        point.lat() < self.north
            && point.lat() > self.south
            && point.lon() < self.east
            && point.lon() > self.west
    }

    /// Clamps the point into the box.
    pub fn bring_into(&self, point: &impl GeoPoint<Num = f64>) -> GeoPoint2d {
        GeoPoint2d::latlon(
            point.lat().min(self.north).max(self.south),
            point.lon().min(self.east).max(self.west),
        )
    }

    /// Box with the same center and spans multiplied by `scale`.
    pub fn increase_by_scale(&self, scale: f64) -> Self {
        let center = self.center();
        let half_lat = self.lat_span() * scale / 2.0;
        let half_lon = self.lon_span() * scale / 2.0;
        Self::new(
            center.lat() + half_lat,
            center.lon() + half_lon,
            center.lat() - half_lat,
            center.lon() - half_lon,
        )
    }

    /// Relative position of a point, interpolating latitude linearly.
    pub fn relative_position_linear(&self, lat: f64, lon: f64) -> (f64, f64) {
        let y = (self.north - lat) / self.lat_span();
        (self.relative_x(lon), y)
    }

    /// Relative position of a point, interpolating latitude exactly along the Mercator axis.
    pub fn relative_position_gudermann(&self, lat: f64, lon: f64) -> (f64, f64) {
        let north = gudermann_inverse(self.north);
        let south = gudermann_inverse(self.south);
        let y = (north - gudermann_inverse(lat)) / (north - south);
        (self.relative_x(lon), y)
    }

    /// Relative position of a point for a box displayed at the given zoom level.
    pub fn relative_position(&self, lat: f64, lon: f64, zoom: u32) -> (f64, f64) {
        if zoom < GUDERMANN_ZOOM_THRESHOLD {
            self.relative_position_gudermann(lat, lon)
        } else {
            self.relative_position_linear(lat, lon)
        }
    }

    /// Pixel position of a point inside a `width` by `height` viewport showing this box.
    pub fn to_pixels(&self, lat: f64, lon: f64, zoom: u32, width: u32, height: u32) -> (f64, f64) {
        let (x, y) = self.relative_position(lat, lon, zoom);
        (x * width as f64, y * height as f64)
    }

    /// Point at the relative position, interpolating latitude linearly.
    pub fn geo_of_relative_position_linear(&self, rel_x: f64, rel_y: f64) -> GeoPoint2d {
        let lat = self.north - self.lat_span() * rel_y;
        GeoPoint2d::latlon(lat, self.lon_at(rel_x)).normalized()
    }

    /// Point at the relative position, interpolating latitude exactly along the Mercator axis.
    pub fn geo_of_relative_position_gudermann(&self, rel_x: f64, rel_y: f64) -> GeoPoint2d {
        let north = gudermann_inverse(self.north);
        let south = gudermann_inverse(self.south);
        let lat = gudermann(south + (1.0 - rel_y) * (north - south));
        GeoPoint2d::latlon(lat, self.lon_at(rel_x)).normalized()
    }

    /// Point at the relative position for a box displayed at the given zoom level.
    pub fn geo_of_relative_position(&self, rel_x: f64, rel_y: f64, zoom: u32) -> GeoPoint2d {
        if zoom < GUDERMANN_ZOOM_THRESHOLD {
            self.geo_of_relative_position_gudermann(rel_x, rel_y)
        } else {
            self.geo_of_relative_position_linear(rel_x, rel_y)
        }
    }

    /// Index of the tile at the given zoom level that contains the point, if the point is inside
    /// the box.
    pub fn tile_of_point(&self, point: &impl GeoPoint<Num = f64>, zoom: u32) -> Option<(i64, i64)> {
        if !self.contains(point) {
            return None;
        }

        mercator::try_project(point.lat(), point.lon(), zoom).ok()
    }

    fn relative_x(&self, lon: f64) -> f64 {
        1.0 - (self.east - lon) / self.lon_span()
    }

    fn lon_at(&self, rel_x: f64) -> f64 {
        wrap_longitude(self.west + self.lon_span() * rel_x)
    }
}

impl AbsDiffEq for GeoBoundingBox {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        f64::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.north.abs_diff_eq(&other.north, epsilon)
            && self.east.abs_diff_eq(&other.east, epsilon)
            && self.south.abs_diff_eq(&other.south, epsilon)
            && self.west.abs_diff_eq(&other.west, epsilon)
    }
}
