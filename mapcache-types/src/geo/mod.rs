//! Points in geographic coordinates (latitude and longitude, see [`GeoPoint`]).

pub(crate) mod point;

pub use point::{GeoPoint, GeoPoint2d, NewGeoPoint};
