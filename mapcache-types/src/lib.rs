//! Pure geographic math used by the `mapcache` tile pipeline.
//!
//! * [`geo`] contains geographic points.
//! * [`mercator`] maps between latitude/longitude, slippy map tiles and pixels.
//! * [`bounding_box`] interpolates positions inside a [`GeoBoundingBox`].
//! * [`gridlines`] computes latitude/longitude grid lines for a visible area.
//!
//! All functions here are stateless and can be called from any thread.

pub mod bounding_box;
pub mod error;
pub mod geo;
pub mod gridlines;
pub mod mercator;

pub use bounding_box::GeoBoundingBox;
pub use gridlines::{GridLine, GridLineDirection, GridLines};
