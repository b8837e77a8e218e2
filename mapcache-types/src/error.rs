//! Error type used by the crate.

use thiserror::Error;

/// Error enum.
#[derive(Debug, Error, PartialEq)]
pub enum TypesError {
    /// Latitude is outside of the range the operation supports.
    #[error("invalid latitude: {0}")]
    InvalidLatitude(f64),
    /// Longitude is outside of the `[-180, 180]` range.
    #[error("invalid longitude: {0}")]
    InvalidLongitude(f64),
    /// Bounding box edges are inconsistent.
    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),
}
