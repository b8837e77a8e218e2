//! Error types used by the crate.

use image::ImageError;
use thiserror::Error;

/// Mapcache error type.
#[derive(Debug, Error)]
pub enum TileError {
    /// I/O error (network or file)
    #[error("failed to load data")]
    IO,
    /// Tile does not exist in the source.
    #[error("tile not found")]
    NotFound,
    /// Server responded with an unexpected status.
    #[error("unexpected http status {0}")]
    HttpStatus(u16),
    /// Server cannot be reached at all. Requests to the same host will fail too.
    #[error("host unreachable: {0}")]
    HostUnreachable(String),
    /// Not enough memory to decode the tile.
    #[error("out of memory while decoding tile")]
    OutOfMemory,
    /// Network access is switched off or not available.
    #[error("network is not available")]
    NetworkUnavailable,
    /// Image decoding error.
    #[error("image decode error: {0:?}")]
    ImageDecode(#[from] ImageError),
    /// Error decoding data.
    #[error("failed to decode data: {0}")]
    Decoding(String),
    /// Error reading an sqlite based archive.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Error reading a zip archive.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// Archive type cannot be recognized by the file extension.
    #[error("unsupported archive: {0}")]
    UnsupportedArchive(String),
    /// Invalid combination of builder options.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Generic error - details are inside.
    #[error("{0}")]
    Generic(String),
    /// Error reading/writing data to the FS.
    #[error("failed to read file: {0}")]
    FsIo(#[from] std::io::Error),
}

impl TileError {
    /// Returns true if the error means that the module that produced it will fail for every other
    /// tile too, so its pending requests should be dropped.
    pub fn cannot_continue(&self) -> bool {
        matches!(self, Self::HostUnreachable(_) | Self::OutOfMemory)
    }
}

impl From<reqwest::Error> for TileError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_connect() {
            Self::HostUnreachable(value.to_string())
        } else if let Some(status) = value.status() {
            Self::HttpStatus(status.as_u16())
        } else {
            Self::IO
        }
    }
}
