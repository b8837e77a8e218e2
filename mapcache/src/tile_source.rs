use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::decoded_image::{DecodedImage, TileImageRef};
use crate::error::TileError;
use crate::tile_key::TileKey;

/// Converts raw tile bytes into a tile image.
pub trait TileDecoder: Send + Sync {
    /// Decodes the bytes.
    fn decode(&self, bytes: &[u8]) -> Result<TileImageRef, TileError>;
}

impl<T> TileDecoder for T
where
    T: Fn(&[u8]) -> Result<TileImageRef, TileError> + Send + Sync,
{
    fn decode(&self, bytes: &[u8]) -> Result<TileImageRef, TileError> {
        self(bytes)
    }
}

/// Decodes PNG and JPEG tiles into [`DecodedImage`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl TileDecoder for ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<TileImageRef, TileError> {
        Ok(Arc::new(DecodedImage::new(bytes)?))
    }
}

/// Describes where tiles come from and how they are addressed and decoded.
///
/// The url template may contain `{z}`, `{x}` and `{y}` placeholders, and `{s}` which is replaced
/// by one of the configured subdomains.
///
/// ```
/// use mapcache::{TileKey, TileSource};
///
/// let source = TileSource::new("Topo", "https://{s}.tile.example.com/{z}/{x}/{y}.png")
///     .with_subdomains(["a", "b", "c"])
///     .with_zoom_range(0, 17);
/// let url = source.tile_url(&TileKey::new(3, 1, 2))?;
/// # Ok::<(), mapcache::error::TileError>(())
/// ```
#[derive(Clone)]
pub struct TileSource {
    name: String,
    min_zoom: u32,
    max_zoom: u32,
    tile_size: u32,
    url_template: String,
    subdomains: Vec<String>,
    file_extension: String,
    decoder: Arc<dyn TileDecoder>,
}

impl Debug for TileSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileSource")
            .field("name", &self.name)
            .field("min_zoom", &self.min_zoom)
            .field("max_zoom", &self.max_zoom)
            .field("tile_size", &self.tile_size)
            .field("url_template", &self.url_template)
            .field("file_extension", &self.file_extension)
            .finish()
    }
}

impl TileSource {
    /// Creates a source with 256px PNG tiles for zoom levels `0..=19`.
    pub fn new(name: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_zoom: 0,
            max_zoom: 19,
            tile_size: 256,
            url_template: url_template.into(),
            subdomains: vec![],
            file_extension: ".png".into(),
            decoder: Arc::new(ImageDecoder),
        }
    }

    #[allow(rustdoc::bare_urls)]
    /// Open Street Map source using the standard "https://tile.openstreetmap.org/z/x/y.png"
    /// pattern.
    pub fn osm() -> Self {
        Self::new("Mapnik", "https://tile.openstreetmap.org/{z}/{x}/{y}.png")
    }

    /// Sets the zoom levels the source has tiles for.
    pub fn with_zoom_range(mut self, min_zoom: u32, max_zoom: u32) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    /// Sets the size of the tile side in pixels.
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Sets the extension of the tile files, including the leading dot.
    pub fn with_file_extension(mut self, file_extension: impl Into<String>) -> Self {
        self.file_extension = file_extension.into();
        self
    }

    /// Sets the subdomains substituted for `{s}` in the url template.
    pub fn with_subdomains<S: Into<String>>(mut self, subdomains: impl IntoIterator<Item = S>) -> Self {
        self.subdomains = subdomains.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the image decoder.
    pub fn with_decoder(mut self, decoder: impl TileDecoder + 'static) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Name of the source. Used as the top folder of the disk cache and as the provider name in
    /// archives.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Minimum zoom level.
    pub fn min_zoom(&self) -> u32 {
        self.min_zoom
    }

    /// Maximum zoom level.
    pub fn max_zoom(&self) -> u32 {
        self.max_zoom
    }

    /// Size of the tile side in pixels.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Tile file extension, e.g. `.png`.
    pub fn file_extension(&self) -> &str {
        &self.file_extension
    }

    /// Returns true if the source has tiles for the zoom level of the key.
    pub fn contains_zoom(&self, key: &TileKey) -> bool {
        (self.min_zoom..=self.max_zoom).contains(&key.zoom)
    }

    /// Url of the tile.
    pub fn tile_url(&self, key: &TileKey) -> Result<String, TileError> {
        let mut vars = HashMap::new();
        vars.insert("z".to_string(), key.zoom.to_string());
        vars.insert("x".to_string(), key.x.to_string());
        vars.insert("y".to_string(), key.y.to_string());
        if !self.subdomains.is_empty() {
            let index = (key.x as usize + key.y as usize) % self.subdomains.len();
            vars.insert("s".to_string(), self.subdomains[index].clone());
        }

        strfmt::strfmt(&self.url_template, &vars)
            .map_err(|err| TileError::Generic(format!("invalid url template: {err}")))
    }

    /// Path of the tile relative to a cache root: `name/z/x/y.ext`.
    pub fn relative_path(&self, key: &TileKey) -> String {
        format!(
            "{}/{}/{}/{}{}",
            self.name, key.zoom, key.x, key.y, self.file_extension
        )
    }

    /// Decodes tile bytes with the configured decoder.
    pub fn decode(&self, bytes: &[u8]) -> Result<TileImageRef, TileError> {
        self.decoder.decode(bytes)
    }
}
