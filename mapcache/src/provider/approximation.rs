use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use log::trace;

use super::{ModuleKind, TileLoad, TileModule};
use crate::decoded_image::DecodedImage;
use crate::error::TileError;
use crate::tile_key::TileKey;
use crate::tile_source::TileSource;

/// Highest zoom level an approximated tile can have.
const MAX_ZOOM: u32 = 29;

/// Builds a missing tile by scaling up the matching part of a tile from a lower zoom level.
///
/// Lower zoom tiles are looked up in the wrapped offline modules, starting one level up. Only
/// [`DecodedImage`] tiles can be scaled. The result is returned as [`TileLoad::Expired`], so it is
/// displayed while the rest of the chain looks for the real tile.
pub struct ApproximationModule {
    modules: Vec<Arc<dyn TileModule>>,
}

impl ApproximationModule {
    /// Creates the module reading lower zoom tiles from `modules`, tried in the given order.
    pub fn new(modules: impl IntoIterator<Item = Arc<dyn TileModule>>) -> Self {
        Self {
            modules: modules.into_iter().collect(),
        }
    }

    /// Scales up the closest lower zoom tile found in any of the modules.
    pub fn approximate(&self, key: &TileKey) -> Option<DecodedImage> {
        (1..=key.zoom).find_map(|zoom_diff| {
            self.modules
                .iter()
                .find_map(|module| approximate_from(&**module, key, zoom_diff))
        })
    }
}

fn approximate_from(
    module: &dyn TileModule,
    key: &TileKey,
    zoom_diff: u32,
) -> Option<DecodedImage> {
    let zoom = key.zoom.checked_sub(zoom_diff)?;
    if !(module.min_zoom()..=module.max_zoom()).contains(&zoom) {
        return None;
    }

    let parent = TileKey::new(
        zoom,
        key.x.checked_shr(zoom_diff)?,
        key.y.checked_shr(zoom_diff)?,
    );
    let image = match module.load(parent) {
        Ok(TileLoad::Fresh(image)) | Ok(TileLoad::Expired(image)) => image,
        Err(_) => return None,
    };

    let decoded = image.as_any().downcast_ref::<DecodedImage>()?;
    let scaled = scale_up(decoded, key, zoom_diff);
    if scaled.is_some() {
        trace!("Tile {key} approximated from {parent} by {}", module.name());
    }

    scaled
}

/// Cuts the part of the `parent` image covered by `key` and resizes it to the size of the parent.
fn scale_up(parent: &DecodedImage, key: &TileKey, zoom_diff: u32) -> Option<DecodedImage> {
    let (width, height) = parent.dimensions();
    let part_width = width.checked_shr(zoom_diff).filter(|&size| size > 0)?;
    let part_height = height.checked_shr(zoom_diff).filter(|&size| size > 0)?;
    let mask = (1u32 << zoom_diff) - 1;
    let x = (key.x & mask) * part_width;
    let y = (key.y & mask) * part_height;

    let parent =
        parent.with_pixels(|pixels| RgbaImage::from_raw(width, height, pixels.to_vec()))??;
    let part = imageops::crop_imm(&parent, x, y, part_width, part_height).to_image();
    let scaled = imageops::resize(&part, width, height, FilterType::Triangle);

    Some(DecodedImage::from_raw(scaled.into_raw(), (width, height)))
}

impl TileModule for ApproximationModule {
    fn name(&self) -> &str {
        "approximation"
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Approximation
    }

    fn min_zoom(&self) -> u32 {
        self.modules
            .iter()
            .map(|module| module.min_zoom())
            .min()
            .unwrap_or(0)
    }

    fn max_zoom(&self) -> u32 {
        MAX_ZOOM
    }

    fn set_tile_source(&self, _source: Arc<TileSource>) {
        // The wrapped modules get the source from their own providers.
    }

    fn load(&self, key: TileKey) -> Result<TileLoad, TileError> {
        match self.approximate(&key) {
            Some(image) => Ok(TileLoad::Expired(Arc::new(image))),
            None => Err(TileError::NotFound),
        }
    }
}
