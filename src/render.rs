//! PNG encoding of rendered tiles.

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::error::AnyResult;
use crate::xyz_tile::TileImage;

/// Encode a tile as RGBA PNG: alpha 255 where the mask is valid, 0 elsewhere.
pub fn encode_png(tile: &TileImage) -> AnyResult<Vec<u8>> {
    let pixel_count = tile.width * tile.height;
    if tile.rgb.len() != pixel_count * 3 || tile.mask.len() != pixel_count {
        return Err(format!(
            "Tile buffers do not match {}x{}: {} rgb bytes, {} mask entries",
            tile.width,
            tile.height,
            tile.rgb.len(),
            tile.mask.len()
        )
        .into());
    }

    let mut rgba = Vec::with_capacity(pixel_count * 4);
    for (rgb, &valid) in tile.rgb.chunks_exact(3).zip(&tile.mask) {
        rgba.extend_from_slice(rgb);
        rgba.push(if valid { 255 } else { 0 });
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png).write_image(
        &rgba,
        u32::try_from(tile.width)?,
        u32::try_from(tile.height)?,
        ExtendedColorType::Rgba8,
    )?;
    Ok(png)
}
