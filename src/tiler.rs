//! Splitting of tall full-page captures into bounded-height tiles.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops, ImageFormat, RgbaImage};
use std::io::Cursor;

/// Default maximum tile height in pixels.
pub const DEFAULT_TILE_HEIGHT: u32 = 2800;

/// A decoded full-page screenshot.
#[derive(Debug, Clone)]
pub struct PageCapture {
    pub image: RgbaImage,
}

impl PageCapture {
    /// Decode a PNG screenshot.
    pub fn from_png(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)
            .context("Failed to decode page screenshot")?
            .to_rgba8();
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// One horizontal band of a capture. `top` is the band's first row in the source.
#[derive(Debug, Clone)]
pub struct ImageTile {
    pub top: u32,
    pub image: RgbaImage,
}

impl ImageTile {
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buf, ImageFormat::Png)
            .context("Failed to encode tile as PNG")?;
        Ok(buf.into_inner())
    }

    pub fn to_base64_png(&self) -> Result<String> {
        Ok(STANDARD.encode(self.to_png()?))
    }

    pub fn to_data_url(&self) -> Result<String> {
        Ok(format!("data:image/png;base64,{}", self.to_base64_png()?))
    }
}

/// Partition a capture into top-to-bottom bands no taller than `target_height`.
///
/// A capture that already fits is returned unchanged as the only tile. Otherwise every
/// band is exactly `target_height` rows except the last, which holds the remainder.
pub fn split_capture(capture: &PageCapture, target_height: u32) -> Result<Vec<ImageTile>> {
    if target_height == 0 {
        bail!("Tile height must be greater than zero");
    }

    let (width, height) = capture.image.dimensions();
    if height <= target_height {
        return Ok(vec![ImageTile {
            top: 0,
            image: capture.image.clone(),
        }]);
    }

    let mut tiles = Vec::with_capacity(height.div_ceil(target_height) as usize);
    let mut top = 0;
    while top < height {
        let band = target_height.min(height - top);
        let image = imageops::crop_imm(&capture.image, 0, top, width, band).to_image();
        tiles.push(ImageTile { top, image });
        top += band;
    }

    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// Every pixel encodes its own coordinates so misplaced rows are detectable.
    fn gradient(width: u32, height: u32) -> PageCapture {
        let image = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 251) as u8, (y % 251) as u8, (y / 251 % 251) as u8, 255])
        });
        PageCapture { image }
    }

    fn restack(tiles: &[ImageTile], width: u32) -> RgbaImage {
        let height = tiles.iter().map(|t| t.height()).sum();
        let mut out = RgbaImage::new(width, height);
        let mut y = 0;
        for tile in tiles {
            imageops::replace(&mut out, &tile.image, 0, y as i64);
            y += tile.height();
        }
        out
    }

    #[test]
    fn test_short_capture_is_single_unchanged_tile() {
        let capture = gradient(40, 2800);
        let tiles = split_capture(&capture, 2800).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].top, 0);
        assert_eq!(tiles[0].image, capture.image);
    }

    #[test]
    fn test_tiles_reconstruct_original() {
        for (height, target) in [(1, 1), (7, 3), (9, 3), (10, 3), (2801, 2800), (6000, 2800), (500, 64)] {
            let capture = gradient(13, height);
            let tiles = split_capture(&capture, target).unwrap();

            assert_eq!(tiles.len() as u32, height.div_ceil(target), "H={height} T={target}");
            assert!(tiles.iter().all(|t| t.height() <= target && t.height() > 0));
            assert!(tiles.iter().all(|t| t.image.width() == 13));
            assert_eq!(restack(&tiles, 13), capture.image, "H={height} T={target}");
        }
    }

    #[test]
    fn test_remainder_lands_in_last_tile() {
        let tiles = split_capture(&gradient(5, 6000), 2800).unwrap();
        let heights: Vec<u32> = tiles.iter().map(|t| t.height()).collect();
        let tops: Vec<u32> = tiles.iter().map(|t| t.top).collect();
        assert_eq!(heights, vec![2800, 2800, 400]);
        assert_eq!(tops, vec![0, 2800, 5600]);
    }

    #[test]
    fn test_evenly_divisible_height() {
        let tiles = split_capture(&gradient(5, 5600), 2800).unwrap();
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[1].height(), 2800);
    }

    #[test]
    fn test_zero_target_rejected() {
        assert!(split_capture(&gradient(5, 5), 0).is_err());
    }

    #[test]
    fn test_png_round_trip_through_capture() {
        let capture = gradient(8, 20);
        let tile = &split_capture(&capture, 10).unwrap()[1];
        let decoded = PageCapture::from_png(&tile.to_png().unwrap()).unwrap();
        assert_eq!(decoded.image, tile.image);
        assert!(tile.to_data_url().unwrap().starts_with("data:image/png;base64,"));
    }
}
