//! Background image decoding for the compositor's unit-0 texture.
use std::path::PathBuf;

use image::imageops::FilterType;
use layerconfig::CropRect;
use thiserror::Error;
use tracing::debug;

/// Pixel written into the placeholder texture used when no background is
/// available.
pub const PLACEHOLDER_PIXEL: [u8; 4] = [0, 0, 0, 255];

/// Upper bound on halvings applied to fit an oversized image.
pub const MAX_DOWNSAMPLE_STEPS: u32 = 8;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to open background image {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("crop {crop:?} lies outside the {width}x{height} image")]
    InvalidCrop {
        crop: CropRect,
        width: u32,
        height: u32,
    },
    #[error("{width}x{height} image still exceeds {max_dimension} after maximal downsampling")]
    Exhausted {
        width: u32,
        height: u32,
        max_dimension: u32,
    },
}

/// Tightly packed RGBA8 pixels, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn placeholder() -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: PLACEHOLDER_PIXEL.to_vec(),
        }
    }
}

pub trait ImageProvider: Send + Sync {
    /// Decodes `image_ref`, cropped to `crop`, sized for a surface of
    /// `bounds` and never exceeding `max_dimension` on either side.
    fn decode(
        &self,
        image_ref: &str,
        crop: Option<CropRect>,
        bounds: (u32, u32),
        max_dimension: u32,
    ) -> Result<DecodedImage, DecodeError>;
}

/// Halves `width`x`height` until it fits `max_dimension` and is no larger
/// than twice `bounds`, giving up after `MAX_DOWNSAMPLE_STEPS` halvings.
/// A zero bound disables the bounds check.
pub fn downsampled_size(
    width: u32,
    height: u32,
    bounds: (u32, u32),
    max_dimension: u32,
) -> Result<(u32, u32), DecodeError> {
    let exceeds_bounds = |w: u32, h: u32| {
        bounds.0 > 0
            && bounds.1 > 0
            && (w > bounds.0.saturating_mul(2) || h > bounds.1.saturating_mul(2))
    };
    let exceeds_max = |w: u32, h: u32| w > max_dimension || h > max_dimension;

    let (mut w, mut h) = (width, height);
    let mut steps = 0;
    while (exceeds_max(w, h) || exceeds_bounds(w, h)) && steps < MAX_DOWNSAMPLE_STEPS {
        w = (w / 2).max(1);
        h = (h / 2).max(1);
        steps += 1;
    }
    if exceeds_max(w, h) {
        return Err(DecodeError::Exhausted {
            width,
            height,
            max_dimension,
        });
    }
    Ok((w, h))
}

/// Decodes images from the filesystem with the `image` crate.
#[derive(Debug, Clone, Default)]
pub struct FileImageProvider {
    root: Option<PathBuf>,
}

impl FileImageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative image references against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, image_ref: &str) -> PathBuf {
        let path = PathBuf::from(image_ref);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }
}

impl ImageProvider for FileImageProvider {
    fn decode(
        &self,
        image_ref: &str,
        crop: Option<CropRect>,
        bounds: (u32, u32),
        max_dimension: u32,
    ) -> Result<DecodedImage, DecodeError> {
        let path = self.resolve(image_ref);
        let mut image = image::open(&path).map_err(|source| DecodeError::Open {
            path: path.clone(),
            source,
        })?;

        if let Some(crop) = crop {
            let (width, height) = (image.width(), image.height());
            let fits = crop.width > 0
                && crop.height > 0
                && crop.x.checked_add(crop.width).is_some_and(|right| right <= width)
                && crop.y.checked_add(crop.height).is_some_and(|bottom| bottom <= height);
            if !fits {
                return Err(DecodeError::InvalidCrop {
                    crop,
                    width,
                    height,
                });
            }
            image = image.crop_imm(crop.x, crop.y, crop.width, crop.height);
        }

        let (width, height) = (image.width(), image.height());
        let (target_width, target_height) =
            downsampled_size(width, height, bounds, max_dimension)?;
        if (target_width, target_height) != (width, height) {
            debug!(
                path = %path.display(),
                from = ?(width, height),
                to = ?(target_width, target_height),
                "downsampling background"
            );
            image = image.resize_exact(target_width, target_height, FilterType::Triangle);
        }

        let rgba = image.into_rgba8();
        Ok(DecodedImage {
            width: rgba.width(),
            height: rgba.height(),
            pixels: rgba.into_raw(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn write_image(dir: &std::path::Path, name: &str, width: u32, height: u32) -> PathBuf {
        let mut image = RgbaImage::new(width, height);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgba([x as u8, y as u8, 0, 255]);
        }
        let path = dir.join(name);
        image.save(&path).unwrap();
        path
    }

    #[test]
    fn fitting_image_is_untouched() {
        assert_eq!(downsampled_size(800, 600, (1920, 1080), 4096).unwrap(), (800, 600));
    }

    #[test]
    fn halves_until_within_limits() {
        assert_eq!(downsampled_size(8000, 4000, (0, 0), 4096).unwrap(), (4000, 2000));
        assert_eq!(downsampled_size(4000, 4000, (500, 500), 8192).unwrap(), (1000, 1000));
    }

    #[test]
    fn gives_up_after_max_steps() {
        let err = downsampled_size(u32::MAX, 10, (0, 0), 1024).unwrap_err();
        assert!(matches!(err, DecodeError::Exhausted { max_dimension: 1024, .. }));
    }

    #[test]
    fn decodes_and_crops_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "bg.png", 16, 8);
        let provider = FileImageProvider::with_root(dir.path());

        let full = provider.decode("bg.png", None, (16, 8), 4096).unwrap();
        assert_eq!((full.width, full.height), (16, 8));
        assert_eq!(full.pixels.len(), 16 * 8 * 4);
        // top row first
        assert_eq!(&full.pixels[..4], &[0, 0, 0, 255]);

        let crop = CropRect {
            x: 4,
            y: 2,
            width: 4,
            height: 4,
        };
        let cropped = provider.decode("bg.png", Some(crop), (4, 4), 4096).unwrap();
        assert_eq!((cropped.width, cropped.height), (4, 4));
        assert_eq!(&cropped.pixels[..4], &[4, 2, 0, 255]);
    }

    #[test]
    fn rejects_crop_outside_image() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "bg.png", 8, 8);
        let provider = FileImageProvider::with_root(dir.path());
        let crop = CropRect {
            x: 6,
            y: 0,
            width: 4,
            height: 4,
        };
        assert!(matches!(
            provider.decode("bg.png", Some(crop), (8, 8), 4096),
            Err(DecodeError::InvalidCrop { .. })
        ));
    }

    #[test]
    fn downsamples_to_max_dimension() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "big.png", 64, 32);
        let provider = FileImageProvider::with_root(dir.path());
        let decoded = provider.decode("big.png", None, (0, 0), 16).unwrap();
        assert_eq!((decoded.width, decoded.height), (16, 8));
    }

    #[test]
    fn missing_file_reports_open_error() {
        let provider = FileImageProvider::new();
        assert!(matches!(
            provider.decode("/definitely/not/here.png", None, (1, 1), 16),
            Err(DecodeError::Open { .. })
        ));
    }
}
