use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

/// Longest side, in pixels, of an image submitted for OCR.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

#[derive(Debug, Error)]
pub enum ImageDecodeError {
    #[error("Unrecognized image format")]
    UnknownFormat,
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Failed to encode resized image: {0}")]
    Encode(String),
}

/// Checks decodability and caps image size before OCR submission.
#[derive(Debug, Clone, Copy)]
pub struct ImagePreprocessor {
    max_dimension: u32,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION)
    }
}

impl ImagePreprocessor {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension: max_dimension.max(1) }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// True only if the buffer is a supported raster format and fully decodes.
    pub fn validate(&self, data: &[u8]) -> bool {
        decode(data).is_ok()
    }

    /// Downscale so the longer side equals the maximum dimension.
    ///
    /// Images already within bounds are returned byte-for-byte; larger ones are
    /// re-encoded as PNG.
    pub fn resize(&self, data: &[u8]) -> Result<Vec<u8>, ImageDecodeError> {
        let img = decode(data)?;
        let (width, height) = img.dimensions();

        let Some((new_width, new_height)) = scaled_dimensions(width, height, self.max_dimension)
        else {
            tracing::debug!(width, height, "image within bounds, passing through");
            return Ok(data.to_vec());
        };

        tracing::debug!(width, height, new_width, new_height, "downscaling image for OCR");
        let resized = img.resize_exact(new_width, new_height, FilterType::Triangle);
        encode_as_png(&resized)
    }
}

fn decode(data: &[u8]) -> Result<DynamicImage, ImageDecodeError> {
    let format = image::guess_format(data).map_err(|_| ImageDecodeError::UnknownFormat)?;
    Ok(image::load_from_memory_with_format(data, format)?)
}

/// `None` when no scaling is needed. The long side lands exactly on `max`,
/// the short side is rounded to the nearest pixel.
fn scaled_dimensions(width: u32, height: u32, max: u32) -> Option<(u32, u32)> {
    let longest = width.max(height);
    if longest <= max {
        return None;
    }
    let scale = |side: u32| -> u32 {
        let scaled = (u64::from(side) * u64::from(max) + u64::from(longest) / 2) / u64::from(longest);
        (scaled as u32).clamp(1, max)
    };
    if width >= height {
        Some((max, scale(height)))
    } else {
        Some((scale(width), max))
    }
}

fn encode_as_png(img: &DynamicImage) -> Result<Vec<u8>, ImageDecodeError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| ImageDecodeError::Encode(e.to_string()))?;
    Ok(buf)
}
