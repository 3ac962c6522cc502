//! Screenshot cropping.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use linkscope_core::Error;
use linkscope_core::config::{CaptureFormat, CropArea};
use std::io::Cursor;

/// Clamp `area` to an image of `width` x `height`.
///
/// Returns `None` when the rectangle lies entirely outside the image.
fn clamp(area: CropArea, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    if area.x >= width || area.y >= height {
        return None;
    }
    let w = area.width.min(width - area.x);
    let h = area.height.min(height - area.y);
    (w > 0 && h > 0).then_some((area.x, area.y, w, h))
}

fn encode(
    image: &DynamicImage,
    format: CaptureFormat,
    quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    match format {
        CaptureFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            image.to_rgb8().write_with_encoder(encoder)?;
        }
        CaptureFormat::Png => image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?,
    }
    Ok(buf)
}

/// Decode `data`, crop it to `area`, and re-encode in `format`.
///
/// The rectangle is clamped to the image bounds.
///
/// # Errors
///
/// Returns `Error::CropFailed` if the bytes do not decode, the rectangle
/// misses the image, or encoding fails.
pub fn crop_image(
    data: &[u8],
    area: CropArea,
    format: CaptureFormat,
    quality: u8,
) -> Result<Bytes, Error> {
    let image =
        image::load_from_memory(data).map_err(|e| Error::CropFailed(format!("decode: {e}")))?;

    let (x, y, w, h) = clamp(area, image.width(), image.height()).ok_or_else(|| {
        Error::CropFailed(format!(
            "crop area {:?} outside {}x{} image",
            <[u32; 4]>::from(area),
            image.width(),
            image.height()
        ))
    })?;

    let cropped = image.crop_imm(x, y, w, h);
    let encoded = encode(&cropped, format, quality)
        .map_err(|e| Error::CropFailed(format!("encode: {e}")))?;
    Ok(Bytes::from(encoded))
}
