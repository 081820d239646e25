//! Decoding, cropping and re-encoding of uploaded images.
//!
//! Everything here is CPU-bound and synchronous; async callers should run it
//! on a blocking thread.

use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageFormat, ImageReader};
use serde::Serialize;
use std::io::Cursor;

use crate::{
    core::{
        crop::CropBox,
        format::{FormatSpec, OutputFormat},
        vision::ImageInput,
    },
    error::{AppError, Result},
};

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Geometry of a finished crop, echoed back to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CropGeometry {
    /// Source image size
    pub original: Dimensions,
    /// Size of the produced image
    pub cropped: Dimensions,
    /// The area actually extracted
    pub crop_area: CropBox,
}

/// A cropped and encoded image.
#[derive(Debug, Clone)]
pub struct CroppedImage {
    /// Encoded bytes
    pub bytes: Vec<u8>,
    /// Output format used
    pub spec: FormatSpec,
    /// What was cut out of what
    pub geometry: CropGeometry,
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AppError::BadImage(format!("unreadable image data: {}", e)))
}

/// Read the dimensions of an encoded image without decoding the pixels.
pub fn probe_dimensions(bytes: &[u8]) -> Result<Dimensions> {
    let reader = reader(bytes)?;
    if reader.format().is_none() {
        return Err(AppError::BadImage("unrecognized image format".to_string()));
    }
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| AppError::BadImage(format!("unable to determine image dimensions: {}", e)))?;
    if width == 0 || height == 0 {
        return Err(AppError::BadImage("image has no pixels".to_string()));
    }
    Ok(Dimensions { width, height })
}

fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    reader(bytes)?
        .decode()
        .map_err(|e| AppError::BadImage(format!("failed to decode image: {}", e)))
}

/// Prepare an upload for the vision API.
///
/// JPEG, PNG, WebP and GIF are sent untouched. Anything else we can decode
/// (BMP, TIFF) is re-encoded to PNG first.
pub fn vision_input(bytes: &[u8]) -> Result<ImageInput> {
    let format = image::guess_format(bytes)
        .map_err(|e| AppError::BadImage(format!("unrecognized image format: {}", e)))?;

    match format {
        ImageFormat::Jpeg => Ok(ImageInput::from_bytes(bytes, "image/jpeg")),
        ImageFormat::Png => Ok(ImageInput::from_bytes(bytes, "image/png")),
        ImageFormat::WebP => Ok(ImageInput::from_bytes(bytes, "image/webp")),
        ImageFormat::Gif => Ok(ImageInput::from_bytes(bytes, "image/gif")),
        other => {
            log::debug!("re-encoding {:?} upload to PNG for analysis", other);
            let img = decode(bytes)?;
            let png = encode(&img, OutputFormat::Png, 100)?;
            Ok(ImageInput::from_bytes(&png, "image/png"))
        }
    }
}

fn encode(img: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match format {
        OutputFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))?;
        }
        OutputFormat::Webp | OutputFormat::Gif => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_to(&mut buf, format.image_format())?;
        }
        OutputFormat::Png => img.write_to(&mut buf, ImageFormat::Png)?,
    }
    Ok(buf.into_inner())
}

/// Crop an encoded image and write it in the requested format.
///
/// The box is clamped to the decoded image again, so a stale or slightly
/// wrong box still produces output.
pub fn crop_and_encode(bytes: &[u8], crop: CropBox, spec: &FormatSpec) -> Result<CroppedImage> {
    let img = decode(bytes)?;
    let original = Dimensions {
        width: img.width(),
        height: img.height(),
    };
    let area = crop.clamped_to(original.width, original.height);
    if area != crop {
        log::warn!(
            "crop {:?} clamped to {:?} for {}x{} image",
            crop,
            area,
            original.width,
            original.height
        );
    }

    let cropped = img.crop_imm(area.x, area.y, area.width, area.height);
    let bytes = encode(&cropped, spec.format, spec.quality)?;

    Ok(CroppedImage {
        bytes,
        spec: spec.clone(),
        geometry: CropGeometry {
            original,
            cropped: Dimensions {
                width: area.width,
                height: area.height,
            },
            crop_area: area,
        },
    })
}
