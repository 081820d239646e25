//! Output format selection for cropped images.
//!
//! Common web formats are preserved. Formats we cannot or should not write
//! back (HEIC/HEIF, BMP, TIFF, AVIF) are converted to JPEG or PNG.

use serde::Serialize;
use std::path::Path;

/// Encoders available for cropped output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JPEG with a quality setting
    Jpeg,
    /// Lossless PNG
    Png,
    /// Lossless WebP
    Webp,
    /// Single-frame GIF
    Gif,
}

impl OutputFormat {
    /// Format name as reported in API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Gif => "gif",
        }
    }

    /// The matching `image` crate format.
    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
            Self::Webp => image::ImageFormat::WebP,
            Self::Gif => image::ImageFormat::Gif,
        }
    }
}

/// How a cropped image is written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatSpec {
    /// Encoder to use
    pub format: OutputFormat,
    /// File extension of the saved output
    pub extension: String,
    /// MIME type of the saved output
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
    /// Encoder quality (only meaningful for JPEG)
    pub quality: u8,
}

impl FormatSpec {
    fn new(format: OutputFormat, extension: &str, mime_type: &'static str, quality: u8) -> Self {
        Self {
            format,
            extension: extension.to_string(),
            mime_type,
            quality,
        }
    }
}

/// Look up the output format for a source extension (lowercase, no dot).
fn spec_for_extension(ext: &str) -> Option<FormatSpec> {
    use OutputFormat::*;

    let spec = match ext {
        "jpeg" | "jpg" => FormatSpec::new(Jpeg, ext, "image/jpeg", 95),
        "png" => FormatSpec::new(Png, "png", "image/png", 100),
        "webp" => FormatSpec::new(Webp, "webp", "image/webp", 90),
        "gif" => FormatSpec::new(Gif, "gif", "image/gif", 100),
        // no AVIF encoder in the build
        "avif" => FormatSpec::new(Png, "png", "image/png", 100),
        "heic" | "heif" => FormatSpec::new(Jpeg, "jpg", "image/jpeg", 85),
        "bmp" | "tiff" | "tif" => FormatSpec::new(Png, "png", "image/png", 100),
        _ => return None,
    };
    Some(spec)
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/avif" => Some("avif"),
        "image/heic" => Some("heic"),
        "image/heif" => Some("heif"),
        "image/bmp" => Some("bmp"),
        "image/tiff" => Some("tiff"),
        _ => None,
    }
}

/// Lowercase extension of a file name, without the dot.
pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Pick the output format for an upload.
///
/// The file extension wins, then the declared MIME type, then PNG.
pub fn resolve_format(filename: &str, mime: &str) -> FormatSpec {
    file_extension(filename)
        .and_then(|ext| spec_for_extension(&ext))
        .or_else(|| extension_for_mime(mime).and_then(spec_for_extension))
        .unwrap_or_else(|| FormatSpec::new(OutputFormat::Png, "png", "image/png", 100))
}
