use bytes::Bytes;

use super::solution::{FileMetadata, OriginalFormat};
use crate::core::format::file_extension;

/// An image received in a multipart form.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// Client-supplied file name
    pub file_name: String,
    /// Declared MIME type
    pub content_type: String,
    /// Raw bytes
    pub data: Bytes,
}

impl UploadedImage {
    /// Create an upload from its parts.
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Lowercase extension of the file name, or `unknown`.
    pub fn extension(&self) -> String {
        file_extension(&self.file_name).unwrap_or_else(|| "unknown".to_string())
    }

    /// Size and type, echoed in crop metadata.
    pub fn file_metadata(&self) -> FileMetadata {
        FileMetadata {
            size: self.size(),
            content_type: self.content_type.clone(),
        }
    }

    /// Name, type and extension, echoed on the public route.
    pub fn original_format(&self) -> OriginalFormat {
        OriginalFormat {
            name: self.file_name.clone(),
            content_type: self.content_type.clone(),
            extension: self.extension(),
        }
    }
}
