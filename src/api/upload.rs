//! Multipart form reading

use axum::extract::Multipart;
use std::collections::HashMap;

use crate::{
    error::{AppError, Result},
    models::upload::UploadedImage,
};

/// Files and text fields of a multipart form.
#[derive(Debug, Default)]
pub(crate) struct UploadForm {
    files: Vec<(String, UploadedImage)>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    /// Drain `multipart`. Parts with a file name are files, the rest text.
    pub(crate) async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or("").to_string();

            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let data = field.bytes().await?;
                    log::debug!(
                        "received file '{}' in field '{}' ({} bytes)",
                        file_name,
                        name,
                        data.len()
                    );
                    form.files
                        .push((name, UploadedImage::new(file_name, content_type, data)));
                }
                None => {
                    let value = field.text().await?;
                    form.fields.insert(name, value);
                }
            }
        }

        Ok(form)
    }

    /// The first file sent as `field`.
    pub(crate) fn file(&self, field: &str) -> Option<&UploadedImage> {
        self.files.iter().find(|(n, _)| n == field).map(|(_, f)| f)
    }

    /// The first file sent as `field`, or an upload error.
    pub(crate) fn require_file(&self, field: &str) -> Result<&UploadedImage> {
        self.file(field)
            .ok_or_else(|| AppError::UploadError("No image file provided".to_string()))
    }

    /// Every file sent as `field`, in order.
    pub(crate) fn files(&self, field: &str) -> Vec<UploadedImage> {
        self.files
            .iter()
            .filter(|(n, _)| n == field)
            .map(|(_, f)| f.clone())
            .collect()
    }

    /// A non-blank text field.
    pub(crate) fn text(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}
