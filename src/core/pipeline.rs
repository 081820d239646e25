//! Upload to saved crop: probe, analyze, crop, encode, save.

use bytes::Bytes;
use std::sync::Arc;

use crate::{
    core::{
        analyzer::CropAnalyzer,
        format::resolve_format,
        hash::content_seed,
        imaging::{crop_and_encode, probe_dimensions, vision_input, Dimensions},
        prompt::Language,
        storage::{download_url, OutputStore},
        vision::ImageInput,
    },
    error::Result,
    models::{
        solution::{CropMetadata, CropOutcome, OutputInfo},
        upload::UploadedImage,
    },
};

/// An upload decoded far enough to be sent to the model.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Source dimensions
    pub dims: Dimensions,
    /// Model input
    pub input: ImageInput,
}

/// Probe the dimensions and build the model input on a blocking thread.
pub async fn prepare_image(data: Bytes) -> Result<PreparedImage> {
    tokio::task::spawn_blocking(move || {
        let dims = probe_dimensions(&data)?;
        let input = vision_input(&data)?;
        Ok(PreparedImage { dims, input })
    })
    .await?
}

/// Runs the aesthetic crop for single and batch uploads.
#[derive(Debug, Clone)]
pub struct CropPipeline {
    analyzer: Arc<CropAnalyzer>,
    store: OutputStore,
}

impl CropPipeline {
    /// Create a pipeline writing into `store`.
    pub fn new(analyzer: Arc<CropAnalyzer>, store: OutputStore) -> Self {
        Self { analyzer, store }
    }

    /// The analyzer used for every crop.
    pub fn analyzer(&self) -> &CropAnalyzer {
        &self.analyzer
    }

    /// The output directory.
    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    /// Analyze, crop and save one upload as `<prefix>_<request_id>.<ext>`.
    pub async fn run(
        &self,
        upload: &UploadedImage,
        language: Language,
        prefix: &str,
        request_id: &str,
    ) -> Result<CropOutcome> {
        log::info!(
            "[{}] aesthetic crop of {} ({} bytes)",
            request_id,
            upload.file_name,
            upload.size()
        );

        let prepared = prepare_image(upload.data.clone()).await?;
        let seed = content_seed(&upload.data);
        let result = self
            .analyzer
            .analyze_aesthetic(&prepared.input, prepared.dims, language, seed)
            .await;

        let spec = resolve_format(&upload.file_name, &upload.content_type);
        let data = upload.data.clone();
        let crop = result.crop_params;
        let cropped = {
            let spec = spec.clone();
            tokio::task::spawn_blocking(move || crop_and_encode(&data, crop, &spec)).await??
        };

        let filename = format!("{}_{}.{}", prefix, request_id, spec.extension);
        self.store.save(&filename, &cropped.bytes).await?;
        log::info!(
            "[{}] saved {} ({}, fallback: {})",
            request_id,
            filename,
            spec.format.as_str(),
            result.validation_info.fallback_used
        );

        Ok(CropOutcome {
            success: true,
            request_id: request_id.to_string(),
            original_filename: upload.file_name.clone(),
            analysis: result.analysis,
            crop_params: result.crop_params,
            validation_info: result.validation_info,
            metadata: CropMetadata {
                geometry: cropped.geometry,
                file: None,
            },
            output: OutputInfo {
                download_url: download_url(&filename),
                filename,
                format: spec.format.as_str().to_string(),
                extension: spec.extension.clone(),
                mime_type: spec.mime_type.to_string(),
                quality: spec.quality,
            },
        })
    }
}
