//! Crop results as they are sent to clients.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::{
    crop::{center_crop_for_ratio, output_size, AspectRatio, CropAnalysis, CropBox},
    daily_usage::DailyUsage,
    imaging::CropGeometry,
};

/// Contract version reported in [`CropSolution::version`] and the
/// `X-Crop-API-Version` header.
pub const CONTRACT_VERSION: &str = "1";

/// Prompt version of the scene analysis, part of its cache key.
pub const SCENE_PROMPT_VERSION: &str = "v1.0";

/// How an aesthetic crop was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationInfo {
    /// Repairs applied to the suggested crop
    pub crop_errors: Vec<String>,
    /// Model calls made; 0 when the fallback was used without any answer
    pub attempt_count: u32,
    /// Whether a preset crop replaced the model's answer
    pub fallback_used: bool,
}

/// Outcome of the aesthetic analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AestheticCropResult {
    /// Title and description
    pub analysis: CropAnalysis,
    /// The crop, always inside the image
    pub crop_params: CropBox,
    /// How the crop was obtained
    pub validation_info: ValidationInfo,
}

/// Where a saved output can be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputInfo {
    /// Saved file name
    pub filename: String,
    /// Relative download URL
    pub download_url: String,
    /// Encoder used, e.g. `jpeg`
    pub format: String,
    /// File extension
    pub extension: String,
    /// Output MIME type
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Encoder quality
    pub quality: u8,
}

/// Size and type of the uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    /// Bytes uploaded
    pub size: usize,
    /// Declared MIME type
    #[serde(rename = "type")]
    pub content_type: String,
}

/// Geometry of the crop, plus the upload's metadata on the public route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CropMetadata {
    /// Original, cropped and extracted area
    #[serde(flatten)]
    pub geometry: CropGeometry,
    /// Upload metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMetadata>,
}

/// A finished aesthetic crop.
#[derive(Debug, Clone, Serialize)]
pub struct CropOutcome {
    /// Always `true`; failures are reported as errors
    pub success: bool,
    /// Request id, also part of the output file name
    pub request_id: String,
    /// Name of the uploaded file
    pub original_filename: String,
    /// Title and description
    pub analysis: CropAnalysis,
    /// The suggested crop
    pub crop_params: CropBox,
    /// Repairs and attempts behind the crop
    pub validation_info: ValidationInfo,
    /// What was actually cut out
    pub metadata: CropMetadata,
    /// Saved output
    pub output: OutputInfo,
}

/// One file of a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    /// Cropped and saved
    Done(Box<CropOutcome>),
    /// Failed, with the reason
    Failed {
        /// Always `false`
        success: bool,
        /// Name of the uploaded file
        original_filename: String,
        /// What went wrong
        error: String,
    },
}

impl BatchItem {
    /// A failed entry.
    pub fn failed(original_filename: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Failed {
            success: false,
            original_filename: original_filename.into(),
            error: error.into(),
        }
    }

    /// Whether the file was processed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Result of a batch request.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    /// Always `true` once the batch ran
    pub success: bool,
    /// Batch id; item request ids are `<batch_id>_<n>`
    pub batch_id: String,
    /// Files received
    pub total: usize,
    /// Files processed
    pub success_count: usize,
    /// Per-file results in upload order
    pub results: Vec<BatchItem>,
}

/// Declared name and type of the upload on the public route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginalFormat {
    /// File name
    pub name: String,
    /// MIME type
    #[serde(rename = "type")]
    pub content_type: String,
    /// Lowercase extension or `unknown`
    pub extension: String,
}

/// Response of the public crop route: the crop outcome plus request
/// bookkeeping. Cached as a whole and replayed on duplicate uploads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CropResponse {
    /// The crop itself
    #[serde(flatten)]
    pub outcome: CropOutcome,
    /// SHA3-256 of the upload
    pub image_hash: String,
    /// Dedup cache key
    pub format_aware_cache_key: String,
    /// Declared upload format
    pub original_format: OriginalFormat,
    /// Milliseconds spent on this request
    pub processing_time: u64,
    /// When the crop was produced
    pub timestamp: DateTime<Utc>,
    /// Whether this response was replayed from the cache
    pub cached: bool,
    /// Daily quota after this request
    pub daily_usage: DailyUsage,
}

/// Origin of a contract solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SolutionSource {
    /// Fresh model answer
    Model,
    /// Replayed from the dedup cache
    Cache,
    /// Centered crop computed without the model
    Fallback,
}

/// Crop geometry of a contract solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolutionCropParams {
    /// `[width, height]` of the source
    pub original_size: [u32; 2],
    /// Area to extract
    pub crop_box: CropBox,
    /// `[width, height]` to render at
    pub output_size: [u32; 2],
    /// Requested ratio, as sent
    pub crop_ratio: String,
}

/// Bookkeeping of a contract solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolutionMetadata {
    /// Target scene
    pub scene: String,
    /// Model that produced it, or `fallback`
    pub model: String,
    /// Prompt version
    pub prompt_version: String,
    /// Where it came from
    pub source: SolutionSource,
    /// Request id
    pub request_id: String,
}

/// Scene/ratio crop suggestion, contract version 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CropSolution {
    /// Always `"1"`
    pub version: String,
    /// User-facing reason for the crop
    pub reason: String,
    /// Technical notes
    pub details: String,
    /// Geometry
    pub crop_params: SolutionCropParams,
    /// Bookkeeping
    pub metadata: SolutionMetadata,
}

/// What the model proposed for a scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneSuggestion {
    /// User-facing reason
    pub reason: String,
    /// Technical notes
    pub details: String,
    /// Proposed crop, already checked against the image bounds
    pub crop_box: CropBox,
}

impl CropSolution {
    fn build(
        reason: String,
        details: String,
        original: (u32, u32),
        crop_box: CropBox,
        ratio: &AspectRatio,
        metadata: SolutionMetadata,
    ) -> Self {
        let (out_w, out_h) = output_size(&crop_box, ratio);
        Self {
            version: CONTRACT_VERSION.to_string(),
            reason,
            details,
            crop_params: SolutionCropParams {
                original_size: [original.0, original.1],
                crop_box,
                output_size: [out_w, out_h],
                crop_ratio: ratio.as_str().to_string(),
            },
            metadata,
        }
    }

    /// Wrap a model suggestion.
    pub fn from_suggestion(
        suggestion: SceneSuggestion,
        original: (u32, u32),
        ratio: &AspectRatio,
        scene: &str,
        model: &str,
        request_id: &str,
    ) -> Self {
        Self::build(
            suggestion.reason,
            suggestion.details,
            original,
            suggestion.crop_box,
            ratio,
            SolutionMetadata {
                scene: scene.to_string(),
                model: model.to_string(),
                prompt_version: SCENE_PROMPT_VERSION.to_string(),
                source: SolutionSource::Model,
                request_id: request_id.to_string(),
            },
        )
    }

    /// Centered crop at `ratio`, used when the model cannot answer.
    pub fn fallback(
        original: (u32, u32),
        ratio: &AspectRatio,
        scene: &str,
        request_id: &str,
    ) -> Self {
        let crop_box = center_crop_for_ratio(original.0, original.1, ratio);
        Self::build(
            "Automatic analysis: centered crop based on the image proportions".to_string(),
            "The AI service was unavailable, so the largest centered crop at the requested \
             ratio was used to keep the content intact"
                .to_string(),
            original,
            crop_box,
            ratio,
            SolutionMetadata {
                scene: scene.to_string(),
                model: "fallback".to_string(),
                prompt_version: SCENE_PROMPT_VERSION.to_string(),
                source: SolutionSource::Fallback,
                request_id: request_id.to_string(),
            },
        )
    }

    /// The same solution replayed from the cache for another request.
    pub fn replayed(mut self, request_id: &str) -> Self {
        self.metadata.source = SolutionSource::Cache;
        self.metadata.request_id = request_id.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_solution_shape() {
        let ratio: AspectRatio = "1:1".parse().unwrap();
        let solution = CropSolution::fallback((1920, 1080), &ratio, "tiktok", "req-1");
        let json = serde_json::to_value(&solution).unwrap();

        assert_eq!(json["version"], "1");
        assert_eq!(json["crop_params"]["original_size"], serde_json::json!([1920, 1080]));
        assert_eq!(
            json["crop_params"]["crop_box"],
            serde_json::json!({"x": 420, "y": 0, "width": 1080, "height": 1080})
        );
        assert_eq!(json["crop_params"]["output_size"], serde_json::json!([1080, 1080]));
        assert_eq!(json["metadata"]["source"], "fallback");
        assert_eq!(json["metadata"]["scene"], "tiktok");
        assert_eq!(json["metadata"]["prompt_version"], "v1.0");
    }

    #[test]
    fn test_replayed_solution_is_marked_as_cache() {
        let ratio = AspectRatio::square();
        let suggestion = SceneSuggestion {
            reason: "r".into(),
            details: "d".into(),
            crop_box: CropBox::new(0, 0, 500, 500),
        };
        let solution =
            CropSolution::from_suggestion(suggestion, (800, 600), &ratio, "instagram-post", "gpt", "a");
        assert_eq!(solution.metadata.source, SolutionSource::Model);

        let replay = solution.replayed("b");
        assert_eq!(replay.metadata.source, SolutionSource::Cache);
        assert_eq!(replay.metadata.request_id, "b");
    }

    #[test]
    fn test_failed_batch_item() {
        let item = BatchItem::failed("a.png", "unrecognized image format");
        assert!(!item.is_success());
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["original_filename"], "a.png");
    }
}
