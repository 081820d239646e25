//! Crop analysis flows built on a [`VisionClient`].
//!
//! * aesthetic: localized prompt file, up to two attempts, repairs the
//!   suggested box and falls back to a preset crop when the model fails
//! * scene: fixed contract prompt for a target platform, strict bounds
//!   check, short deadline; the caller decides what to do on failure
//! * debug: caller-chosen model and prompt, strict check, no fallback

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    core::{
        crop::{
            check_strict, fallback_crop, strict_box_from_value, validate_and_fix, AspectRatio,
            CropAnalysis, CropFix, RawCropBox,
        },
        imaging::Dimensions,
        prompt::{render, scene_prompt, Language, PromptLoader},
        retry::{backoff_duration, is_retryable},
        vision::{ImageInput, VisionClient, VisionRequest},
    },
    error::{AppError, Result},
    models::solution::{AestheticCropResult, SceneSuggestion, ValidationInfo},
};

const AESTHETIC_MODE: &str = "aesthetic";

const SCENE_SYSTEM_PROMPT: &str =
    "You are a professional photo cropping assistant. Answer with a single JSON object only.";

/// Tunables of the analysis flows.
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    /// Model calls per aesthetic or debug analysis
    pub attempts: u32,
    /// Base of the exponential backoff between attempts
    pub retry_base_delay_ms: u64,
    /// Deadline of the scene analysis
    pub scene_timeout: Duration,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            attempts: 2,
            retry_base_delay_ms: 500,
            scene_timeout: Duration::from_secs(15),
        }
    }
}

/// Runs the crop analyses against a vision model.
pub struct CropAnalyzer {
    client: Arc<dyn VisionClient>,
    prompts: PromptLoader,
    settings: AnalyzerSettings,
}

impl std::fmt::Debug for CropAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CropAnalyzer")
            .field("client", &self.client.name())
            .field("model", &self.client.model())
            .field("prompts", &self.prompts)
            .field("settings", &self.settings)
            .finish()
    }
}

impl CropAnalyzer {
    /// Create an analyzer.
    pub fn new(client: Arc<dyn VisionClient>, prompts: PromptLoader, settings: AnalyzerSettings) -> Self {
        Self {
            client,
            prompts,
            settings,
        }
    }

    /// Default model of the underlying client.
    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Aesthetic crop suggestion. Never fails: when the model cannot
    /// produce a usable answer a preset crop chosen by `seed` is returned.
    pub async fn analyze_aesthetic(
        &self,
        image: &ImageInput,
        dims: Dimensions,
        language: Language,
        seed: u64,
    ) -> AestheticCropResult {
        let prompt = self.prompts.load(AESTHETIC_MODE, language).await;
        let request = VisionRequest::new(prompt.render(dims.width, dims.height), image.clone())
            .with_sampling(1500, 0.1);
        let attempts = self.settings.attempts.max(1);

        for attempt in 1..=attempts {
            log::info!(
                "aesthetic analysis attempt {}/{} for {}x{} image (prompt {})",
                attempt,
                attempts,
                dims.width,
                dims.height,
                prompt.version
            );

            match self.aesthetic_attempt(&request, dims).await {
                Ok((analysis, fix)) => {
                    if !fix.is_clean() && attempt < attempts {
                        log::warn!(
                            "attempt {} returned an invalid crop ({}), asking again",
                            attempt,
                            fix.messages().join("; ")
                        );
                        continue;
                    }
                    if !fix.is_clean() {
                        log::warn!("crop corrected: {}", fix.messages().join("; "));
                    }
                    return AestheticCropResult {
                        analysis,
                        crop_params: fix.fixed,
                        validation_info: ValidationInfo {
                            crop_errors: fix.messages(),
                            attempt_count: attempt,
                            fallback_used: false,
                        },
                    };
                }
                Err(e) => {
                    log::warn!("aesthetic attempt {} failed: {}", attempt, e);
                    if !should_retry(&e) {
                        break;
                    }
                    if attempt < attempts {
                        tokio::time::sleep(backoff_duration(
                            attempt - 1,
                            self.settings.retry_base_delay_ms,
                        ))
                        .await;
                    }
                }
            }
        }

        log::info!("all aesthetic attempts failed, using preset crop");
        let (analysis, fix) = fallback_crop(dims.width, dims.height, seed);
        AestheticCropResult {
            analysis,
            crop_params: fix.fixed,
            validation_info: ValidationInfo {
                crop_errors: fix.messages(),
                attempt_count: 0,
                fallback_used: true,
            },
        }
    }

    async fn aesthetic_attempt(
        &self,
        request: &VisionRequest,
        dims: Dimensions,
    ) -> Result<(CropAnalysis, CropFix)> {
        let response = self.client.complete(request).await?;
        let parsed = extract_json(&response.text)
            .ok_or_else(|| AppError::AiParse("no JSON object in model response".to_string()))?;

        let (analysis, crop_params) = match (parsed.get("analysis"), parsed.get("crop_params")) {
            (Some(a), Some(c)) if a.is_object() && c.is_object() => (a, c),
            _ => {
                return Err(AppError::AiParse(
                    "model response lacks analysis or crop_params".to_string(),
                ))
            }
        };

        let analysis: CropAnalysis = serde_json::from_value(analysis.clone())
            .map_err(|e| AppError::AiParse(format!("malformed analysis: {}", e)))?;
        let fix = validate_and_fix(RawCropBox::from_value(crop_params), dims.width, dims.height);
        Ok((analysis, fix))
    }

    /// Crop suggestion for a target scene and ratio.
    ///
    /// The answer must already lie inside the image; nothing is repaired.
    pub async fn analyze_for_scene(
        &self,
        image: &ImageInput,
        dims: Dimensions,
        scene_name: &str,
        ratio: &AspectRatio,
    ) -> Result<SceneSuggestion> {
        let request = VisionRequest::new(SCENE_SYSTEM_PROMPT, image.clone())
            .with_user_text(scene_prompt(scene_name, ratio.as_str(), dims.width, dims.height))
            .with_detail("high")
            .with_sampling(500, 0.7);

        let timeout = self.settings.scene_timeout;
        let response = tokio::time::timeout(timeout, self.client.complete(&request))
            .await
            .map_err(|_| AppError::Timeout(timeout.as_millis() as u64))??;

        let parsed = extract_json(&response.text)
            .ok_or_else(|| AppError::AiParse("no JSON object in model response".to_string()))?;
        parse_scene_suggestion(&parsed, dims)
    }

    /// Run a caller-supplied prompt against a caller-chosen model.
    ///
    /// `${originalWidth}` and `${originalHeight}` in the prompt are
    /// substituted. The parsed answer is returned as-is once its crop passes
    /// the strict bounds check.
    pub async fn analyze_with_prompt(
        &self,
        image: &ImageInput,
        dims: Dimensions,
        model: &str,
        prompt: &str,
    ) -> Result<Value> {
        let request = VisionRequest::new(render(prompt, dims.width, dims.height), image.clone())
            .with_model(model)
            .with_sampling(800, 0.3);
        let attempts = self.settings.attempts.max(1);
        let mut last_error = AppError::Internal("no analysis attempt was made".to_string());

        for attempt in 1..=attempts {
            log::info!("[{}] debug analysis attempt {}/{}", model, attempt, attempts);
            let result = match self.client.complete(&request).await {
                Ok(response) => parse_debug_answer(&response.text, dims),
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    log::warn!("[{}] attempt {} failed: {}", model, attempt, e);
                    let retry = should_retry(&e);
                    last_error = e;
                    if !retry {
                        break;
                    }
                    if attempt < attempts {
                        tokio::time::sleep(backoff_duration(
                            attempt - 1,
                            self.settings.retry_base_delay_ms,
                        ))
                        .await;
                    }
                }
            }
        }
        Err(last_error)
    }
}

fn should_retry(err: &AppError) -> bool {
    match err {
        AppError::Vision(v) => is_retryable(v),
        _ => true,
    }
}

fn parse_scene_suggestion(parsed: &Value, dims: Dimensions) -> Result<SceneSuggestion> {
    let text = |name: &str| -> Result<String> {
        parsed
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::AiParse(format!("model response lacks '{}'", name)))
    };
    let reason = text("reason")?;
    let details = text("details")?;
    let crop_params = parsed
        .get("crop_params")
        .ok_or_else(|| AppError::AiParse("model response lacks 'crop_params'".to_string()))?;

    let crop_box = strict_box_from_value(crop_params).map_err(AppError::AiParse)?;
    check_strict(&crop_box, dims.width, dims.height).map_err(AppError::AiParse)?;

    Ok(SceneSuggestion {
        reason,
        details,
        crop_box,
    })
}

fn parse_debug_answer(text: &str, dims: Dimensions) -> Result<Value> {
    let parsed = extract_json(text)
        .ok_or_else(|| AppError::AiParse("no valid JSON found in model response".to_string()))?;
    if parsed.get("analysis").is_none() {
        return Err(AppError::AiParse(
            "incomplete response: missing 'analysis'".to_string(),
        ));
    }
    let crop_params = parsed.get("crop_params").ok_or_else(|| {
        AppError::AiParse("incomplete response: missing 'crop_params'".to_string())
    })?;
    let crop_box = strict_box_from_value(crop_params).map_err(AppError::AiParse)?;
    check_strict(&crop_box, dims.width, dims.height).map_err(AppError::AiParse)?;
    Ok(parsed)
}

/// Pull a JSON object out of a model answer.
///
/// Tries a fenced code block first, then the span from the first `{` to
/// the last `}`, then the whole text.
pub fn extract_json(text: &str) -> Option<Value> {
    let parse_object = |s: &str| -> Option<Value> {
        serde_json::from_str::<Value>(s.trim())
            .ok()
            .filter(Value::is_object)
    };

    if let Some(block) = fenced_block(text) {
        if let Some(v) = parse_object(block) {
            return Some(v);
        }
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Some(v) = parse_object(&text[start..=end]) {
                return Some(v);
            }
        }
    }
    parse_object(text)
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")? + 3;
    let rest = &text[start..];
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let end = rest.find("```")?;
    Some(&rest[..end])
}
