//! Prompt templates for the vision model.
//!
//! Templates live as text files in the prompts directory. The newest
//! localized version is preferred. Older, unlocalized versions are tried in
//! turn and a built-in template is the last resort.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::AppError;

/// Placeholder replaced with the source image width.
pub const WIDTH_PLACEHOLDER: &str = "${originalWidth}";
/// Placeholder replaced with the source image height.
pub const HEIGHT_PLACEHOLDER: &str = "${originalHeight}";

/// Versions tried after the localized `v1.1` template, newest first.
const LEGACY_VERSIONS: [&str; 4] = ["v0.5", "v0.4", "v0.3", "v0.2"];

const BUILTIN_TEMPLATE: &str = r#"You are a professional photo cropping expert. The origin is the top-left corner and all units are pixels.
Input: the original image is ${originalWidth}x${originalHeight}.
Goal: make the picture more beautiful and visually striking.

Reply with JSON only:
{
  "analysis": {
    "title": "short name for the crop",
    "effect": "the concrete visual effect of the crop"
  },
  "crop_params": {
    "x": <left edge>,
    "y": <top edge>,
    "width": <crop width>,
    "height": <crop height>
  }
}
All four crop_params must be integers, width and height at least 100, and the crop must stay inside the ${originalWidth}x${originalHeight} image."#;

/// Response language for model-written text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Chinese, the default
    #[default]
    Zh,
    /// English
    En,
    /// Spanish
    Es,
    /// Japanese
    Ja,
}

impl Language {
    /// Suffix of localized prompt files; Chinese prompts carry none.
    pub fn prompt_suffix(&self) -> &'static str {
        match self {
            Self::Zh => "",
            Self::En => "_English",
            Self::Es => "_Spanish",
            Self::Ja => "_Japanese",
        }
    }

    /// Two-letter code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Zh => "zh",
            Self::En => "en",
            Self::Es => "es",
            Self::Ja => "ja",
        }
    }

    /// Parse a client-supplied code; unknown codes fall back to Chinese.
    pub fn from_code(code: &str) -> Self {
        code.parse().unwrap_or_default()
    }
}

impl FromStr for Language {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "cn" => Ok(Self::Zh),
            "en" | "en-us" | "en-gb" => Ok(Self::En),
            "es" => Ok(Self::Es),
            "ja" | "jp" => Ok(Self::Ja),
            other => Err(AppError::InvalidInput(format!("unsupported language '{}'", other))),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Where a loaded template came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    /// A file in the prompts directory
    File(PathBuf),
    /// The compiled-in template
    Builtin,
}

/// A template ready to be rendered.
#[derive(Debug, Clone)]
pub struct LoadedPrompt {
    /// Template text with placeholders
    pub template: String,
    /// Version label, e.g. `v1.1` or `builtin`
    pub version: String,
    /// Origin of the template
    pub source: PromptSource,
}

impl LoadedPrompt {
    /// Substitute the image dimensions.
    pub fn render(&self, width: u32, height: u32) -> String {
        render(&self.template, width, height)
    }
}

/// Substitute `${originalWidth}` and `${originalHeight}` in any template.
pub fn render(template: &str, width: u32, height: u32) -> String {
    template
        .replace(WIDTH_PLACEHOLDER, &width.to_string())
        .replace(HEIGHT_PLACEHOLDER, &height.to_string())
}

/// Loads prompt templates from a directory.
#[derive(Debug, Clone)]
pub struct PromptLoader {
    dir: PathBuf,
}

impl PromptLoader {
    /// Templates are looked up in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The prompts directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names tried for `mode` and `language`, in order.
    pub fn candidates(mode: &str, language: Language) -> Vec<(String, String)> {
        let mut names = vec![(
            "v1.1".to_string(),
            format!("v1.1-{}{}.txt", mode, language.prompt_suffix()),
        )];
        names.extend(
            LEGACY_VERSIONS
                .iter()
                .map(|v| (v.to_string(), format!("{}-{}.txt", v, mode))),
        );
        names
    }

    /// Load the best available template for `mode` and `language`.
    ///
    /// Never fails: missing or unreadable files fall through to the
    /// built-in template.
    pub async fn load(&self, mode: &str, language: Language) -> LoadedPrompt {
        if !is_valid_mode(mode) {
            log::warn!("rejecting prompt mode {:?}, using built-in template", mode);
            return builtin();
        }

        for (version, name) in Self::candidates(mode, language) {
            let path = self.dir.join(&name);
            match tokio::fs::read_to_string(&path).await {
                Ok(template) if !template.trim().is_empty() => {
                    log::debug!("using prompt {} (language: {})", name, language);
                    return LoadedPrompt {
                        template,
                        version,
                        source: PromptSource::File(path),
                    };
                }
                Ok(_) => log::warn!("prompt file {} is empty, trying older version", name),
                Err(e) => log::debug!("prompt {} unavailable: {}", name, e),
            }
        }

        log::info!("no prompt file for mode '{}', using built-in template", mode);
        builtin()
    }
}

fn builtin() -> LoadedPrompt {
    LoadedPrompt {
        template: BUILTIN_TEMPLATE.to_string(),
        version: "builtin".to_string(),
        source: PromptSource::Builtin,
    }
}

/// Modes name prompt files, so they are restricted to `[a-z0-9-]`.
fn is_valid_mode(mode: &str) -> bool {
    !mode.is_empty()
        && mode
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Prompt for the scene/ratio analysis contract.
pub fn scene_prompt(scene_name: &str, ratio: &str, width: u32, height: u32) -> String {
    format!(
        "Analyze this {width}x{height} image and suggest the best crop for a {scene_name} \
         with aspect ratio {ratio}. Reply with JSON only:\n\
         {{\n  \"reason\": \"an emotional, user-facing reason for the crop\",\n  \
         \"details\": \"technical composition analysis\",\n  \
         \"crop_params\": {{\"x\": <left>, \"y\": <top>, \"width\": <width>, \"height\": <height>}}\n}}\n\
         Coordinates are integer pixels from the top-left corner. Width and height must be at \
         least 100 and the crop must stay inside the image."
    )
}
