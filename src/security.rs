//! Request hygiene: upload validation, origin allow-list, masking of
//! secrets in logs, and the startup environment check.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::{
    error::{AppError, Result},
    models::upload::UploadedImage,
    state::Config,
};

/// Extensions accepted for uploads.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "avif", "heic", "heif", "bmp", "tiff", "tif",
];

// matched against the end of the key with case and separators ignored
const SENSITIVE_KEYS: &[&str] = &["apikey", "secret", "password", "token", "authorization"];

fn is_sensitive_key(key: &str) -> bool {
    let name: String = key
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    SENSITIVE_KEYS.iter().any(|s| name.ends_with(s))
}

/// Whether `origin` is in the allow-list.
pub fn is_valid_origin(origin: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|o| o == origin)
}

/// Reject uploads with a disallowed type, excessive size or a suspicious
/// name.
pub fn validate_upload(upload: &UploadedImage, max_size: usize, allowed_types: &[String]) -> Result<()> {
    if !allowed_types.iter().any(|t| t == &upload.content_type) {
        return Err(AppError::BadImage(format!(
            "Image type {} is not allowed. Allowed types: {}",
            upload.content_type,
            allowed_types.join(", ")
        )));
    }

    if upload.size() > max_size {
        return Err(AppError::PayloadTooLarge(format!(
            "Image size exceeds maximum allowed size of {}MB",
            max_size / 1024 / 1024
        )));
    }

    let name = &upload.file_name;
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(AppError::InvalidInput(
            "Invalid file name contains path traversal characters".to_string(),
        ));
    }

    // browsers send pasted images as "blob" or "image" with no extension
    if let Some(ext) = crate::core::format::file_extension(name) {
        if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Err(AppError::BadImage(format!("File extension .{} is not an image", ext)));
        }
    }

    Ok(())
}

/// Mask long alphanumeric runs (API keys and the like), keeping the first
/// and last four characters. Lowercase hex runs are content digests and
/// stay readable.
pub fn mask_str(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut run = String::new();

    let flush = |run: &mut String, out: &mut String| {
        let digest = run.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'));
        if run.chars().count() >= 20 && !digest {
            out.push_str(&mask_middle(run));
        } else {
            out.push_str(run);
        }
        run.clear();
    };

    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            run.push(c);
        } else {
            flush(&mut run, &mut out);
            out.push(c);
        }
    }
    flush(&mut run, &mut out);
    out
}

fn mask_middle(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 8 {
        return "***MASKED***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 8), tail)
}

/// Mask sensitive values in a JSON document.
///
/// Values under keys that look like credentials are masked entirely; other
/// strings have long tokens masked.
pub fn mask_sensitive(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(mask_str(s)),
        Value::Array(items) => Value::Array(items.iter().map(mask_sensitive).collect()),
        Value::Object(map) => {
            let masked: Map<String, Value> = map
                .iter()
                .map(|(k, v)| {
                    let sensitive = is_sensitive_key(k);
                    let v = match v {
                        Value::String(s) if sensitive => Value::String(mask_middle(s)),
                        _ if sensitive && !v.is_object() => Value::String("***MASKED***".to_string()),
                        other => mask_sensitive(other),
                    };
                    (k.clone(), v)
                })
                .collect();
            Value::Object(masked)
        }
        other => other.clone(),
    }
}

/// Severity of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Routine
    Info,
    /// Suspicious
    Warn,
    /// Failure
    Error,
}

/// Structured log of security and usage events, one JSON line each.
#[derive(Debug, Clone, Copy)]
pub struct SecurityLog {
    enabled: bool,
}

impl SecurityLog {
    /// Events are dropped when `enabled` is false.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Build the log line for an event.
    pub fn entry(event: &str, details: &Value, level: EventLevel) -> Value {
        json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "level": level,
            "details": mask_sensitive(details),
        })
    }

    /// Record an event.
    pub fn event(&self, event: &str, details: Value, level: EventLevel) {
        if !self.enabled {
            return;
        }
        let line = Self::entry(event, &details, level).to_string();
        match level {
            EventLevel::Info => log::info!(target: "security", "{}", line),
            EventLevel::Warn => log::warn!(target: "security", "{}", line),
            EventLevel::Error => log::error!(target: "security", "{}", line),
        }
    }
}

/// Problems found in the configuration at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentReport {
    /// Misconfigurations that break features
    pub errors: Vec<String>,
    /// Risky but working settings
    pub warnings: Vec<String>,
}

impl EnvironmentReport {
    /// No errors.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Write the findings to the log.
    pub fn log(&self) {
        for e in &self.errors {
            log::error!("environment: {}", e);
        }
        for w in &self.warnings {
            log::warn!("environment: {}", w);
        }
    }
}

/// Whether a key looks like a real credential.
pub fn is_plausible_api_key(key: &str) -> bool {
    key.len() >= 20 && !key.contains("test") && !key.contains("demo") && key != "your_openai_api_key_here"
}

/// Check the configuration for missing credentials and weak settings.
pub fn validate_environment(config: &Config) -> EnvironmentReport {
    let mut report = EnvironmentReport::default();

    if config.openai_api_key.trim().is_empty() || config.openai_api_key == "your_openai_api_key_here" {
        report
            .errors
            .push("OPENAI_API_KEY is not configured; every analysis will use fallback crops".to_string());
    } else if !is_plausible_api_key(&config.openai_api_key) {
        report
            .warnings
            .push("OPENAI_API_KEY does not look like a production key".to_string());
    }

    if config.rate_limit_max > 1000 {
        report
            .warnings
            .push("Rate limit is very high - consider lowering for better security".to_string());
    }
    if config.daily_usage_limit == 0 {
        report
            .warnings
            .push("DAILY_USAGE_LIMIT is 0; the public crop route will refuse every request".to_string());
    }
    if config.cors_origins.iter().any(|o| o == "*") {
        report
            .warnings
            .push("CORS_ORIGINS contains '*'; any site may call the API".to_string());
    }
    if config.allowed_image_types.is_empty() {
        report
            .errors
            .push("ALLOWED_IMAGE_TYPES is empty; no upload can pass validation".to_string());
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn upload(name: &str, mime: &str, len: usize) -> UploadedImage {
        UploadedImage::new(name, mime, Bytes::from(vec![0u8; len]))
    }

    fn types() -> Vec<String> {
        vec!["image/jpeg".to_string(), "image/png".to_string()]
    }

    #[test]
    fn test_validate_upload() {
        assert!(validate_upload(&upload("a.jpg", "image/jpeg", 10), 100, &types()).is_ok());
        assert!(validate_upload(&upload("blob", "image/png", 10), 100, &types()).is_ok());
        assert!(matches!(
            validate_upload(&upload("a.gif", "image/gif", 10), 100, &types()),
            Err(AppError::BadImage(_))
        ));
        assert!(matches!(
            validate_upload(&upload("a.jpg", "image/jpeg", 101), 100, &types()),
            Err(AppError::PayloadTooLarge(_))
        ));
        assert!(matches!(
            validate_upload(&upload("../a.jpg", "image/jpeg", 1), 100, &types()),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_upload(&upload("a.exe", "image/jpeg", 1), 100, &types()),
            Err(AppError::BadImage(_))
        ));
    }

    #[test]
    fn test_origin_allow_list() {
        let allowed = vec!["http://localhost:3000".to_string()];
        assert!(is_valid_origin("http://localhost:3000", &allowed));
        assert!(!is_valid_origin("https://evil.example", &allowed));
    }

    #[test]
    fn test_mask_str() {
        let masked = mask_str("key sk-abcdefghijklmnopqrstuvwxyz used");
        assert_eq!(masked, "key sk-abcd******************wxyz used");
        assert_eq!(mask_str("short words stay"), "short words stay");
    }

    #[test]
    fn test_mask_sensitive_keys() {
        let masked = mask_sensitive(&json!({
            "clientIp": "1.2.3.4",
            "apiKey": "sk-1234567890",
            "nested": {"password": "hunter2"},
            "tokenCount": 5,
            "accessToken": "abc"
        }));
        assert_eq!(masked["clientIp"], "1.2.3.4");
        assert_eq!(masked["apiKey"], "sk-1*****7890");
        assert_eq!(masked["nested"]["password"], "***MASKED***");
        assert_eq!(masked["tokenCount"], 5);
        assert_eq!(masked["accessToken"], "***MASKED***");
    }

    #[test]
    fn test_cache_keys_stay_readable() {
        let hash = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
        let key = format!("crop:{}:jpg:image/jpeg", hash);
        let masked = mask_sensitive(&json!({
            "imageHash": hash,
            "formatAwareCacheKey": key,
            "cacheKey": key,
        }));
        assert_eq!(masked["imageHash"], hash);
        assert_eq!(masked["formatAwareCacheKey"], key.as_str());
        assert_eq!(masked["cacheKey"], key.as_str());
    }

    #[test]
    fn test_entry_shape() {
        let entry = SecurityLog::entry("cache_hit", &json!({"ip": "1.2.3.4"}), EventLevel::Info);
        assert_eq!(entry["event"], "cache_hit");
        assert_eq!(entry["level"], "info");
        assert!(entry["timestamp"].is_string());
    }

    #[test]
    fn test_environment_report() {
        let config = Config::default();
        let report = validate_environment(&config);
        assert!(!report.is_valid());

        let config = Config {
            openai_api_key: "sk-live-0123456789abcdefghij".to_string(),
            ..Config::default()
        };
        assert!(validate_environment(&config).is_valid());
    }
}
