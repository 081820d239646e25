use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    core::{
        analyzer::{AnalyzerSettings, CropAnalyzer},
        cache::ResultCache,
        daily_usage::DailyUsageLimiter,
        pipeline::CropPipeline,
        prompt::PromptLoader,
        rate_limit::RateLimiter,
        storage::OutputStore,
        vision::{OpenAiVisionClient, VisionClient},
    },
    error::{AppError, Result},
    models::solution::{CropResponse, CropSolution},
    security::{validate_environment, EnvironmentReport, SecurityLog},
};

const DEFAULT_ALLOWED_TYPES: &str =
    "image/jpeg,image/png,image/gif,image/webp,image/avif,image/heic,image/heif,image/bmp,image/tiff";

/// Configuration for the application, read from the environment
#[derive(Clone, Debug)]
pub struct Config {
    /// Interface to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// Vision API key; empty disables the model and forces fallbacks
    pub openai_api_key: String,
    /// Vision API root URL
    pub openai_base_url: String,
    /// Vision model identifier
    pub openai_model: String,
    /// Deadline of a single vision API call
    pub openai_timeout: Duration,
    /// Deadline of the scene analysis
    pub analyze_timeout: Duration,
    /// Deadline of the whole public crop request
    pub crop_timeout: Duration,
    /// Largest accepted upload in bytes
    pub max_image_size: usize,
    /// Accepted upload MIME types
    pub allowed_image_types: Vec<String>,
    /// Lifetime of dedup cache entries
    pub cache_ttl: Duration,
    /// Replay results for identical uploads
    pub enable_dedup_cache: bool,
    /// Rate limit window
    pub rate_limit_window: Duration,
    /// Requests per window and key
    pub rate_limit_max: u32,
    /// Free crops per IP and day
    pub daily_usage_limit: u32,
    /// Remaining count at which clients are warned
    pub daily_warning_threshold: u32,
    /// UTC hour at which daily counters reset
    pub daily_reset_hour: u32,
    /// Origins allowed to call the API
    pub cors_origins: Vec<String>,
    /// Emit JSON security/usage events
    pub enable_logging: bool,
    /// Files of a batch processed at once
    pub max_concurrent_requests: usize,
    /// Where cropped outputs are written
    pub output_dir: PathBuf,
    /// Where prompt templates are read from
    pub prompts_dir: PathBuf,
    /// Base delay between model retries
    pub retry_base_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            openai_api_key: String::new(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4.1-2025-04-14".to_string(),
            openai_timeout: Duration::from_millis(60_000),
            analyze_timeout: Duration::from_millis(15_000),
            crop_timeout: Duration::from_millis(60_000),
            max_image_size: 50 * 1024 * 1024, // 50MB
            allowed_image_types: split_list(DEFAULT_ALLOWED_TYPES),
            cache_ttl: Duration::from_secs(3600),
            enable_dedup_cache: true,
            rate_limit_window: Duration::from_millis(900_000), // 15 minutes
            rate_limit_max: 100,
            daily_usage_limit: 30,
            daily_warning_threshold: 3,
            daily_reset_hour: 0,
            cors_origins: vec!["http://localhost:3000".to_string()],
            enable_logging: true,
            max_concurrent_requests: 10,
            output_dir: PathBuf::from("output"),
            prompts_dir: PathBuf::from("prompts"),
            retry_base_delay_ms: 500,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(AppError::Config(format!("{} must be a boolean, got '{}'", name, other))),
    }
}

impl Config {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`; unset variables keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let num = |name: &str| -> Result<Option<u64>> {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .map(|v| parse_num::<u64>(name, &v))
                .transpose()
        };
        let text = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = text("HOST") {
            config.host = v;
        }
        if let Some(v) = text("PORT") {
            config.port = parse_num("PORT", &v)?;
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            config.openai_api_key = v.trim().to_string();
        }
        if let Some(v) = text("OPENAI_BASE_URL") {
            config.openai_base_url = v;
        }
        if let Some(v) = text("OPENAI_MODEL") {
            config.openai_model = v;
        }
        if let Some(ms) = num("OPENAI_TIMEOUT")? {
            config.openai_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = num("ANALYZE_TIMEOUT")? {
            config.analyze_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = num("CROP_SERVICE_TIMEOUT")? {
            config.crop_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = text("MAX_IMAGE_SIZE") {
            config.max_image_size = parse_num("MAX_IMAGE_SIZE", &v)?;
        }
        if let Some(v) = text("ALLOWED_IMAGE_TYPES") {
            config.allowed_image_types = split_list(&v);
        }
        if let Some(secs) = num("CACHE_TTL")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("ENABLE_DEDUP_CACHE") {
            config.enable_dedup_cache = parse_bool("ENABLE_DEDUP_CACHE", &v)?;
        }
        if let Some(ms) = num("RATE_LIMIT_WINDOW")? {
            config.rate_limit_window = Duration::from_millis(ms);
        }
        if let Some(v) = text("RATE_LIMIT_MAX") {
            config.rate_limit_max = parse_num("RATE_LIMIT_MAX", &v)?;
        }
        if let Some(v) = text("DAILY_USAGE_LIMIT") {
            config.daily_usage_limit = parse_num("DAILY_USAGE_LIMIT", &v)?;
        }
        if let Some(v) = text("DAILY_WARNING_THRESHOLD") {
            config.daily_warning_threshold = parse_num("DAILY_WARNING_THRESHOLD", &v)?;
        }
        if let Some(v) = text("DAILY_RESET_HOUR") {
            let hour: u32 = parse_num("DAILY_RESET_HOUR", &v)?;
            if hour > 23 {
                return Err(AppError::Config(format!(
                    "DAILY_RESET_HOUR must be between 0 and 23, got {}",
                    hour
                )));
            }
            config.daily_reset_hour = hour;
        }
        if let Some(v) = text("CORS_ORIGINS") {
            config.cors_origins = split_list(&v);
        }
        if let Some(v) = lookup("ENABLE_LOGGING") {
            config.enable_logging = parse_bool("ENABLE_LOGGING", &v)?;
        }
        if let Some(v) = text("MAX_CONCURRENT_REQUESTS") {
            let n: usize = parse_num("MAX_CONCURRENT_REQUESTS", &v)?;
            config.max_concurrent_requests = n.max(1);
        }
        if let Some(v) = text("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(v);
        }
        if let Some(v) = text("PROMPTS_DIR") {
            config.prompts_dir = PathBuf::from(v);
        }
        if let Some(ms) = num("RETRY_BASE_DELAY_MS")? {
            config.retry_base_delay_ms = ms;
        }

        Ok(config)
    }

    /// Check for missing credentials and risky settings.
    pub fn validate(&self) -> EnvironmentReport {
        validate_environment(self)
    }

    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Human-readable rate limit, e.g. `100 requests per 15 minutes`.
    pub fn rate_limit_description(&self) -> String {
        format!(
            "{} requests per {} minutes",
            self.rate_limit_max,
            self.rate_limit_window.as_secs() / 60
        )
    }
}

fn parse_num<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{} must be a non-negative integer, got '{}'", name, raw)))
}

/// Application state that can be shared across handlers
#[derive(Debug)]
pub struct AppState {
    /// Application configuration
    pub config: Config,
    /// Request limiter for every rate-limited key
    pub rate_limiter: RateLimiter,
    /// Free-tier daily quota
    pub daily_usage: DailyUsageLimiter,
    /// Dedup cache of the public crop route
    pub crop_cache: ResultCache<CropResponse>,
    /// Dedup cache of the scene analysis
    pub solution_cache: ResultCache<CropSolution>,
    /// Analysis, crop and save
    pub pipeline: CropPipeline,
    /// Structured security events
    pub security: SecurityLog,
    /// Process start, for uptime
    pub started_at: Instant,
}

impl AppState {
    /// Create the state with an OpenAI-compatible vision client built from
    /// `config`.
    pub fn new(config: Config) -> Arc<Self> {
        let client = OpenAiVisionClient::new(
            &config.openai_api_key,
            &config.openai_base_url,
            &config.openai_model,
            config.openai_timeout,
        );
        Self::with_vision_client(config, Arc::new(client))
    }

    /// Create the state around any vision client.
    pub fn with_vision_client(config: Config, client: Arc<dyn VisionClient>) -> Arc<Self> {
        let analyzer = CropAnalyzer::new(
            client,
            PromptLoader::new(&config.prompts_dir),
            AnalyzerSettings {
                attempts: 2,
                retry_base_delay_ms: config.retry_base_delay_ms,
                scene_timeout: config.analyze_timeout,
            },
        );
        let pipeline = CropPipeline::new(Arc::new(analyzer), OutputStore::new(&config.output_dir));

        Arc::new(Self {
            rate_limiter: RateLimiter::new(config.rate_limit_max, config.rate_limit_window),
            daily_usage: DailyUsageLimiter::new(
                config.daily_usage_limit,
                config.daily_warning_threshold,
                config.daily_reset_hour,
            ),
            crop_cache: ResultCache::new(config.cache_ttl),
            solution_cache: ResultCache::new(config.cache_ttl),
            pipeline,
            security: SecurityLog::new(config.enable_logging),
            started_at: Instant::now(),
            config,
        })
    }

    /// Seconds since the state was created.
    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.rate_limit_max, 100);
        assert_eq!(config.rate_limit_window, Duration::from_secs(900));
        assert_eq!(config.daily_usage_limit, 30);
        assert_eq!(config.allowed_image_types.len(), 9);
        assert_eq!(config.rate_limit_description(), "100 requests per 15 minutes");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("CORS_ORIGINS", "https://a.example, https://b.example"),
            ("ENABLE_DEDUP_CACHE", "false"),
            ("DAILY_RESET_HOUR", "8"),
            ("OPENAI_TIMEOUT", "1000"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.cors_origins, vec!["https://a.example", "https://b.example"]);
        assert!(!config.enable_dedup_cache);
        assert_eq!(config.daily_reset_hour, 8);
        assert_eq!(config.openai_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("PORT", "http")])),
            Err(AppError::Config(_))
        ));
        assert!(Config::from_lookup(lookup(&[("DAILY_RESET_HOUR", "24")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ENABLE_LOGGING", "maybe")])).is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("RATE_LIMIT_MAX", "7");
        let config = Config::from_env().unwrap();
        std::env::remove_var("RATE_LIMIT_MAX");
        assert_eq!(config.rate_limit_max, 7);
    }

    #[test]
    fn test_state_wiring() {
        let config = Config {
            rate_limit_max: 2,
            ..Config::default()
        };
        let state = AppState::new(config);
        assert_eq!(state.rate_limiter.limit(), 2);
        assert_eq!(state.pipeline.analyzer().model(), "gpt-4.1-2025-04-14");
        assert!(state.crop_cache.is_empty());
    }
}
