//! Core crop functionality: image handling, model analysis and the
//! in-memory limiters and caches that guard it

/// Vision model analysis flows.
pub mod analyzer;
/// TTL result cache for deduplicating uploads.
pub mod cache;
/// Crop rectangles, repair and aspect-ratio math.
pub mod crop;
/// Per-IP daily quota.
pub mod daily_usage;
/// Output format selection.
pub mod format;
/// Provides functions for computing cryptographic hashes and cache keys.
pub mod hash;
/// Decoding, cropping and encoding.
pub mod imaging;
/// Upload-to-output orchestration.
pub mod pipeline;
/// Prompt template loading.
pub mod prompt;
/// Fixed-window request limiter.
pub mod rate_limit;
/// Retry policy for model calls.
pub mod retry;
/// Output directory.
pub mod storage;
/// Vision model client.
pub mod vision;
