#![doc(html_root_url = "https://docs.rs/aicrop/0.1.0")]
#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

//! # aicrop
//!
//! An HTTP service that asks a vision model where to crop an image, repairs
//! the suggestion so it always fits the picture, then cuts and re-encodes
//! the image in the upload's own format.
//!
//! ## Features
//!
//! - **Aesthetic crops**: title, description and crop rectangle from a vision
//!   model, with retries and a preset fallback when the model fails
//! - **Scene contract**: versioned crop solutions for social-media scenes
//!   and aspect ratios
//! - **Guard rails**: per-IP request limits, a free daily quota and a dedup
//!   cache that replays results for identical uploads
//! - **Web API**: axum router with single, batch and public crop routes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aicrop::{create_router, init, AppState, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init()?;
//!     let state = AppState::new(Config::from_env()?);
//!     let app = create_router(state);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3001").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "api")]
pub mod api;
pub mod core;
/// Defines the application's error types and result aliases.
pub mod error;
pub mod models;
pub mod security;
/// Configuration and shared state.
pub mod state;
mod utils;

#[cfg(feature = "api")]
#[allow(dead_code)]
mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

// Public API exports
pub use crate::{
    core::{
        analyzer::CropAnalyzer,
        crop::{AspectRatio, CropBox},
        vision::{OpenAiVisionClient, VisionClient},
    },
    error::{AppError, Result, ResultExt, VisionError},
    models::solution::{CropOutcome, CropResponse, CropSolution},
    state::{AppState, Config},
};

#[cfg(feature = "api")]
pub use crate::api::{create_router, health_check};

/// Initialize the application with default settings
///
/// Sets up logging from `RUST_LOG` (default `info`). Call it once, early in
/// startup.
///
/// # Errors
///
/// Returns an error if a logger was already installed.
///
/// # Example
///
/// ```no_run
/// use aicrop::init;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     init()?;
///     // Application code here
///     Ok(())
/// }
/// ```
pub fn init() -> Result<()> {
    let env = env_logger::Env::default()
        .default_filter_or("info")
        .default_write_style_or("auto");

    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .format_module_path(false)
        .try_init()
        .map_err(|e| AppError::Config(format!("logger already initialized: {}", e)))?;

    log::info!("Initializing aicrop {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
