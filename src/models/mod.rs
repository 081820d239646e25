//! Data structures exchanged with clients

/// Social-media scene specifications.
pub mod platform;
/// Crop results and the versioned scene contract.
pub mod solution;
/// Uploaded files.
pub mod upload;
