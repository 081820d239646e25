//! Route handlers, grouped by concern

pub(crate) mod analyze;
pub(crate) mod crop;
pub(crate) mod files;
pub(crate) mod usage;
