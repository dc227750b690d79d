//! Shared utility functions.
//!
//! - `fetch`: rate-limited HTTP asset fetcher
//! - `fs`: filesystem path sanitization and directory helpers
//! - `hash`: SHA-256 helpers
//! - `html_hash`: structural hashing of HTML pages
//! - `url`: URL resolution and filename extraction

pub mod fetch;
pub mod fs;
pub mod hash;
pub mod html_hash;
pub mod url;
