//! Utility functions for string formatting and manipulation.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{body_text, truncate_body, truncate_body_to, MAX_LOGGED_BODY_LENGTH};
