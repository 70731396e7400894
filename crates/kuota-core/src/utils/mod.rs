//! Utility functions for formatting and phone number handling.

pub mod format;
pub mod phone;

// Re-export commonly used functions at module level
pub use format::{format_rupiah, mask_token, truncate_body, truncate_string};
pub use phone::{normalize_phone, phone_with_country_code};
