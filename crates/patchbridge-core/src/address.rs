//! Anchor address parsing.
//!
//! Resolved anchors arrive as hex strings with or without a `0x` prefix.

use patchbridge_common::{Error, Result};

/// Parse a hex address string. Accepts `0x1A2B`, `0X1a2b`, and `1A2B`.
pub fn parse_address(raw: &str) -> Result<usize> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidAddress(raw.to_string()));
    }

    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() {
        return Err(Error::InvalidAddress(raw.to_string()));
    }

    usize::from_str_radix(digits, 16).map_err(|_| Error::InvalidAddress(raw.to_string()))
}
