//! Batch identifier allocation.

use once_cell::sync::Lazy;
use regex_lite::Regex;

/// Identifier used when there is no usable previous batch.
pub const FIRST_BATCH_ID: &str = "Batch_001";

static BATCH_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Batch_(\d+)$").unwrap());

/// Format a batch number as `Batch_NNN` (zero padded to three digits).
pub fn format_batch_id(number: u64) -> String {
    format!("Batch_{:03}", number)
}

/// Parse the numeric part of a well-formed batch id.
pub fn parse_batch_number(batch_id: &str) -> Option<u64> {
    BATCH_ID_RE
        .captures(batch_id)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Next batch id after the most recently created one.
///
/// Falls back to `Batch_001` when there is no previous id or it is malformed.
pub fn next_batch_id(last: Option<&str>) -> String {
    match last.and_then(parse_batch_number) {
        Some(n) => format_batch_id(n.saturating_add(1)),
        None => FIRST_BATCH_ID.to_string(),
    }
}
