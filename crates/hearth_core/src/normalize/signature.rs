//! Deduplication signatures.
//!
//! The hash is the 31-multiplier rolling hash over UTF-16 code units with
//! 32-bit wraparound, rendered in base 36.

use chrono::{DateTime, Utc};

pub const SIGNATURE_PREFIX: &str = "sig-";

/// Builds the `sig-...` token for one event.
///
/// Only these four inputs participate; any other field can change without
/// changing the signature.
pub fn event_signature(
    title: &str,
    start_at: &DateTime<Utc>,
    discriminator: &str,
    category: &str,
) -> String {
    let minute = start_at.format("%Y-%m-%dT%H:%M");
    let base = format!("{title}-{minute}-{discriminator}-{category}").to_lowercase();
    format!("{SIGNATURE_PREFIX}{}", string_hash(&base))
}

/// Stable 32-bit string hash rendered in base 36.
pub fn string_hash(value: &str) -> String {
    let mut hash: i32 = 0;
    for unit in value.encode_utf16() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(i32::from(unit));
    }
    to_base36(i64::from(hash).unsigned_abs())
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
