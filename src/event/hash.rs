use super::LogEvent;
use sha2::{Digest, Sha256};

const FIELD_SEPARATOR: &[u8] = b"\x1f";

/// Identity of an event for deduplication: SHA-256 over level, rendered
/// message and exception text, as uppercase hex.
///
/// Timestamp and properties are not part of the identity.
pub fn identity_hash(event: &LogEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.severity.as_str().as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(event.message.as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(event.exception.as_deref().unwrap_or("").as_bytes());
    hex::encode_upper(hasher.finalize())
}
