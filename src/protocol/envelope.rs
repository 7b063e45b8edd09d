//! The message envelope: the single record every component on the wire
//! exchanges, and the canonical-JSON checksum that protects it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// `type` discriminator. Kept as a plain `String` on the wire (matching the
/// flat-record shape in the data model) but constrained to this closed set
/// by [`validate_envelope`].
pub const VALID_TYPES: &[&str] = &["command", "sync", "heartbeat", "discovery", "response"];

pub const VALID_ACTIONS: &[&str] = &[
    "create",
    "read",
    "write",
    "delete",
    "mkdir",
    "list",
    "sync_file",
    "sync_metadata",
    "request_sync",
    "request_file",
    "ping",
    "pong",
    "announce",
    "nodestats",
    "pstree",
    "history",
    "loadbal",
    "error",
];

/// Convenience re-export of the `type` values as an enum for callers that
/// want to `match` rather than string-compare; the wire shape stays a flat
/// string (see [`Envelope::type_`]) so this never appears in `serde` derives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeType {
    Command,
    Sync,
    Heartbeat,
    Discovery,
    Response,
}

impl EnvelopeType {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeType::Command => "command",
            EnvelopeType::Sync => "sync",
            EnvelopeType::Heartbeat => "heartbeat",
            EnvelopeType::Discovery => "discovery",
            EnvelopeType::Response => "response",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "command" => Some(EnvelopeType::Command),
            "sync" => Some(EnvelopeType::Sync),
            "heartbeat" => Some(EnvelopeType::Heartbeat),
            "discovery" => Some(EnvelopeType::Discovery),
            "response" => Some(EnvelopeType::Response),
            _ => None,
        }
    }
}

/// The flat wire record described in §3. `content` is deliberately a
/// `serde_json::Value` rather than a Rust enum: the set of legal shapes is
/// keyed by `(type, action)`, and validating/narrowing that happens at each
/// handler's boundary (§9 design note), not in the envelope itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub type_: String,
    pub action: String,
    #[serde(default)]
    pub path: String,
    #[serde(default = "Value::default")]
    pub content: Value,
    pub origin: String,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub checksum: String,
}

impl Envelope {
    pub fn new(
        type_: EnvelopeType,
        action: impl Into<String>,
        path: impl Into<String>,
        content: Value,
        origin: impl Into<String>,
    ) -> Self {
        let mut env = Envelope {
            type_: type_.as_str().to_string(),
            action: action.into(),
            path: path.into(),
            content,
            origin: origin.into(),
            timestamp: now_secs(),
            sequence: None,
            checksum: String::new(),
        };
        env.checksum = env.compute_checksum();
        env
    }

    pub fn response(action: impl Into<String>, success: bool, message: impl Into<String>, origin: impl Into<String>, data: Value) -> Self {
        let content = serde_json::json!({
            "success": success,
            "message": message.into(),
            "data": data,
        });
        Envelope::new(EnvelopeType::Response, action, "", content, origin)
    }

    /// Canonical JSON of every field except `checksum`, keys sorted,
    /// compact separators (§4.1 step 2). `serde_json::Map` is BTreeMap
    /// backed by default (no `preserve_order` feature), so `to_string`
    /// already emits keys in sorted order.
    fn canonical_without_checksum(&self) -> String {
        let value = serde_json::to_value(self).expect("Envelope serialization is infallible");
        let mut map: Map<String, Value> = match value {
            Value::Object(m) => m,
            _ => unreachable!("Envelope always serializes to a JSON object"),
        };
        map.remove("checksum");
        Value::Object(map).to_string()
    }

    /// SHA-256 over the canonical form, truncated to 16 hex characters
    /// (matching the original node's `hashlib.sha256(...).hexdigest()[:16]`).
    pub fn compute_checksum(&self) -> String {
        let canonical = self.canonical_without_checksum();
        let digest = Sha256::digest(canonical.as_bytes());
        digest.iter().take(8).fold(String::with_capacity(16), |mut acc, byte| {
            use std::fmt::Write;
            write!(acc, "{:02x}", byte).unwrap();
            acc
        })
    }

    /// Recompute and compare against the embedded `checksum`. An empty
    /// embedded checksum is tolerated (legacy messages); a non-empty
    /// mismatch is an integrity failure.
    pub fn verify_checksum(&self) -> Result<(), ValidationError> {
        if self.checksum.is_empty() {
            return Ok(());
        }
        let expected = self.compute_checksum();
        if expected != self.checksum {
            return Err(ValidationError::ChecksumMismatch);
        }
        Ok(())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Envelope serialization is infallible")
    }

    pub fn from_json(data: &str) -> Result<Self, ValidationError> {
        let env: Envelope =
            serde_json::from_str(data).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        env.verify_checksum()?;
        Ok(env)
    }
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message checksum validation failed")]
    ChecksumMismatch,
    #[error("missing required fields")]
    MissingFields,
    #[error("invalid message type: {0}")]
    InvalidType(String),
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("missing origin node")]
    MissingOrigin,
    #[error("invalid timestamp")]
    InvalidTimestamp,
}

/// Structural validation per §4.1: closed `type`/`action` sets, non-empty
/// `origin`, positive `timestamp`. Checksum verification is a separate step
/// ([`Envelope::verify_checksum`]) performed during deserialization.
pub fn validate_envelope(env: &Envelope) -> Result<(), ValidationError> {
    if env.type_.is_empty() || env.action.is_empty() || env.origin.is_empty() {
        return Err(ValidationError::MissingFields);
    }
    if !VALID_TYPES.contains(&env.type_.as_str()) {
        return Err(ValidationError::InvalidType(env.type_.clone()));
    }
    if !VALID_ACTIONS.contains(&env.action.as_str()) {
        return Err(ValidationError::InvalidAction(env.action.clone()));
    }
    if env.origin.is_empty() {
        return Err(ValidationError::MissingOrigin);
    }
    if env.timestamp <= 0.0 {
        return Err(ValidationError::InvalidTimestamp);
    }
    Ok(())
}

/// Encode binary data for transport inside `content` (§4.1, §6).
pub fn encode_binary(data: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(data)
}

/// Decode binary data previously produced by [`encode_binary`].
pub fn decode_binary(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.decode(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_checksum() {
        let env = Envelope::new(
            EnvelopeType::Command,
            "create",
            "a.txt",
            Value::Null,
            "A",
        );
        let json = env.to_json();
        let decoded = Envelope::from_json(&json).unwrap();
        assert_eq!(decoded.checksum, env.checksum);
        assert!(validate_envelope(&decoded).is_ok());
    }

    #[test]
    fn checksum_is_stable_under_key_reordering() {
        let env = Envelope::new(EnvelopeType::Command, "write", "b.txt", serde_json::json!("hi"), "A");
        let expected = env.checksum.clone();

        // Re-serialize via a generic Value (which alphabetizes keys anyway)
        // and rebuild from a hand-reordered JSON string.
        let reordered = format!(
            "{{\"origin\":\"{}\",\"type\":\"{}\",\"action\":\"{}\",\"path\":\"{}\",\"content\":{},\"timestamp\":{},\"checksum\":\"{}\"}}",
            env.origin, env.type_, env.action, env.path, env.content, env.timestamp, env.checksum
        );
        let decoded = Envelope::from_json(&reordered).unwrap();
        assert_eq!(decoded.checksum, expected);
    }

    #[test]
    fn mismatched_checksum_fails() {
        let mut env = Envelope::new(EnvelopeType::Command, "create", "a.txt", Value::Null, "A");
        env.checksum = "0000000000000000".to_string();
        let json = env.to_json();
        assert!(matches!(
            Envelope::from_json(&json),
            Err(ValidationError::ChecksumMismatch)
        ));
    }

    #[test]
    fn missing_checksum_is_tolerated() {
        let mut env = Envelope::new(EnvelopeType::Heartbeat, "ping", "", Value::Null, "A");
        env.checksum = String::new();
        assert!(env.verify_checksum().is_ok());
    }

    #[test]
    fn unknown_type_fails_validation() {
        let mut env = Envelope::new(EnvelopeType::Command, "create", "a.txt", Value::Null, "A");
        env.type_ = "bogus".to_string();
        assert!(matches!(
            validate_envelope(&env),
            Err(ValidationError::InvalidType(_))
        ));
    }
}
