//! Message envelopes exchanged with nodes and their fingerprints.

use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use waku_interop_utils::{from_base64, hex, now_nanos, to_base64};

/// Relative tolerance when comparing float timestamps.
const TIMESTAMP_REL_TOLERANCE: f64 = 1e-9;

/// Message timestamp in nanoseconds.
///
/// Nodes reject non-integer timestamps, but tests send them on purpose, so both
/// forms round-trip.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Int(i64),
    Float(f64),
}

impl Timestamp {
    pub fn now() -> Self {
        Timestamp::Int(now_nanos())
    }

    /// Integer nanoseconds (floats are truncated).
    pub fn as_i64(&self) -> i64 {
        match self {
            Timestamp::Int(value) => *value,
            Timestamp::Float(value) => *value as i64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Timestamp::Int(value) => *value as f64,
            Timestamp::Float(value) => *value,
        }
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Timestamp::Int(value)
    }
}

impl From<f64> for Timestamp {
    fn from(value: f64) -> Self {
        Timestamp::Float(value)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Int(value) => write!(f, "{value}"),
            Timestamp::Float(value) => write!(f, "{value}"),
        }
    }
}

/// A message as published to, or returned by, a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Base64 payload.
    #[serde(default)]
    pub payload: String,
    #[serde(alias = "content_topic")]
    pub content_topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<bool>,
    /// Base64 meta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    #[serde(
        default,
        alias = "rate_limit_proof",
        skip_serializing_if = "Option::is_none"
    )]
    pub rate_limit_proof: Option<Value>,
}

impl Message {
    /// A message carrying `payload` (base64-encoded here), stamped with the current time.
    pub fn new(payload: impl AsRef<[u8]>, content_topic: impl Into<String>) -> Self {
        Self {
            payload: to_base64(payload),
            content_topic: content_topic.into(),
            version: None,
            timestamp: Some(Timestamp::now()),
            ephemeral: None,
            meta: None,
            rate_limit_proof: None,
        }
    }

    /// Replace the payload with an already encoded (possibly invalid) string.
    pub fn with_raw_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<Timestamp>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn without_timestamp(mut self) -> Self {
        self.timestamp = None;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = Some(ephemeral);
        self
    }

    /// Set meta (base64-encoded here).
    pub fn with_meta(mut self, meta: impl AsRef<[u8]>) -> Self {
        self.meta = Some(to_base64(meta));
        self
    }

    pub fn with_rate_limit_proof(mut self, proof: Value) -> Self {
        self.rate_limit_proof = Some(proof);
        self
    }

    /// Decoded payload, if it is valid base64.
    pub fn payload_bytes(&self) -> Option<Vec<u8>> {
        from_base64(&self.payload)
    }

    /// Deterministic hash identifying this message on `pubsub_topic`.
    ///
    /// SHA-256 over the pubsub topic, the decoded payload, the content topic, the
    /// decoded meta (when present), and the timestamp as a big-endian `i64`.
    pub fn fingerprint(&self, pubsub_topic: &str) -> Result<Fingerprint, Error> {
        let payload = self
            .payload_bytes()
            .ok_or_else(|| Error::InvalidMessage(format!("payload is not base64: {}", self.payload)))?;
        let timestamp = self
            .timestamp
            .ok_or_else(|| Error::InvalidMessage("message has no timestamp".into()))?;

        let mut hasher = Sha256::new();
        hasher.update(pubsub_topic.as_bytes());
        hasher.update(&payload);
        hasher.update(self.content_topic.as_bytes());
        if let Some(meta) = &self.meta {
            let meta = from_base64(meta)
                .ok_or_else(|| Error::InvalidMessage(format!("meta is not base64: {meta}")))?;
            hasher.update(&meta);
        }
        hasher.update(timestamp.as_i64().to_be_bytes());
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Ok(Fingerprint(digest))
    }
}

/// How a node renders message hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashEncoding {
    /// `0x`-prefixed lowercase hex.
    Hex,
    /// Standard padded base64.
    Base64,
}

/// SHA-256 message hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn encode(&self, encoding: HashEncoding) -> String {
        match encoding {
            HashEncoding::Hex => format!("0x{}", hex(&self.0)),
            HashEncoding::Base64 => to_base64(self.0),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex(&self.0))
    }
}

fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= TIMESTAMP_REL_TOLERANCE * a.abs().max(b.abs())
}

fn show<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "None".to_string(), |value| value.to_string())
}

/// Compare a received message with the one that was published.
///
/// Payload and content topic must match exactly. Timestamp, version, meta and
/// ephemeral are only compared when the published message set them; float
/// timestamps match within a relative tolerance of 1e-9.
pub fn assert_received(sent: &Message, received: &Message) -> Result<(), Error> {
    let fail = |field: &str, published: String, got: String| {
        Err(Error::Assertion(format!(
            "Incorrect field: {field}. Published: {published} Received: {got}"
        )))
    };

    if received.payload != sent.payload {
        return fail("payload", sent.payload.clone(), received.payload.clone());
    }
    if received.content_topic != sent.content_topic {
        return fail(
            "contentTopic",
            sent.content_topic.clone(),
            received.content_topic.clone(),
        );
    }
    if let Some(timestamp) = sent.timestamp {
        let matches = match (timestamp, received.timestamp) {
            (Timestamp::Float(sent), Some(received)) => is_close(received.as_f64(), sent),
            (sent, Some(received)) => sent.to_string() == received.to_string(),
            (_, None) => false,
        };
        if !matches {
            return fail("timestamp", timestamp.to_string(), show(received.timestamp));
        }
    }
    if let Some(version) = sent.version {
        if received.version != Some(version) {
            return fail("version", version.to_string(), show(received.version));
        }
    }
    if let Some(meta) = &sent.meta {
        if received.meta.as_ref() != Some(meta) {
            return fail("meta", meta.clone(), show(received.meta.as_ref()));
        }
    }
    if let Some(ephemeral) = sent.ephemeral {
        if received.ephemeral != Some(ephemeral) {
            return fail("ephemeral", ephemeral.to_string(), show(received.ephemeral));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PUBSUB_TOPIC: &str = "/waku/2/default-waku/proto";
    const CONTENT_TOPIC: &str = "/test/1/waku-relay/proto";

    fn message() -> Message {
        Message::new("Relay works!!", CONTENT_TOPIC).with_timestamp(1_700_000_000_000_000_000i64)
    }

    #[test]
    fn test_serialization() {
        let message = message().with_meta("meta");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "payload": "UmVsYXkgd29ya3MhIQ==",
                "contentTopic": CONTENT_TOPIC,
                "timestamp": 1_700_000_000_000_000_000i64,
                "meta": "bWV0YQ==",
            })
        );
    }

    #[test]
    fn test_deserialization_accepts_both_casings() {
        let camel: Message = serde_json::from_value(json!({
            "payload": "YWJj",
            "contentTopic": CONTENT_TOPIC,
            "version": 0,
            "timestamp": 1,
            "ephemeral": false,
            "meta": null,
            "rateLimitProof": {"proof": "x"}
        }))
        .unwrap();
        assert_eq!(camel.content_topic, CONTENT_TOPIC);
        assert_eq!(camel.timestamp, Some(Timestamp::Int(1)));
        assert_eq!(camel.rate_limit_proof, Some(json!({"proof": "x"})));

        let snake: Message = serde_json::from_value(json!({
            "payload": "YWJj",
            "content_topic": CONTENT_TOPIC,
            "timestamp": 1.5e18,
            "rate_limit_proof": null
        }))
        .unwrap();
        assert_eq!(snake.content_topic, CONTENT_TOPIC);
        assert_eq!(snake.timestamp, Some(Timestamp::Float(1.5e18)));
        assert!(snake.rate_limit_proof.is_none());
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = message().fingerprint(PUBSUB_TOPIC).unwrap();
        let b = message().fingerprint(PUBSUB_TOPIC).unwrap();
        assert_eq!(a, b);
        assert!(a.encode(HashEncoding::Hex).starts_with("0x"));
        assert_eq!(a.encode(HashEncoding::Hex).len(), 66);
        assert_eq!(a.encode(HashEncoding::Base64).len(), 44);
        assert_eq!(a.to_string(), a.encode(HashEncoding::Hex));
    }

    #[test]
    fn test_fingerprint_matches_manual_digest() {
        let message = message().with_meta("m");
        let mut hasher = Sha256::new();
        hasher.update(PUBSUB_TOPIC.as_bytes());
        hasher.update(b"Relay works!!");
        hasher.update(CONTENT_TOPIC.as_bytes());
        hasher.update(b"m");
        hasher.update(1_700_000_000_000_000_000i64.to_be_bytes());
        let expected = hasher.finalize();
        assert_eq!(
            message.fingerprint(PUBSUB_TOPIC).unwrap().as_bytes().as_slice(),
            expected.as_slice()
        );
    }

    #[test]
    fn test_fingerprint_sensitivity() {
        let base = message().fingerprint(PUBSUB_TOPIC).unwrap();
        let variations = [
            message().with_raw_payload(to_base64("Relay works!?")),
            Message {
                content_topic: "/test/2/waku-relay/proto".into(),
                ..message()
            },
            message().with_meta("meta"),
            message().with_timestamp(1_700_000_000_000_000_001i64),
        ];
        for variation in variations {
            assert_ne!(variation.fingerprint(PUBSUB_TOPIC).unwrap(), base);
        }
        assert_ne!(message().fingerprint("/waku/2/rs/3/0").unwrap(), base);

        // Fields outside the hash do not change it
        let same = message().with_version(1).with_ephemeral(true);
        assert_eq!(same.fingerprint(PUBSUB_TOPIC).unwrap(), base);
    }

    #[test]
    fn test_fingerprint_requires_valid_fields() {
        assert!(matches!(
            message().without_timestamp().fingerprint(PUBSUB_TOPIC),
            Err(Error::InvalidMessage(_))
        ));
        assert!(matches!(
            message().with_raw_payload("Hello World!").fingerprint(PUBSUB_TOPIC),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_assert_received_exact_fields() {
        let sent = message().with_meta("meta").with_version(1);
        assert!(assert_received(&sent, &sent.clone()).is_ok());

        let mut received = sent.clone();
        received.payload = to_base64("other");
        let err = assert_received(&sent, &received).unwrap_err();
        assert!(err.to_string().starts_with("Incorrect field: payload."));

        let mut received = sent.clone();
        received.version = None;
        let err = assert_received(&sent, &received).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Incorrect field: version. Published: 1 Received: None"
        );

        let mut received = sent.clone();
        received.meta = Some(to_base64("other"));
        assert!(assert_received(&sent, &received).unwrap_err().mentions("meta"));
    }

    #[test]
    fn test_assert_received_optional_fields() {
        // Fields the publisher left unset are not compared
        let sent = message().without_timestamp();
        let received = message().with_version(3).with_ephemeral(true);
        assert!(assert_received(&sent, &received).is_ok());

        // A set timestamp must come back
        let sent = message();
        let received = message().without_timestamp();
        assert!(assert_received(&sent, &received).is_err());
    }

    #[test]
    fn test_assert_received_float_timestamp() {
        let sent = message().with_timestamp(1.7e18);
        let close = message().with_timestamp(1_700_000_000_100_000_000i64);
        let far = message().with_timestamp(1_700_000_100_000_000_000i64);
        assert!(assert_received(&sent, &close).is_ok());
        assert!(assert_received(&sent, &far)
            .unwrap_err()
            .mentions("Incorrect field: timestamp"));
    }
}
