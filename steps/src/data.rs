//! Shared inputs for scenarios.
//!
//! Most tables exist twice over in the scenario suites (valid and invalid
//! forms), so they live here rather than next to a single fixture.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde_json::{json, Value};
use waku_interop_node::Variant;

/// A named input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    pub description: &'static str,
    pub value: &'static str,
}

const fn sample(description: &'static str, value: &'static str) -> Sample {
    Sample { description, value }
}

/// Payloads every node must relay unchanged (base64-encoded before sending).
pub const SAMPLE_INPUTS: &[Sample] = &[
    sample("A simple string", "Hello World!"),
    sample("An integer", "1234567890"),
    sample("A dictionary", r#"{"key": "value"}"#),
    sample("Chinese characters", "这是一些中文"),
    sample("Emojis", "🚀🌟✨"),
    sample("Lorem ipsum text", "Lorem ipsum dolor sit amet"),
    sample("HTML content", "<html><body>Hello</body></html>"),
    sample("Cyrillic characters", "\u{041f}\u{0440}\u{0438}\u{0432}\u{0435}\u{0442}"),
    sample("Base64 encoded string", "Base64==dGVzdA=="),
    sample("Binary data", "d29ya2luZyB3aXRoIGJpbmFyeSBkYXRh: \x50\x51"),
    sample("Special characters with whitespace", "\t\nSpecial\tCharacters\n"),
    sample("Boolean false as a string", "False"),
    sample("A float number", "3.1415926535"),
    sample("A list", "[1, 2, 3, 4, 5]"),
    sample("Hexadecimal number as a string", "0xDEADBEEF"),
    sample("Email format", "user@example.com"),
    sample("URL format", "http://example.com"),
    sample("Date and time in ISO format", "2023-11-01T12:00:00Z"),
    sample("String with escaped quotes", r#""Escaped" \"quotes\""#),
    sample("A regular expression", "Regular expression: ^[a-z0-9_-]{3,16}$"),
    sample("A very long string", LONG_STRING),
    sample("A JSON string", r#"{"name": "John", "age": 30, "city": "New York"}"#),
    sample("A Unix path", "/usr/local/bin"),
    sample("A Windows path", r"C:\Windows\System32"),
    sample("An SQL query", "SELECT * FROM users WHERE id = 1;"),
    sample(
        "JavaScript code snippet",
        "function test() { console.log('Hello World'); }",
    ),
    sample("A CSS snippet", "body { background-color: #fff; }"),
    sample("A Python one-liner", "print('Hello World')"),
    sample("An IP address", "192.168.1.1"),
    sample("A domain name", "www.example.com"),
    sample("A user agent string", "Mozilla/5.0 (Windows NT 10.0; Win64; x64)"),
    sample("A credit card number", "1234-5678-9012-3456"),
    sample("A phone number", "+1234567890"),
    sample("A UUID", "123e4567-e89b-12d3-a456-426614174000"),
    sample("A hashtag", "#helloWorld"),
    sample("A Twitter handle", "@username"),
    sample("A password", "P@ssw0rd!"),
    sample("A date in common format", "01/11/2023"),
    sample("A time string", "12:00:00"),
    sample("A mathematical equation", "E = mc^2"),
];

const LONG_STRING: &str = concat!(
    "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
    "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
    "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
    "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
    "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
    "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
    "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
    "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
    "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
    "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx",
);

/// Payload fields nodes must reject. Values are raw JSON, not base64.
pub fn invalid_payloads() -> Vec<(&'static str, Value)> {
    vec![
        ("Empty string", json!("")),
        ("Unecoded text", json!("Hello World!")),
        ("A dictionary", json!({"key": "YWFh"})),
        ("An integer", json!(1234567890)),
        ("A list", json!(["YWFh"])),
        ("A bool", json!(true)),
    ]
}

/// Content topic fields nodes must reject.
pub fn invalid_content_topics() -> Vec<(&'static str, Value)> {
    vec![
        ("Empty string", json!("")),
        ("A dictionary", json!({"key": "YWFh"})),
        ("An integer", json!(1234567890)),
        ("A list", json!(["YWFh"])),
        ("A bool", json!(true)),
    ]
}

/// Pubsub topic fields of the wrong JSON type.
pub fn pubsub_topics_wrong_format() -> Vec<(&'static str, Value)> {
    vec![
        ("A dictionary", json!({"key": "YWFh"})),
        ("An integer", json!(1234567890)),
        ("A list", json!(["YWFh"])),
        ("A bool", json!(true)),
    ]
}

/// One content topic per shard 0 to 7 under auto-sharding with 8 shards.
pub const CONTENT_TOPICS_DIFFERENT_SHARDS: [&str; 8] = [
    "/myapp/1/latest/proto",
    "/waku/2/content/test.js",
    "/app/22/sometopic/someencoding",
    "/toychat/2/huilong/proto",
    "/statusim/1/community/cbor",
    "/app/27/sometopic/someencoding",
    "/app/29/sometopic/someencoding",
    "/app/20/sometopic/someencoding",
];

/// Content topics that all resolve to shard 0.
pub const CONTENT_TOPICS_SHARD_0: [&str; 8] = [
    "/newsService/1.0/weekly/protobuf",
    "/newsService/1.0/alerts/xml",
    "/newsService/1.0/updates/json",
    "/newsService/2.0/alerts/json",
    "/newsService/2.0/summaries/xml",
    "/newsService/2.0/highlights/yaml",
    "/newsService/3.0/weekly/json",
    "/newsService/3.0/summaries/xml",
];

/// Content topics that all resolve to shard 7.
pub const CONTENT_TOPICS_SHARD_7: [&str; 8] = [
    "/newsService/2.0/alerts/yaml",
    "/newsService/2.0/highlights/xml",
    "/newsService/3.0/daily/protobuf",
    "/newsService/3.0/alerts/xml",
    "/newsService/3.0/updates/protobuf",
    "/newsService/3.0/reviews/xml",
    "/newsService/4.0/alerts/yaml",
    "/newsService/4.0/updates/yaml",
];

pub const DEFAULT_CLUSTER_ID: &str = "3";

pub const VALID_PUBSUB_TOPICS: [&str; 5] = [
    "/waku/2/rs/3/0",
    "/waku/2/rs/3/1",
    "/waku/2/rs/3/9",
    "/waku/2/rs/3/25",
    "/waku/2/rs/3/1000",
];

pub const PUBSUB_TOPICS_STORE: [&str; 9] = [
    "/waku/2/rs/3/0",
    "/waku/2/rs/3/1",
    "/waku/2/rs/3/2",
    "/waku/2/rs/3/3",
    "/waku/2/rs/3/4",
    "/waku/2/rs/3/5",
    "/waku/2/rs/3/6",
    "/waku/2/rs/3/7",
    "/waku/2/rs/3/8",
];

pub const INVALID_PUBSUB_TOPICS: [&str; 5] = [
    "/test/2/rs/0/1",
    "/waku/3/rs/0/1",
    "/waku/2/test/0/1",
    "/waku/2/rs/3/b",
    "/waku/2/rs/0",
];

pub const PUBSUB_TOPICS_DIFFERENT_CLUSTERS: [&str; 7] = [
    "/waku/2/rs/2/0",
    "/waku/2/rs/2/1",
    "/waku/2/rs/5/0",
    "/waku/2/rs/5/1",
    "/waku/2/rs/5/999",
    "/waku/2/rs/8/0",
    "/waku/2/rs/999/999",
];

pub const PUBSUB_TOPICS_SAME_CLUSTER: [&str; 8] = [
    "/waku/2/rs/2/0",
    "/waku/2/rs/2/1",
    "/waku/2/rs/2/2",
    "/waku/2/rs/2/3",
    "/waku/2/rs/2/4",
    "/waku/2/rs/2/5",
    "/waku/2/rs/2/6",
    "/waku/2/rs/2/7",
];

pub const PUBSUB_TOPICS_RLN: [&str; 1] = ["/waku/2/rs/1/0"];

/// A timestamp field and the variants that accept it.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleTimestamp {
    pub description: &'static str,
    /// Raw JSON for the `timestamp` field. `Null` means the field is omitted.
    pub value: Value,
    pub valid_for: &'static [Variant],
}

impl SampleTimestamp {
    pub fn is_valid_for(&self, variant: Variant) -> bool {
        self.valid_for.contains(&variant)
    }
}

const BOTH: &[Variant] = &[Variant::Nwaku, Variant::GoWaku];

/// Timestamps relative to the current time, with the variants accepting each.
pub fn sample_timestamps() -> Vec<SampleTimestamp> {
    let now = Utc::now();
    let nanos = |at: chrono::DateTime<Utc>| at.timestamp_nanos_opt().unwrap_or_default();
    let now_ns = nanos(now);
    let dst = NaiveDate::from_ymd_opt(2020, 3, 8)
        .and_then(|date| date.and_hms_opt(2, 0, 0))
        .map(|at| nanos(at.and_utc()))
        .unwrap_or_default();
    let entry = |description, value, valid_for| SampleTimestamp {
        description,
        value,
        valid_for,
    };
    vec![
        entry("Now", json!(now_ns), BOTH),
        entry(
            "Far future",
            json!(nanos(now + ChronoDuration::days(365 * 10))),
            BOTH,
        ),
        entry("Recent past", json!(nanos(now - ChronoDuration::hours(1))), BOTH),
        entry("Near future", json!(nanos(now + ChronoDuration::hours(1))), BOTH),
        entry("Positive number", json!(1), BOTH),
        entry("Negative number", json!(-1), BOTH),
        entry("DST change", json!(dst), BOTH),
        entry("Timestamp as string number", json!(now_ns.to_string()), &[]),
        entry("Invalid large number", json!(1u64 << 63), &[]),
        entry("Float number", json!(now_ns as f64), &[]),
        entry("Array instead of timestamp", json!([now_ns]), &[]),
        entry("Object instead of timestamp", json!({"time": now_ns}), &[]),
        entry("ISO 8601 timestamp", json!("2023-12-26T10:58:51"), &[]),
        entry("Missing", Value::Null, &[Variant::GoWaku]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_inputs() {
        assert_eq!(SAMPLE_INPUTS.len(), 40);
        let long = SAMPLE_INPUTS
            .iter()
            .find(|sample| sample.description == "A very long string")
            .unwrap();
        assert_eq!(long.value.len(), 1000);
        assert!(long.value.chars().all(|c| c == 'x'));
    }

    #[test]
    fn test_topic_tables() {
        for topic in VALID_PUBSUB_TOPICS.iter().chain(PUBSUB_TOPICS_STORE.iter()) {
            assert_eq!(topic.split('/').nth(4), Some(DEFAULT_CLUSTER_ID));
        }
        for topic in PUBSUB_TOPICS_SAME_CLUSTER {
            assert_eq!(topic.split('/').nth(4), Some("2"));
        }
        assert_eq!(invalid_payloads().len(), 6);
        assert_eq!(invalid_content_topics().len(), 5);
        assert_eq!(pubsub_topics_wrong_format().len(), 4);
    }

    #[test]
    fn test_sample_timestamps() {
        let samples = sample_timestamps();
        assert_eq!(samples.len(), 14);

        let valid: Vec<_> = samples
            .iter()
            .filter(|sample| sample.is_valid_for(Variant::Nwaku))
            .collect();
        assert_eq!(valid.len(), 7);
        assert!(valid.iter().all(|sample| sample.value.is_i64()));

        let missing = samples.last().unwrap();
        assert!(missing.value.is_null());
        assert!(missing.is_valid_for(Variant::GoWaku));
        assert!(!missing.is_valid_for(Variant::Nwaku));
    }
}
