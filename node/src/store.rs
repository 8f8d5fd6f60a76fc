//! Store queries and responses.

use crate::message::Message;
use serde::Deserialize;

/// Store REST API version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreVersion {
    V1,
    #[default]
    V3,
}

impl StoreVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreVersion::V1 => "v1",
            StoreVersion::V3 => "v3",
        }
    }
}

/// Parameters of `GET store/<version>/messages`.
///
/// Unset parameters are omitted from the query string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreQuery {
    pub peer_addr: Option<String>,
    pub include_data: Option<bool>,
    pub pubsub_topic: Option<String>,
    pub content_topics: Vec<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub hashes: Vec<String>,
    pub cursor: Option<String>,
    pub page_size: Option<u64>,
    pub ascending: Option<bool>,
    pub version: StoreVersion,
    /// Additional raw parameters, appended verbatim.
    pub extra: Vec<(String, String)>,
}

impl StoreQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer_addr(mut self, peer_addr: impl Into<String>) -> Self {
        self.peer_addr = Some(peer_addr.into());
        self
    }

    pub fn include_data(mut self, include_data: bool) -> Self {
        self.include_data = Some(include_data);
        self
    }

    pub fn pubsub_topic(mut self, pubsub_topic: impl Into<String>) -> Self {
        self.pubsub_topic = Some(pubsub_topic.into());
        self
    }

    pub fn content_topic(mut self, content_topic: impl Into<String>) -> Self {
        self.content_topics.push(content_topic.into());
        self
    }

    pub fn content_topics<I, S>(mut self, content_topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content_topics = content_topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn start_time(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn end_time(mut self, end_time: i64) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn hashes<I, S>(mut self, hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hashes = hashes.into_iter().map(Into::into).collect();
        self
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn ascending(mut self, ascending: bool) -> Self {
        self.ascending = Some(ascending);
        self
    }

    pub fn version(mut self, version: StoreVersion) -> Self {
        self.version = version;
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    /// Query string parameters in a fixed order.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let mut push = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                pairs.push((key.to_string(), value));
            }
        };
        push("peerAddr", self.peer_addr.clone());
        push("includeData", self.include_data.map(|v| v.to_string()));
        push("pubsubTopic", self.pubsub_topic.clone());
        push(
            "contentTopics",
            (!self.content_topics.is_empty()).then(|| self.content_topics.join(",")),
        );
        push("startTime", self.start_time.map(|v| v.to_string()));
        push("endTime", self.end_time.map(|v| v.to_string()));
        push(
            "hashes",
            (!self.hashes.is_empty()).then(|| self.hashes.join(",")),
        );
        push("cursor", self.cursor.clone());
        push("pageSize", self.page_size.map(|v| v.to_string()));
        push("ascending", self.ascending.map(|v| v.to_string()));
        pairs.extend(self.extra.iter().cloned());
        pairs
    }
}

/// One entry of a v3 response.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    #[serde(default, alias = "message_hash")]
    pub message_hash: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default, alias = "pubsub_topic")]
    pub pubsub_topic: Option<String>,
}

/// A response entry: v1 returns bare messages, v3 hash-keyed entries.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StoreEntry {
    Bare(Message),
    Keyed(StoredMessage),
}

impl StoreEntry {
    pub fn message(&self) -> Option<&Message> {
        match self {
            StoreEntry::Bare(message) => Some(message),
            StoreEntry::Keyed(entry) => entry.message.as_ref(),
        }
    }

    pub fn hash(&self) -> Option<&str> {
        match self {
            StoreEntry::Bare(_) => None,
            StoreEntry::Keyed(entry) => entry.message_hash.as_deref(),
        }
    }

    pub fn pubsub_topic(&self) -> Option<&str> {
        match self {
            StoreEntry::Bare(_) => None,
            StoreEntry::Keyed(entry) => entry.pubsub_topic.as_deref(),
        }
    }
}

/// Store response with field casing normalized across variants.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResponse {
    #[serde(default, alias = "request_id")]
    pub request_id: Option<String>,
    #[serde(default, alias = "status_code")]
    pub status_code: Option<u32>,
    #[serde(default, alias = "status_desc")]
    pub status_desc: Option<String>,
    #[serde(default)]
    messages: Option<Vec<StoreEntry>>,
    #[serde(default, alias = "pagination_cursor")]
    pub pagination_cursor: Option<String>,
}

impl StoreResponse {
    pub fn messages(&self) -> &[StoreEntry] {
        self.messages.as_deref().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages().is_empty()
    }

    pub fn message_at(&self, index: usize) -> Option<&Message> {
        self.messages().get(index)?.message()
    }

    pub fn message_hash(&self, index: usize) -> Option<&str> {
        self.messages().get(index)?.hash()
    }

    pub fn message_pubsub_topic(&self, index: usize) -> Option<&str> {
        self.messages().get(index)?.pubsub_topic()
    }

    /// Hashes of all entries, in response order.
    pub fn hashes(&self) -> Vec<&str> {
        self.messages().iter().filter_map(StoreEntry::hash).collect()
    }

    /// Cursor for the next page, if there is one.
    pub fn cursor(&self) -> Option<&str> {
        self.pagination_cursor
            .as_deref()
            .filter(|cursor| !cursor.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_pairs() {
        let query = StoreQuery::new()
            .include_data(true)
            .pubsub_topic("/waku/2/rs/3/0")
            .content_topics(["/myapp/1/latest/proto", "/myapp/1/other/proto"])
            .page_size(5)
            .ascending(true)
            .extra("pubsubTopic", "/waku/2/rs/3/1");
        assert_eq!(
            query.to_pairs(),
            vec![
                ("includeData".to_string(), "true".to_string()),
                ("pubsubTopic".to_string(), "/waku/2/rs/3/0".to_string()),
                (
                    "contentTopics".to_string(),
                    "/myapp/1/latest/proto,/myapp/1/other/proto".to_string()
                ),
                ("pageSize".to_string(), "5".to_string()),
                ("ascending".to_string(), "true".to_string()),
                ("pubsubTopic".to_string(), "/waku/2/rs/3/1".to_string()),
            ]
        );
        assert!(StoreQuery::new().to_pairs().is_empty());
        assert_eq!(StoreQuery::new().version.as_str(), "v3");
    }

    #[test]
    fn test_nwaku_response() {
        let response: StoreResponse = serde_json::from_value(json!({
            "requestId": "abc",
            "statusCode": 200,
            "statusDesc": "OK",
            "messages": [
                {
                    "messageHash": "0x01",
                    "message": {"payload": "YQ==", "contentTopic": "/a/1/b/proto", "timestamp": 1},
                    "pubsubTopic": "/waku/2/rs/3/0"
                },
                {"messageHash": "0x02"}
            ],
            "paginationCursor": "0x02"
        }))
        .unwrap();
        assert_eq!(response.request_id.as_deref(), Some("abc"));
        assert_eq!(response.status_code, Some(200));
        assert_eq!(response.len(), 2);
        assert_eq!(response.hashes(), vec!["0x01", "0x02"]);
        assert_eq!(response.message_at(0).unwrap().payload, "YQ==");
        assert!(response.message_at(1).is_none());
        assert_eq!(response.message_pubsub_topic(0), Some("/waku/2/rs/3/0"));
        assert_eq!(response.cursor(), Some("0x02"));
    }

    #[test]
    fn test_gowaku_response() {
        let response: StoreResponse = serde_json::from_value(json!({
            "request_id": "abc",
            "status_code": 200,
            "status_desc": "OK",
            "messages": [
                {
                    "message_hash": "AQ==",
                    "message": {"payload": "YQ==", "content_topic": "/a/1/b/proto"},
                    "pubsub_topic": "/waku/2/rs/3/0"
                }
            ],
            "pagination_cursor": ""
        }))
        .unwrap();
        assert_eq!(response.status_desc.as_deref(), Some("OK"));
        assert_eq!(response.message_hash(0), Some("AQ=="));
        assert_eq!(response.message_at(0).unwrap().content_topic, "/a/1/b/proto");

        // An empty cursor means there are no more pages
        assert!(response.cursor().is_none());
    }

    #[test]
    fn test_v1_response_and_missing_messages() {
        let response: StoreResponse = serde_json::from_value(json!({
            "messages": [{"payload": "YQ==", "contentTopic": "/a/1/b/proto"}]
        }))
        .unwrap();
        assert!(matches!(response.messages()[0], StoreEntry::Bare(_)));
        assert_eq!(response.message_at(0).unwrap().payload, "YQ==");
        assert!(response.message_hash(0).is_none());

        let response: StoreResponse = serde_json::from_value(json!({
            "requestId": "abc",
            "statusCode": 200,
            "statusDesc": "OK",
            "messages": null
        }))
        .unwrap();
        assert!(response.is_empty());
        assert!(response.message_hash(0).is_none());
    }
}
