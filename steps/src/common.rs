//! Verbs shared by every fixture.

use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use waku_interop_node::{
    assert_received, Error, FlagValue, Flags, HashEncoding, Message, Node, StartOptions,
};
use waku_interop_utils::{delay, Retry};

/// Shards a go-waku peer is added on unless a test says otherwise.
pub const DEFAULT_SHARDS: [u16; 9] = [0, 1, 2, 3, 4, 5, 6, 7, 8];

/// How long peer discovery may take to produce a first connection.
pub const AUTOCONNECTION_RETRY: Retry = Retry::secs(120, 1000);

/// Fail with `message` unless `condition` holds.
pub fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), Error> {
    if condition {
        Ok(())
    } else {
        Err(Error::Assertion(message()))
    }
}

/// Apply a role's `defaults` under the caller's `options`. Caller flags win.
pub fn with_defaults(defaults: Flags, mut options: StartOptions) -> StartOptions {
    let mut flags = defaults;
    flags.merge(std::mem::take(&mut options.flags));
    options.flags = flags;
    options
}

/// Whether `key` is switched on in `options`.
pub fn is_enabled(options: &StartOptions, key: &str) -> bool {
    match options.flags.get(key) {
        Some(FlagValue::Text(value)) => value.eq_ignore_ascii_case("true"),
        Some(FlagValue::Switch(value)) => *value,
        _ => false,
    }
}

/// Add each of `multiaddrs` to `node` as a relay peer.
pub async fn add_node_peer(node: &Node, multiaddrs: &[String], shards: &[u16]) -> Result<(), Error> {
    for multiaddr in multiaddrs {
        node.add_peer(multiaddr, shards).await?;
    }
    Ok(())
}

/// Wait until every node in `nodes` reports at least one peer.
///
/// `hard_wait`, when set, replaces polling with a flat delay (used by tests that
/// check discovery does *not* happen).
pub async fn wait_for_autoconnection(
    nodes: &[Arc<Node>],
    hard_wait: Option<Duration>,
) -> Result<(), Error> {
    if let Some(duration) = hard_wait {
        delay(duration).await;
        return Ok(());
    }
    for node in nodes {
        AUTOCONNECTION_RETRY
            .run(|| async {
                let peers = node.get_peers().await?;
                debug!(image = node.image(), peers = peers.len(), "checking peers");
                check(!peers.is_empty(), || {
                    format!("{} has no peers yet", node.image())
                })
            })
            .await?;
    }
    info!(nodes = nodes.len(), "nodes are connected");
    Ok(())
}

/// Where a receiving node's copy of a message is fetched from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fetch {
    /// `relay/v1/messages/<pubsub>`.
    Relay { pubsub_topic: String },
    /// `relay/v1/auto/messages/<content>`.
    RelayAuto { content_topic: String },
    /// `filter/v2/messages/...`.
    Filter {
        content_topic: String,
        pubsub_topic: Option<String>,
    },
}

impl Fetch {
    pub fn relay(pubsub_topic: impl Into<String>) -> Self {
        Fetch::Relay {
            pubsub_topic: pubsub_topic.into(),
        }
    }

    pub fn relay_auto(content_topic: impl Into<String>) -> Self {
        Fetch::RelayAuto {
            content_topic: content_topic.into(),
        }
    }

    pub fn filter(content_topic: impl Into<String>, pubsub_topic: Option<&str>) -> Self {
        Fetch::Filter {
            content_topic: content_topic.into(),
            pubsub_topic: pubsub_topic.map(String::from),
        }
    }
}

/// Messages cached on `node` for `source`.
pub async fn fetch(node: &Node, source: &Fetch) -> Result<Vec<Message>, Error> {
    match source {
        Fetch::Relay { pubsub_topic } => node.get_relay_messages(pubsub_topic).await,
        Fetch::RelayAuto { content_topic } => node.get_relay_auto_messages(content_topic).await,
        Fetch::Filter {
            content_topic,
            pubsub_topic,
        } => {
            node.get_filter_messages(content_topic, pubsub_topic.as_deref())
                .await
        }
    }
}

/// Check that each peer holds exactly `message` for `source`.
///
/// Fetching drains the node's cache, so each peer is queried once.
pub async fn check_message_reaches(
    peers: &[Arc<Node>],
    message: &Message,
    source: &Fetch,
) -> Result<(), Error> {
    for (index, peer) in peers.iter().enumerate() {
        let messages = fetch(peer, source).await?;
        debug!(image = peer.image(), count = messages.len(), "got messages from peer");
        check(!messages.is_empty(), || {
            format!(
                "Peer NODE_{}:{} couldn't find any messages",
                index + 2,
                peer.image()
            )
        })?;
        check(messages.len() == 1, || {
            format!("Expected 1 message but got {}", messages.len())
        })?;
        assert_received(message, &messages[0])?;
    }
    Ok(())
}

/// Check that none of `peers` holds a message for `source`.
pub async fn check_no_message(peers: &[Arc<Node>], source: &Fetch) -> Result<(), Error> {
    for peer in peers {
        let messages = fetch(peer, source).await?;
        check(messages.is_empty(), || {
            format!(
                "{} received {} message(s) it should not have",
                peer.image(),
                messages.len()
            )
        })?;
    }
    Ok(())
}

/// Hash of `message` on `pubsub_topic` in the encoding a node reports.
pub fn compute_message_hash(
    pubsub_topic: &str,
    message: &Message,
    encoding: HashEncoding,
) -> Result<String, Error> {
    Ok(message.fingerprint(pubsub_topic)?.encode(encoding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use waku_interop_node::{config::DEFAULT_GOWAKU, Config};

    #[test]
    fn test_check() {
        assert!(check(true, || unreachable!()).is_ok());
        let err = check(false, || "no peers".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "no peers");
    }

    #[test]
    fn test_with_defaults() {
        let defaults = Flags::new().with("relay", "true").with("store", "true");
        let options = with_defaults(
            defaults,
            StartOptions::new().flag("relay", "false").flag("nodekey", "abc"),
        );
        assert_eq!(options.flags.get_text("relay"), Some("false"));
        assert_eq!(options.flags.get_text("store"), Some("true"));
        assert_eq!(options.flags.get_text("nodekey"), Some("abc"));
        assert!(!is_enabled(&options, "relay"));
        assert!(is_enabled(&options, "store"));
        assert!(is_enabled(&StartOptions::new().flag("relay", true), "relay"));
        assert!(!is_enabled(&options, "lightpush"));
    }

    #[test]
    fn test_compute_message_hash() {
        let message = Message::new("Store works!!", "/myapp/1/latest/proto").with_timestamp(1i64);
        let hex = compute_message_hash("/waku/2/rs/3/0", &message, HashEncoding::Hex).unwrap();
        let base64 =
            compute_message_hash("/waku/2/rs/3/0", &message, HashEncoding::Base64).unwrap();
        assert!(hex.starts_with("0x"));
        assert_eq!(hex.len(), 66);
        assert_eq!(base64.len(), 44);
        assert_ne!(
            hex,
            compute_message_hash("/waku/2/rs/3/1", &message, HashEncoding::Hex).unwrap()
        );
    }

    #[test]
    fn test_fetch_sources() {
        assert_eq!(
            Fetch::filter("/a/1/b/proto", Some("/waku/2/rs/3/0")),
            Fetch::Filter {
                content_topic: "/a/1/b/proto".into(),
                pubsub_topic: Some("/waku/2/rs/3/0".into()),
            }
        );
        assert_eq!(
            Fetch::relay("/waku/2/rs/3/0"),
            Fetch::Relay {
                pubsub_topic: "/waku/2/rs/3/0".into()
            }
        );
    }

    #[tokio::test]
    async fn test_hard_wait_skips_polling() {
        // Nothing is running, so polling would fail
        let node = Arc::new(
            Node::new(DEFAULT_GOWAKU, "idle", Arc::new(Config::default())).unwrap(),
        );
        wait_for_autoconnection(&[node.clone()], Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(add_node_peer(&node, &["/ip4/1.2.3.4/tcp/1/p2p/x".into()], &DEFAULT_SHARDS)
            .await
            .is_err());
    }
}
