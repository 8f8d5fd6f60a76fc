//! The two node implementations under test and where they differ.
//!
//! A [Flavor] is chosen once from the image name and stored on the node handle.
//! Everything variant-specific (default flags, request shapes, supported
//! operations) goes through it, so call sites never branch on the image.

use crate::{
    flags::{FlagValue, Flags},
    message::HashEncoding,
    network::Ports,
    Error,
};
use serde_json::{json, Value};
use std::{fmt, net::Ipv4Addr, sync::Arc};

/// Protocol used when adding relay peers through the admin API.
pub const RELAY_PROTOCOL: &str = "/vac/waku/relay/2.0.0";

/// Node implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Variant {
    Nwaku,
    GoWaku,
}

impl Variant {
    /// Detect the variant from an image reference.
    pub fn from_image(image: &str) -> Result<Self, Error> {
        if image.contains("nwaku") {
            Ok(Variant::Nwaku)
        } else if image.contains("go-waku") {
            Ok(Variant::GoWaku)
        } else {
            Err(Error::UnknownImage(image.to_string()))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Nwaku => "nwaku",
            Variant::GoWaku => "go-waku",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional operations only some variants expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Prometheus endpoint.
    Metrics,
    /// `PUT filter/v2/subscriptions`.
    FilterUpdate,
    /// Rate-limiting nullifiers (credentials, registration, keystores).
    Rln,
}

/// Variant-specific behavior of a node.
pub trait Flavor: Send + Sync + fmt::Debug {
    fn variant(&self) -> Variant;

    /// Flags every node of this variant starts with.
    fn default_flags(&self, ip: Ipv4Addr, ports: &Ports) -> Flags;

    fn supports(&self, capability: Capability) -> bool;

    /// Whether readiness must be confirmed through `/health` before `/debug/v1/info`.
    fn requires_health_gate(&self) -> bool;

    /// Encoding of message hashes in store responses.
    fn hash_encoding(&self) -> HashEncoding;

    /// Body of `POST admin/v1/peers` for a single peer.
    fn add_peer_body(&self, multiaddr: &str, shards: &[u16]) -> Value;

    /// Multiaddr of a peer as listed by `GET admin/v1/peers`.
    fn peer_multiaddr(&self, peer: &Value) -> Option<String>;

    /// Path segments after `filter/v2/messages`.
    fn filter_messages_path(
        &self,
        content_topic: &str,
        pubsub_topic: Option<&str>,
    ) -> Result<Vec<String>, Error>;

    /// Flag name enabling peer persistence.
    fn peer_persistence_flag(&self) -> &'static str;

    /// JSON-RPC method subscribing to relay topics.
    fn relay_subscribe_method(&self) -> &'static str;
}

/// Flags shared by both variants.
fn common_flags(ip: Ipv4Addr, ports: &Ports) -> Flags {
    Flags::new()
        .with("listen-address", "0.0.0.0")
        .with("rest", "true")
        .with("rest-admin", "true")
        .with("websocket-support", "true")
        .with("log-level", "TRACE")
        .with("rest-relay-cache-capacity", "100")
        .with("websocket-port", ports.websocket)
        .with("rest-port", ports.rest)
        .with("tcp-port", ports.tcp)
        .with("discv5-udp-port", ports.discv5)
        .with("rest-address", "0.0.0.0")
        .with("nat", format!("extip:{ip}"))
        .with("peer-exchange", "true")
        .with("discv5-discovery", "true")
        .with("cluster-id", "0")
}

#[derive(Debug, Default)]
pub struct Nwaku;

impl Flavor for Nwaku {
    fn variant(&self) -> Variant {
        Variant::Nwaku
    }

    fn default_flags(&self, ip: Ipv4Addr, ports: &Ports) -> Flags {
        common_flags(ip, ports)
            .with("shard", "0")
            .with("metrics-server", "true")
            .with("metrics-server-address", "0.0.0.0")
            .with("metrics-server-port", ports.metrics)
            .with("metrics-logging", "true")
    }

    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    fn requires_health_gate(&self) -> bool {
        true
    }

    fn hash_encoding(&self) -> HashEncoding {
        HashEncoding::Hex
    }

    fn add_peer_body(&self, multiaddr: &str, _shards: &[u16]) -> Value {
        json!([multiaddr])
    }

    fn peer_multiaddr(&self, peer: &Value) -> Option<String> {
        peer.get("multiaddr")?.as_str().map(String::from)
    }

    fn filter_messages_path(
        &self,
        content_topic: &str,
        _pubsub_topic: Option<&str>,
    ) -> Result<Vec<String>, Error> {
        Ok(vec![content_topic.to_string()])
    }

    fn peer_persistence_flag(&self) -> &'static str {
        "peer-persistence"
    }

    fn relay_subscribe_method(&self) -> &'static str {
        "post_waku_v2_relay_v1_subscriptions"
    }
}

#[derive(Debug, Default)]
pub struct GoWaku;

impl Flavor for GoWaku {
    fn variant(&self) -> Variant {
        Variant::GoWaku
    }

    fn default_flags(&self, ip: Ipv4Addr, ports: &Ports) -> Flags {
        common_flags(ip, ports)
            .with("min-relay-peers-to-publish", "1")
            .with("log-level", "DEBUG")
            .with("rest-filter-cache-capacity", "50")
            .with("peer-store-capacity", "10")
    }

    fn supports(&self, _capability: Capability) -> bool {
        false
    }

    fn requires_health_gate(&self) -> bool {
        false
    }

    fn hash_encoding(&self) -> HashEncoding {
        HashEncoding::Base64
    }

    fn add_peer_body(&self, multiaddr: &str, shards: &[u16]) -> Value {
        json!({
            "multiaddr": multiaddr,
            "protocols": [RELAY_PROTOCOL],
            "shards": shards,
        })
    }

    fn peer_multiaddr(&self, peer: &Value) -> Option<String> {
        peer.get("multiaddrs")?.get(0)?.as_str().map(String::from)
    }

    fn filter_messages_path(
        &self,
        content_topic: &str,
        pubsub_topic: Option<&str>,
    ) -> Result<Vec<String>, Error> {
        let pubsub_topic = pubsub_topic.ok_or(Error::MissingParameter("pubsub topic"))?;
        Ok(vec![pubsub_topic.to_string(), content_topic.to_string()])
    }

    fn peer_persistence_flag(&self) -> &'static str {
        "persist-peers"
    }

    fn relay_subscribe_method(&self) -> &'static str {
        "post_waku_v2_relay_v1_subscription"
    }
}

/// Pick the flavor for `image`.
pub fn flavor_for(image: &str) -> Result<Arc<dyn Flavor>, Error> {
    let flavor: Arc<dyn Flavor> = match Variant::from_image(image)? {
        Variant::Nwaku => Arc::new(Nwaku),
        Variant::GoWaku => Arc::new(GoWaku),
    };
    Ok(flavor)
}

/// Whether a flag value enables something (`true` as text or switch).
pub(crate) fn enabled(value: Option<&FlagValue>) -> bool {
    match value {
        Some(FlagValue::Text(value)) => value.eq_ignore_ascii_case("true"),
        Some(FlagValue::Switch(value)) => *value,
        _ => false,
    }
}
