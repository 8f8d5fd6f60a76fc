//! Relay nodes on static (cluster and shard) or auto (content topic) sharding.

use crate::{
    common::{check_message_reaches, fetch, Fetch},
    topology::{Phase, Topology},
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tracing::debug;
use waku_interop_node::{Error, FlagValue, Flags, Message, Node, StartOptions, Variant};
use waku_interop_utils::delay;

pub const CONTENT_TOPIC: &str = "/toychat/2/huilong/proto";
pub const PUBSUB_TOPIC: &str = "/waku/2/rs/2/0";
pub const PAYLOAD: &str = "Sharding works!!";

pub const PROPAGATION_DELAY: Duration = Duration::from_millis(100);

/// How a node is placed in the shard space.
///
/// Empty lists leave the corresponding flag unset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sharding {
    pub cluster_id: Option<String>,
    pub pubsub_topics: Vec<String>,
    pub content_topics: Vec<String>,
}

impl Sharding {
    /// Static sharding on `pubsub_topics`. The cluster id comes from the first topic.
    pub fn pubsub<S: AsRef<str>>(pubsub_topics: &[S]) -> Self {
        Self {
            pubsub_topics: pubsub_topics.iter().map(|t| t.as_ref().to_string()).collect(),
            ..Self::default()
        }
    }

    /// Auto sharding of `content_topics` inside `cluster_id`.
    pub fn content<S: AsRef<str>>(cluster_id: &str, content_topics: &[S]) -> Self {
        Self {
            cluster_id: Some(cluster_id.to_string()),
            content_topics: content_topics
                .iter()
                .map(|t| t.as_ref().to_string())
                .collect(),
            ..Self::default()
        }
    }

    pub fn cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = Some(cluster_id.into());
        self
    }

    /// Render as node flags, resolving the cluster id eagerly so a malformed
    /// topic fails before any container starts.
    pub fn to_flags(&self) -> Result<Flags, Error> {
        let mut flags = Flags::new();
        if !self.pubsub_topics.is_empty() {
            flags.set("pubsub-topic", FlagValue::List(self.pubsub_topics.clone()));
        }
        if let Some(cluster_id) = &self.cluster_id {
            flags.set("cluster-id", cluster_id);
        }
        flags.resolve_cluster_id()?;
        if !self.content_topics.is_empty() {
            flags.set("content-topic", FlagValue::List(self.content_topics.clone()));
        }
        Ok(flags)
    }
}

/// Topics a subscription names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topics<'a> {
    /// Auto sharding: the node derives the shard.
    Content(&'a [&'a str]),
    Pubsub(&'a [&'a str]),
}

/// Subscribe `node` to `topics`.
pub async fn subscribe_relay_node(node: &Node, topics: Topics<'_>) -> Result<(), Error> {
    match topics {
        Topics::Content(content_topics) => {
            node.set_relay_auto_subscriptions(content_topics).await?;
        }
        Topics::Pubsub(pubsub_topics) => {
            node.set_relay_subscriptions(pubsub_topics).await?;
        }
    }
    Ok(())
}

/// Where to read back a relayed message. A content topic takes precedence.
pub fn retrieval_source(content_topic: Option<&str>, pubsub_topic: Option<&str>) -> Result<Fetch, Error> {
    match (content_topic, pubsub_topic) {
        (Some(content_topic), _) => Ok(Fetch::relay_auto(content_topic)),
        (None, Some(pubsub_topic)) => Ok(Fetch::relay(pubsub_topic)),
        (None, None) => Err(Error::MissingParameter("content_topic or pubsub_topic")),
    }
}

/// Relay nodes sharing a shard layout.
#[derive(Debug)]
pub struct ShardedRelay {
    topology: Topology,
    enr_uri: Option<String>,
    multiaddr: Option<String>,
    main_nodes: Vec<Arc<Node>>,
    optional_nodes: Vec<Arc<Node>>,
}

impl ShardedRelay {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            enr_uri: None,
            multiaddr: None,
            main_nodes: Vec::new(),
            optional_nodes: Vec::new(),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn main_nodes(&self) -> &[Arc<Node>] {
        &self.main_nodes
    }

    pub fn optional_nodes(&self) -> &[Arc<Node>] {
        &self.optional_nodes
    }

    pub fn node(&self, index: usize) -> Result<&Arc<Node>, Error> {
        self.main_nodes
            .get(index)
            .ok_or_else(|| Error::Fixture(format!("node {} is not started", index + 1)))
    }

    /// Every node expected to receive relayed messages.
    pub fn all_nodes(&self) -> Vec<Arc<Node>> {
        self.main_nodes
            .iter()
            .chain(&self.optional_nodes)
            .cloned()
            .collect()
    }

    fn options(sharding: &Sharding, options: StartOptions) -> Result<StartOptions, Error> {
        let mut flags = Flags::new().with("relay", "true");
        flags.merge(sharding.to_flags()?);
        Ok(crate::common::with_defaults(flags, options))
    }

    /// First relay node, with the fixed node key. Its ENR bootstraps the rest.
    pub async fn setup_first_relay_node(
        &mut self,
        sharding: &Sharding,
        options: StartOptions,
    ) -> Result<Arc<Node>, Error> {
        let image = self.topology.config().node_1.clone();
        let nodekey = self.topology.config().nodekey.clone();
        let options = Self::options(sharding, options.flag("nodekey", nodekey))?;
        let node = self.topology.start(&image, "node1", options).await?;
        self.enr_uri = Some(node.enr_uri()?);
        self.multiaddr = Some(node.multiaddr_with_id()?);
        self.main_nodes.push(node.clone());
        Ok(node)
    }

    pub async fn setup_second_relay_node(
        &mut self,
        sharding: &Sharding,
        options: StartOptions,
    ) -> Result<Arc<Node>, Error> {
        let (Some(enr_uri), Some(multiaddr)) = (self.enr_uri.clone(), self.multiaddr.clone()) else {
            return Err(Error::Fixture("start the first relay node first".into()));
        };
        let image = self.topology.config().node_2.clone();
        let options = Self::options(sharding, options.flag("discv5-bootstrap-node", enr_uri))?;
        let node = self.topology.start(&image, "node2", options).await?;
        if node.variant() == Variant::Nwaku {
            node.add_peers(&json!([multiaddr])).await?;
        }
        self.main_nodes.push(node.clone());
        Ok(node)
    }

    pub async fn setup_main_relay_nodes(&mut self, sharding: &Sharding) -> Result<(), Error> {
        self.setup_first_relay_node(sharding, StartOptions::new())
            .await?;
        self.setup_second_relay_node(sharding, StartOptions::new())
            .await?;
        Ok(())
    }

    /// Start the configured additional images as plain relay nodes.
    pub async fn setup_optional_relay_nodes(&mut self) -> Result<(), Error> {
        let images = self.topology.config().additional_nodes.clone();
        if images.is_empty() {
            return Err(Error::Fixture(
                "ADDITIONAL_NODES is empty, cannot run test".into(),
            ));
        }
        let Some(enr_uri) = self.enr_uri.clone() else {
            return Err(Error::Fixture("start the first relay node first".into()));
        };
        for (index, image) in images.iter().enumerate() {
            let options = StartOptions::new()
                .flag("relay", "true")
                .flag("discv5-bootstrap-node", &enr_uri);
            let node = self
                .topology
                .start(image, &format!("node{}", index + 3), options)
                .await?;
            self.optional_nodes.push(node);
        }
        Ok(())
    }

    pub async fn subscribe_main_relay_nodes(&mut self, topics: Topics<'_>) -> Result<(), Error> {
        for node in &self.main_nodes {
            subscribe_relay_node(node, topics).await?;
        }
        if self.topology.phase() < Phase::Subscribed {
            self.topology.advance(Phase::Subscribed)?;
        }
        Ok(())
    }

    pub async fn subscribe_optional_relay_nodes(&self, topics: Topics<'_>) -> Result<(), Error> {
        for node in &self.optional_nodes {
            subscribe_relay_node(node, topics).await?;
        }
        Ok(())
    }

    pub fn create_message(&self) -> Message {
        Message::new(PAYLOAD, CONTENT_TOPIC)
    }

    /// Publish on `pubsub_topic`, or through auto sharding when it is `None`.
    pub async fn relay_message(
        &self,
        node: &Node,
        message: &Message,
        pubsub_topic: Option<&str>,
    ) -> Result<(), Error> {
        match pubsub_topic {
            Some(pubsub_topic) => node.send_relay_message(message, pubsub_topic).await?,
            None => node.send_relay_auto_message(message).await?,
        };
        Ok(())
    }

    pub async fn retrieve_relay_message(
        &self,
        node: &Node,
        content_topic: Option<&str>,
        pubsub_topic: Option<&str>,
    ) -> Result<Vec<Message>, Error> {
        fetch(node, &retrieval_source(content_topic, pubsub_topic)?).await
    }

    /// Publish from `sender` (or the first node) and check every peer (or all
    /// nodes) holds exactly that message.
    pub async fn check_published_message_reaches_relay_peer(
        &self,
        message: &Message,
        content_topic: Option<&str>,
        pubsub_topic: Option<&str>,
        sender: Option<&Node>,
        peers: Option<&[Arc<Node>]>,
    ) -> Result<(), Error> {
        let source = retrieval_source(content_topic, pubsub_topic)?;
        let sender: &Node = match sender {
            Some(sender) => sender,
            None => self.node(0)?.as_ref(),
        };
        let all = self.all_nodes();
        let peers = peers.unwrap_or(&all);
        self.relay_message(sender, message, pubsub_topic).await?;
        delay(PROPAGATION_DELAY).await;
        debug!(peers = peers.len(), "checking sharded delivery");
        check_message_reaches(peers, message, &source).await
    }

    pub async fn teardown(mut self) -> Result<(), Error> {
        self.topology.teardown().await
    }
}
