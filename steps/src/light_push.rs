//! Light clients pushing messages through relay nodes.

use crate::{
    common::{add_node_peer, check_message_reaches, is_enabled, with_defaults, Fetch, DEFAULT_SHARDS},
    filter::subscription,
    topology::{Phase, Topology},
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tracing::debug;
use waku_interop_node::{Error, Flags, Message, Node, StartOptions};
use waku_interop_utils::delay;

pub const CONTENT_TOPIC: &str = "/myapp/1/latest/proto";
pub const PUBSUB_TOPIC: &str = "/waku/2/rs/0/0";
pub const PAYLOAD: &str = "Light push works!!";

pub const PROPAGATION_DELAY: Duration = Duration::from_millis(100);

/// Body of `POST lightpush/v1/message`.
pub fn light_push_payload(pubsub_topic: &str, message: &Message) -> Result<Value, Error> {
    Ok(json!({
        "pubsubTopic": pubsub_topic,
        "message": serde_json::to_value(message)?,
    }))
}

/// Receiving relay nodes and the light push clients publishing through them.
#[derive(Debug)]
pub struct LightPush {
    topology: Topology,
    enr_uri: Option<String>,
    multiaddrs: Vec<String>,
    main_receiving_nodes: Vec<Arc<Node>>,
    optional_nodes: Vec<Arc<Node>>,
    receiving_nodes: Vec<Arc<Node>>,
    lightpush_nodes: Vec<Arc<Node>>,
}

impl LightPush {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            enr_uri: None,
            multiaddrs: Vec::new(),
            main_receiving_nodes: Vec::new(),
            optional_nodes: Vec::new(),
            receiving_nodes: Vec::new(),
            lightpush_nodes: Vec::new(),
        }
    }

    /// One receiving node, one light push client, relay subscriptions in place.
    pub async fn setup(topology: Topology) -> Result<Self, Error> {
        let mut light_push = Self::new(topology);
        light_push
            .setup_first_receiving_node(StartOptions::new())
            .await?;
        light_push
            .setup_first_lightpush_node(StartOptions::new())
            .await?;
        light_push
            .subscribe_to_pubsub_topics_via_relay(None, None)
            .await?;
        light_push.topology.advance(Phase::Ready)?;
        Ok(light_push)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Nodes expected to receive pushed messages over relay.
    pub fn main_receiving_nodes(&self) -> &[Arc<Node>] {
        &self.main_receiving_nodes
    }

    pub fn receiving_node(&self, index: usize) -> Result<&Arc<Node>, Error> {
        self.receiving_nodes
            .get(index)
            .ok_or_else(|| Error::Fixture(format!("receiving node {} is not started", index + 1)))
    }

    pub fn lightpush_node(&self, index: usize) -> Result<&Arc<Node>, Error> {
        self.lightpush_nodes
            .get(index)
            .ok_or_else(|| Error::Fixture(format!("lightpush node {} is not started", index + 1)))
    }

    /// Add an extra node that must also receive pushed messages.
    pub fn add_optional_node(&mut self, node: Arc<Node>) {
        self.optional_nodes.push(node);
    }

    async fn start_receiving_node(
        &mut self,
        image: &str,
        index: usize,
        options: StartOptions,
    ) -> Result<Arc<Node>, Error> {
        let relay = is_enabled(&options, "relay");
        let node = self
            .topology
            .start(image, &format!("receiving_node{index}"), options)
            .await?;
        if relay {
            self.main_receiving_nodes.push(node.clone());
        }
        add_node_peer(&node, &self.multiaddrs, &DEFAULT_SHARDS).await?;
        self.multiaddrs.push(node.multiaddr_with_id()?);
        self.receiving_nodes.push(node.clone());
        Ok(node)
    }

    async fn start_lightpush_node(
        &mut self,
        image: &str,
        index: usize,
        options: StartOptions,
    ) -> Result<Arc<Node>, Error> {
        let (Some(enr_uri), Some(service)) = (&self.enr_uri, self.multiaddrs.first()) else {
            return Err(Error::Fixture(
                "start a receiving node before a lightpush node".into(),
            ));
        };
        let defaults = Flags::new()
            .with("discv5-bootstrap-node", enr_uri)
            .with("lightpushnode", service);
        let options = with_defaults(defaults, options);
        let relay = is_enabled(&options, "relay");
        let node = self
            .topology
            .start(image, &format!("lightpush_node{index}"), options)
            .await?;
        if relay {
            self.main_receiving_nodes.push(node.clone());
        }
        add_node_peer(&node, &self.multiaddrs, &DEFAULT_SHARDS).await?;
        Ok(node)
    }

    fn receiving_defaults() -> Flags {
        Flags::new()
            .with("lightpush", "true")
            .with("relay", "true")
            .with("pubsub-topic", PUBSUB_TOPIC)
    }

    fn lightpush_defaults() -> Flags {
        Flags::new()
            .with("lightpush", "true")
            .with("relay", "false")
            .with("pubsub-topic", PUBSUB_TOPIC)
    }

    /// First receiving node, with the fixed node key. Its ENR bootstraps the rest.
    pub async fn setup_first_receiving_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let image = self.topology.config().node_1.clone();
        let nodekey = self.topology.config().nodekey.clone();
        let options = with_defaults(Self::receiving_defaults().with("nodekey", nodekey), options);
        let node = self.start_receiving_node(&image, 1, options).await?;
        self.enr_uri = Some(node.enr_uri()?);
        Ok(node)
    }

    pub async fn setup_second_receiving_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let image = self.topology.config().node_1.clone();
        let options = with_defaults(Self::receiving_defaults(), options);
        self.start_receiving_node(&image, 2, options).await
    }

    pub async fn setup_additional_receiving_nodes(
        &mut self,
        images: &[String],
        options: StartOptions,
    ) -> Result<(), Error> {
        if images.is_empty() {
            return Err(Error::Fixture(
                "ADDITIONAL_NODES/node_list is empty, cannot run test".into(),
            ));
        }
        for (index, image) in images.iter().enumerate() {
            let options = with_defaults(Self::receiving_defaults(), options.clone());
            self.start_receiving_node(image, index + 2, options).await?;
        }
        Ok(())
    }

    pub async fn setup_first_lightpush_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let image = self.topology.config().node_2.clone();
        let options = with_defaults(Self::lightpush_defaults(), options);
        let node = self.start_lightpush_node(&image, 1, options).await?;
        self.lightpush_nodes.insert(0, node.clone());
        Ok(node)
    }

    pub async fn setup_second_lightpush_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let image = self.topology.config().node_2.clone();
        let options = with_defaults(Self::lightpush_defaults(), options);
        let node = self.start_lightpush_node(&image, 2, options).await?;
        self.lightpush_nodes.push(node.clone());
        Ok(node)
    }

    /// Start one lightpush client per image and return them.
    pub async fn setup_additional_lightpush_nodes(
        &mut self,
        images: &[String],
        options: StartOptions,
    ) -> Result<Vec<Arc<Node>>, Error> {
        if images.is_empty() {
            return Err(Error::Fixture(
                "ADDITIONAL_NODES/node_list is empty, cannot run test".into(),
            ));
        }
        let mut started = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            let options = with_defaults(Self::lightpush_defaults(), options.clone());
            let node = self.start_lightpush_node(image, index + 2, options).await?;
            self.lightpush_nodes.push(node.clone());
            started.push(node);
        }
        Ok(started)
    }

    /// Subscribe `node` (or every main receiving node) to `pubsub_topics`.
    pub async fn subscribe_to_pubsub_topics_via_relay(
        &self,
        node: Option<&Node>,
        pubsub_topics: Option<&[&str]>,
    ) -> Result<(), Error> {
        let pubsub_topics = pubsub_topics.unwrap_or(&[PUBSUB_TOPIC]);
        match node {
            Some(node) => {
                node.set_relay_subscriptions(pubsub_topics).await?;
            }
            None => {
                for node in &self.main_receiving_nodes {
                    node.set_relay_subscriptions(pubsub_topics).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn subscribe_to_pubsub_topics_via_filter(
        &self,
        node: &Node,
        pubsub_topic: Option<&str>,
        content_topics: Option<&[&str]>,
    ) -> Result<(), Error> {
        let body = subscription(
            "1",
            content_topics.unwrap_or(&[CONTENT_TOPIC]),
            pubsub_topic.unwrap_or(PUBSUB_TOPIC),
        );
        node.set_filter_subscriptions(&body).await?;
        Ok(())
    }

    pub fn create_message(&self) -> Message {
        Message::new(PAYLOAD, CONTENT_TOPIC)
    }

    pub fn create_payload(&self, pubsub_topic: Option<&str>, message: &Message) -> Result<Value, Error> {
        light_push_payload(pubsub_topic.unwrap_or(PUBSUB_TOPIC), message)
    }

    /// Push `message` from the first lightpush node and check every receiving
    /// node relayed it.
    pub async fn check_light_pushed_message_reaches_receiving_peer(
        &self,
        message: &Message,
        pubsub_topic: Option<&str>,
    ) -> Result<(), Error> {
        let peers: Vec<_> = self
            .main_receiving_nodes
            .iter()
            .chain(&self.optional_nodes)
            .cloned()
            .collect();
        self.check_light_pushed_message_reaches_peers(
            message,
            pubsub_topic,
            self.lightpush_node(0)?,
            &peers,
        )
        .await
    }

    pub async fn check_light_pushed_message_reaches_peers(
        &self,
        message: &Message,
        pubsub_topic: Option<&str>,
        sender: &Node,
        peers: &[Arc<Node>],
    ) -> Result<(), Error> {
        let pubsub_topic = pubsub_topic.unwrap_or(PUBSUB_TOPIC);
        let payload = self.create_payload(Some(pubsub_topic), message)?;
        debug!("lightpushing message");
        sender.send_light_push_message(&payload).await?;
        delay(PROPAGATION_DELAY).await;
        check_message_reaches(peers, message, &Fetch::relay(pubsub_topic)).await
    }

    pub async fn teardown(mut self) -> Result<(), Error> {
        self.topology.teardown().await
    }
}
