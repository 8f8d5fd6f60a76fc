//! Two relay nodes bootstrapped into one mesh.

use crate::{
    common::{check, check_message_reaches, fetch, Fetch},
    topology::{Phase, Topology},
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use waku_interop_node::{assert_received, Error, ErrorKind, Message, Node, StartOptions};
use waku_interop_utils::{delay, Retry};

pub const PUBSUB_TOPIC: &str = "/waku/2/rs/18/1";
pub const CONTENT_TOPIC: &str = "/test/1/waku-relay/proto";
pub const PAYLOAD: &str = "Relay works!!";

/// How long a fresh mesh may take to relay its first message.
pub const WARM_UP: Retry = Retry::secs(120, 1000);

/// Flat wait between publishing and fetching.
pub const PROPAGATION_DELAY: Duration = Duration::from_millis(100);

/// Rejections that mean a message was not relayed.
const NOT_RELAYED: [&str; 4] = [
    "Bad Request",
    "Not Found",
    "couldn't find any messages",
    "Failed to publish",
];

/// A publishing node and a receiving node sharing one relay topic.
#[derive(Debug)]
pub struct Relay {
    topology: Topology,
    pub node1: Arc<Node>,
    pub node2: Arc<Node>,
    pub pubsub_topic: String,
}

impl Relay {
    /// Start both nodes, subscribe them and wait until the mesh relays.
    pub async fn setup(mut topology: Topology) -> Result<Self, Error> {
        let image1 = topology.config().node_1.clone();
        let image2 = topology.config().node_2.clone();

        // Start
        let node1 = topology
            .start(&image1, "node1", relay_options(PUBSUB_TOPIC))
            .await?;
        let enr_uri = node1.enr_uri()?;
        let node2 = topology
            .start(
                &image2,
                "node2",
                relay_options(PUBSUB_TOPIC).flag("discv5-bootstrap-node", enr_uri),
            )
            .await?;
        let mut relay = Self {
            topology,
            node1,
            node2,
            pubsub_topic: PUBSUB_TOPIC.to_string(),
        };

        // Subscribe
        relay
            .ensure_relay_subscriptions_on_nodes(&[PUBSUB_TOPIC])
            .await?;
        relay.topology.advance(Phase::Subscribed)?;

        // Warm up
        relay.wait_for_network_to_warm_up().await?;
        relay.topology.advance(Phase::Ready)?;
        Ok(relay)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn nodes(&self) -> [Arc<Node>; 2] {
        [self.node1.clone(), self.node2.clone()]
    }

    pub fn create_message(&self) -> Message {
        Message::new(PAYLOAD, CONTENT_TOPIC)
    }

    pub async fn ensure_relay_subscriptions_on_nodes(&self, topics: &[&str]) -> Result<(), Error> {
        for node in self.nodes() {
            node.set_relay_subscriptions(topics).await?;
        }
        Ok(())
    }

    pub async fn delete_relay_subscriptions_on_nodes(&self, topics: &[&str]) -> Result<(), Error> {
        for node in self.nodes() {
            node.delete_relay_subscriptions(topics).await?;
        }
        Ok(())
    }

    async fn wait_for_network_to_warm_up(&mut self) -> Result<(), Error> {
        WARM_UP
            .run(|| async {
                let message = self.create_message();
                self.check_published_message_reaches_peer(&message, None, PROPAGATION_DELAY)
                    .await
                    .map_err(|err| Error::Assertion(format!("WARM UP FAILED WITH: {err}")))
            })
            .await?;
        self.topology.advance(Phase::WarmedUp)?;
        info!("relay mesh is warmed up");
        Ok(())
    }

    /// Publish `message` from the first node and check the second node got it.
    pub async fn check_published_message_reaches_peer(
        &self,
        message: &Message,
        pubsub_topic: Option<&str>,
        propagation_delay: Duration,
    ) -> Result<(), Error> {
        let pubsub_topic = pubsub_topic.unwrap_or(&self.pubsub_topic);
        self.node1.send_relay_message(message, pubsub_topic).await?;
        delay(propagation_delay).await;
        check_message_reaches(
            std::slice::from_ref(&self.node2),
            message,
            &Fetch::relay(pubsub_topic),
        )
        .await
    }

    /// Poll until `message`, already published, shows up on the second node.
    pub async fn wait_for_published_message_to_reach_peer(
        &self,
        message: &Message,
        pubsub_topic: Option<&str>,
        policy: Retry,
    ) -> Result<(), Error> {
        let source = Fetch::relay(pubsub_topic.unwrap_or(&self.pubsub_topic));
        policy
            .run(|| check_message_reaches(std::slice::from_ref(&self.node2), message, &source))
            .await
    }

    /// Publish on `pubsub_topic` and check the second node did not receive it.
    pub async fn check_published_message_doesnt_reach_peer(
        &self,
        message: &Message,
        pubsub_topic: &str,
    ) -> Result<(), Error> {
        match self
            .check_published_message_reaches_peer(message, Some(pubsub_topic), PROPAGATION_DELAY)
            .await
        {
            Ok(()) => Err(Error::Assertion(format!(
                "message on {pubsub_topic} reached the peer"
            ))),
            Err(err) if is_not_relayed(&err) => {
                debug!(%err, "message was not relayed");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Publishing on a topic nobody subscribed to must not deliver anything.
    pub async fn check_publish_without_relay_subscription(
        &self,
        pubsub_topic: &str,
    ) -> Result<(), Error> {
        self.check_published_message_doesnt_reach_peer(&self.create_message(), pubsub_topic)
            .await
            .map_err(|err| match err {
                Error::Assertion(_) => {
                    Error::Assertion("Publish on unsubscribed pubsub_topic worked!!!".into())
                }
                other => other,
            })
    }

    /// Publishing the same message twice delivers it once.
    pub async fn check_duplicate_message_is_deduplicated(
        &self,
        message: &Message,
    ) -> Result<(), Error> {
        self.node1
            .send_relay_message(message, &self.pubsub_topic)
            .await?;
        self.node1
            .send_relay_message(message, &self.pubsub_topic)
            .await?;
        delay(PROPAGATION_DELAY).await;
        check_message_reaches(
            std::slice::from_ref(&self.node2),
            message,
            &Fetch::relay(&self.pubsub_topic),
        )
        .await
    }

    /// Publish `count` messages back to back and check the peer received all
    /// of them in publish order.
    pub async fn check_bulk_messages_arrive_in_order(&self, count: usize) -> Result<(), Error> {
        let mut sent = Vec::with_capacity(count);
        for index in 0..count {
            let message = Message::new(format!("{PAYLOAD} {index}"), CONTENT_TOPIC);
            self.node1
                .send_relay_message(&message, &self.pubsub_topic)
                .await?;
            sent.push(message);
        }
        delay(PROPAGATION_DELAY * 5).await;

        let received = fetch(&self.node2, &Fetch::relay(&self.pubsub_topic)).await?;
        check(received.len() == sent.len(), || {
            format!("Expected {} messages but got {}", sent.len(), received.len())
        })?;
        for (sent, received) in sent.iter().zip(&received) {
            assert_received(sent, received)?;
        }
        Ok(())
    }

    pub async fn teardown(mut self) -> Result<(), Error> {
        self.topology.teardown().await
    }
}

/// Relay node flags for a mesh on `pubsub_topic`.
pub fn relay_options(pubsub_topic: &str) -> StartOptions {
    StartOptions::new()
        .flag("relay", "true")
        .flag("discv5-discovery", "true")
        .flag("peer-exchange", "true")
        .flag("pubsub-topic", pubsub_topic)
}

/// Whether `err` means "the message did not get through" rather than a broken
/// harness.
pub fn is_not_relayed(err: &Error) -> bool {
    matches!(err.kind(), ErrorKind::ValidationRejected | ErrorKind::NotFound)
        || NOT_RELAYED.iter().any(|needle| err.mentions(needle))
}
