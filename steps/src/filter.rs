//! A relay node serving filter subscriptions to light clients.
//!
//! The first node relays and runs the filter service. Every other node is a
//! filter client pointed at it: the main client (node 2) plus any optional
//! clients started from the additional images.

use crate::{
    common::{add_node_peer, check, check_message_reaches, Fetch, DEFAULT_SHARDS},
    data::VALID_PUBSUB_TOPICS,
    topology::{Phase, Topology},
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use uuid::Uuid;
use waku_interop_node::{
    api::FilterResponse, Error, Message, Node, StartOptions, Variant,
};
use waku_interop_utils::{delay, Retry};

pub const PUBSUB_TOPIC: &str = VALID_PUBSUB_TOPICS[1];
pub const SECOND_PUBSUB_TOPIC: &str = VALID_PUBSUB_TOPICS[2];
pub const ANOTHER_CLUSTER_PUBSUB_TOPIC: &str = "/waku/2/rs/2/2";
pub const CONTENT_TOPIC: &str = "/test/1/waku-filter/proto";
pub const SECOND_CONTENT_TOPIC: &str = "/test/2/waku-filter/proto";
pub const PAYLOAD: &str = "Filter works!!";

/// How long the service may take to answer pings after start.
pub const WARM_UP: Retry = Retry::secs(20, 1000);

/// How long a subscription may take to be accepted.
pub const SUBSCRIBE_RETRY: Retry = Retry::secs(60, 1000);

pub const PROPAGATION_DELAY: Duration = Duration::from_millis(100);

/// Body of a filter subscription request.
pub fn subscription(request_id: &str, content_topics: &[&str], pubsub_topic: &str) -> Value {
    json!({
        "requestId": request_id,
        "contentFilters": content_topics,
        "pubsubTopic": pubsub_topic,
    })
}

/// Filter service node and its clients.
#[derive(Debug)]
pub struct Filter {
    topology: Topology,
    relay_node: Option<Arc<Node>>,
    enr_uri: String,
    multiaddr: String,
    main_nodes: Vec<Arc<Node>>,
    optional_nodes: Vec<Arc<Node>>,
}

impl Filter {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            relay_node: None,
            enr_uri: String::new(),
            multiaddr: String::new(),
            main_nodes: Vec::new(),
            optional_nodes: Vec::new(),
        }
    }

    /// Service node plus one client, subscribed to [CONTENT_TOPIC] and warmed up.
    pub async fn setup(topology: Topology) -> Result<Self, Error> {
        let image1 = topology.config().node_1.clone();
        let image2 = topology.config().node_2.clone();
        let mut filter = Self::new(topology);
        filter.relay_node_start(&image1).await?;
        filter.setup_main_filter_node(&image2).await?;
        filter
            .wait_for_subscriptions_on_main_nodes(&[CONTENT_TOPIC], None)
            .await?;
        filter.topology.advance(Phase::Subscribed)?;
        filter.filter_warm_up().await?;
        filter.topology.advance(Phase::Ready)?;
        Ok(filter)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The relay node serving filter requests.
    pub fn relay_node(&self) -> Result<&Arc<Node>, Error> {
        self.relay_node
            .as_ref()
            .ok_or_else(|| Error::Fixture("relay node is not started".into()))
    }

    /// The main filter client.
    pub fn filter_node(&self) -> Result<&Arc<Node>, Error> {
        self.main_nodes
            .first()
            .ok_or_else(|| Error::Fixture("filter node is not started".into()))
    }

    pub fn optional_nodes(&self) -> &[Arc<Node>] {
        &self.optional_nodes
    }

    fn target<'a>(&'a self, node: Option<&'a Node>) -> Result<&'a Node, Error> {
        match node {
            Some(node) => Ok(node),
            None => self.filter_node().map(|node| &**node),
        }
    }

    /// Start the filter service node from `image`.
    pub async fn relay_node_start(&mut self, image: &str) -> Result<Arc<Node>, Error> {
        let mut options = StartOptions::new()
            .flag("relay", "true")
            .flag("filter", "true")
            .flag("pubsub-topic", PUBSUB_TOPIC);
        if Variant::from_image(image)? == Variant::GoWaku {
            options = options.flag("min-relay-peers-to-publish", "0");
        }
        let node = self.topology.start(image, "node1", options).await?;
        self.enr_uri = node.enr_uri()?;
        self.multiaddr = node.multiaddr_with_id()?;
        self.relay_node = Some(node.clone());
        Ok(node)
    }

    fn client_options(&self) -> StartOptions {
        StartOptions::new()
            .flag("relay", "false")
            .flag("pubsub-topic", PUBSUB_TOPIC)
            .flag("discv5-bootstrap-node", &self.enr_uri)
            .flag("filternode", &self.multiaddr)
    }

    async fn start_client(&mut self, image: &str, role: &str) -> Result<Arc<Node>, Error> {
        if self.relay_node.is_none() {
            return Err(Error::Fixture("start the relay node first".into()));
        }
        let node = self
            .topology
            .start(image, role, self.client_options())
            .await?;
        add_node_peer(&node, std::slice::from_ref(&self.multiaddr), &DEFAULT_SHARDS).await?;
        Ok(node)
    }

    /// Start the main filter client from `image`.
    pub async fn setup_main_filter_node(&mut self, image: &str) -> Result<Arc<Node>, Error> {
        let node = self.start_client(image, "node2").await?;
        self.main_nodes.push(node.clone());
        Ok(node)
    }

    /// Start one filter client per image.
    pub async fn setup_optional_filter_nodes(&mut self, images: &[String]) -> Result<(), Error> {
        if images.is_empty() {
            return Err(Error::Fixture(
                "ADDITIONAL_NODES/node_list is empty, cannot run test".into(),
            ));
        }
        for (index, image) in images.iter().enumerate() {
            let node = self.start_client(image, &format!("node{}", index + 3)).await?;
            self.optional_nodes.push(node);
        }
        Ok(())
    }

    /// Ping until the service answers, or reports there is nothing to ping yet.
    pub async fn filter_warm_up(&mut self) -> Result<(), Error> {
        WARM_UP
            .run(|| async {
                match self.ping_filter_subscriptions("1", None).await {
                    Ok(()) => Ok(()),
                    Err(err) if err.mentions("peer has no subscriptions") => Ok(()),
                    Err(err) => Err(Error::Assertion(format!("WARM UP FAILED WITH: {err}"))),
                }
            })
            .await?;
        self.topology.advance(Phase::WarmedUp)?;
        info!("filter service is warmed up");
        Ok(())
    }

    pub fn create_message(&self) -> Message {
        Message::new(PAYLOAD, CONTENT_TOPIC)
    }

    /// Subscribe the relay node to `pubsub_topic` and the main client to
    /// `content_topics` on it.
    pub async fn wait_for_subscriptions_on_main_nodes(
        &self,
        content_topics: &[&str],
        pubsub_topic: Option<&str>,
    ) -> Result<(), Error> {
        let pubsub_topic = pubsub_topic.unwrap_or(PUBSUB_TOPIC);
        self.relay_node()?
            .set_relay_subscriptions(&[pubsub_topic])
            .await?;
        let request_id = Uuid::new_v4().to_string();
        let response = self
            .create_filter_subscription_with_retry(
                &subscription(&request_id, content_topics, pubsub_topic),
                None,
            )
            .await?;
        check_response(&response, &request_id, None)
    }

    pub async fn subscribe_optional_filter_nodes(
        &self,
        content_topics: &[&str],
        pubsub_topic: Option<&str>,
    ) -> Result<(), Error> {
        let pubsub_topic = pubsub_topic.unwrap_or(PUBSUB_TOPIC);
        for node in &self.optional_nodes {
            let request_id = Uuid::new_v4().to_string();
            self.create_filter_subscription_with_retry(
                &subscription(&request_id, content_topics, pubsub_topic),
                Some(node.as_ref()),
            )
            .await?;
        }
        Ok(())
    }

    pub async fn create_filter_subscription(
        &self,
        body: &Value,
        node: Option<&Node>,
    ) -> Result<FilterResponse, Error> {
        self.target(node)?.set_filter_subscriptions(body).await
    }

    pub async fn create_filter_subscription_with_retry(
        &self,
        body: &Value,
        node: Option<&Node>,
    ) -> Result<FilterResponse, Error> {
        SUBSCRIBE_RETRY
            .run(|| self.create_filter_subscription(body, node))
            .await
    }

    /// Update a subscription. Only nwaku has the endpoint.
    pub async fn update_filter_subscription(
        &self,
        body: &Value,
        node: Option<&Node>,
    ) -> Result<FilterResponse, Error> {
        self.target(node)?.update_filter_subscriptions(body).await
    }

    /// Delete a subscription and check the reply.
    ///
    /// Without `status` the node must answer `OK`; otherwise its status
    /// description must contain `status`.
    pub async fn delete_filter_subscription(
        &self,
        body: &Value,
        status: Option<&str>,
        node: Option<&Node>,
    ) -> Result<(), Error> {
        let node = self.target(node)?;
        let response = node.delete_filter_subscriptions(body).await?;
        let request_id = body.get("requestId").and_then(Value::as_str);
        let expected = match request_id {
            Some(request_id) => request_id,
            // go-waku answers an empty id when none was sent
            None if node.variant() == Variant::GoWaku => "",
            None => return Err(Error::MissingParameter("requestId")),
        };
        check_response(&response, expected, status)
    }

    pub async fn delete_all_filter_subscriptions(
        &self,
        body: &Value,
        node: Option<&Node>,
    ) -> Result<(), Error> {
        let response = self
            .target(node)?
            .delete_all_filter_subscriptions(body)
            .await?;
        let request_id = body
            .get("requestId")
            .and_then(Value::as_str)
            .ok_or(Error::MissingParameter("requestId"))?;
        check_response(&response, request_id, None)
    }

    pub async fn ping_filter_subscriptions(
        &self,
        request_id: &str,
        node: Option<&Node>,
    ) -> Result<(), Error> {
        let response = self
            .target(node)?
            .ping_filter_subscriptions(request_id)
            .await?;
        check_response(&response, request_id, None)
    }

    /// A ping without subscriptions must be refused.
    pub async fn ping_without_filter_subscription(&self, node: Option<&Node>) -> Result<(), Error> {
        let request_id = Uuid::new_v4().to_string();
        match self.ping_filter_subscriptions(&request_id, node).await {
            Ok(()) => Err(Error::Assertion(
                "Ping without any subscription worked".into(),
            )),
            Err(err)
                if err.mentions("peer has no subscription") || err.mentions("ping request failed") =>
            {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn add_new_relay_subscription(&self, pubsub_topics: &[&str]) -> Result<(), Error> {
        self.relay_node()?
            .set_relay_subscriptions(pubsub_topics)
            .await?;
        Ok(())
    }

    pub async fn get_filter_messages(
        &self,
        content_topic: &str,
        pubsub_topic: Option<&str>,
        node: Option<&Node>,
    ) -> Result<Vec<Message>, Error> {
        self.target(node)?
            .get_filter_messages(content_topic, pubsub_topic)
            .await
    }

    /// Publish from the relay node and check every client received `message`.
    pub async fn check_published_message_reaches_filter_peer(
        &self,
        message: &Message,
        pubsub_topic: Option<&str>,
    ) -> Result<(), Error> {
        let peers: Vec<_> = self
            .main_nodes
            .iter()
            .chain(&self.optional_nodes)
            .cloned()
            .collect();
        self.check_published_message_reaches_filter_peers(
            message,
            pubsub_topic,
            self.relay_node()?,
            &peers,
        )
        .await
    }

    pub async fn check_published_message_reaches_filter_peers(
        &self,
        message: &Message,
        pubsub_topic: Option<&str>,
        sender: &Node,
        peers: &[Arc<Node>],
    ) -> Result<(), Error> {
        let pubsub_topic = pubsub_topic.unwrap_or(PUBSUB_TOPIC);
        sender.send_relay_message(message, pubsub_topic).await?;
        delay(PROPAGATION_DELAY).await;
        check_message_reaches(
            peers,
            message,
            &Fetch::filter(&message.content_topic, Some(pubsub_topic)),
        )
        .await
    }

    /// Poll until every client has `message`, already published.
    pub async fn wait_for_published_message_to_reach_filter_peer(
        &self,
        message: &Message,
        pubsub_topic: Option<&str>,
        policy: Retry,
    ) -> Result<(), Error> {
        let source = Fetch::filter(
            &message.content_topic,
            Some(pubsub_topic.unwrap_or(PUBSUB_TOPIC)),
        );
        policy
            .run(|| check_message_reaches(&self.main_nodes, message, &source))
            .await
    }

    /// Publishing without a matching subscription must not reach any client.
    pub async fn check_publish_without_filter_subscription(
        &self,
        message: &Message,
        pubsub_topic: Option<&str>,
    ) -> Result<(), Error> {
        match self
            .check_published_message_reaches_filter_peer(message, pubsub_topic)
            .await
        {
            Ok(()) => Err(Error::Assertion(
                "Publish with no subscription worked!!!".into(),
            )),
            Err(err)
                if err.mentions("Bad Request")
                    || err.mentions("Not Found")
                    || err.mentions("couldn't find any messages") =>
            {
                debug!(%err, "message was not delivered");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn teardown(mut self) -> Result<(), Error> {
        self.topology.teardown().await
    }
}

/// Check a filter reply echoes `request_id` and reports `status` (or `OK`).
pub fn check_response(
    response: &FilterResponse,
    request_id: &str,
    status: Option<&str>,
) -> Result<(), Error> {
    check(response.request_id == request_id, || {
        format!(
            "Expected requestId {request_id} but got {}",
            response.request_id
        )
    })?;
    let description = response.status_desc.as_deref().unwrap_or_default();
    match status {
        None => check(response.is_ok(), || {
            format!("Expected statusDesc OK but got {description}")
        }),
        Some(status) => check(description.contains(status), || {
            format!("Expected statusDesc containing {status} but got {description}")
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waku_interop_node::Config;

    fn response(request_id: &str, status_desc: &str) -> FilterResponse {
        FilterResponse {
            request_id: request_id.into(),
            status_code: Some(200),
            status_desc: Some(status_desc.into()),
        }
    }

    #[test]
    fn test_subscription_body() {
        assert_eq!(
            subscription("1", &[CONTENT_TOPIC, SECOND_CONTENT_TOPIC], PUBSUB_TOPIC),
            json!({
                "requestId": "1",
                "contentFilters": ["/test/1/waku-filter/proto", "/test/2/waku-filter/proto"],
                "pubsubTopic": "/waku/2/rs/3/1",
            })
        );
    }

    #[test]
    fn test_check_response() {
        assert!(check_response(&response("1", "OK"), "1", None).is_ok());
        assert!(check_response(&response("2", "OK"), "1", None)
            .unwrap_err()
            .mentions("Expected requestId 1"));
        assert!(check_response(&response("1", "peer has no subscriptions"), "1", None).is_err());
        assert!(check_response(
            &response("1", "peer has no subscriptions"),
            "1",
            Some("no subscriptions")
        )
        .is_ok());
    }

    #[tokio::test]
    async fn test_clients_need_a_service_node() {
        let mut filter = Filter::new(Topology::new(Config::default()));
        assert!(matches!(filter.relay_node(), Err(Error::Fixture(_))));
        assert!(matches!(filter.filter_node(), Err(Error::Fixture(_))));

        let image = filter.topology().config().node_2.clone();
        let err = filter.setup_main_filter_node(&image).await.unwrap_err();
        assert!(matches!(err, Error::Fixture(_)));
        let err = filter.setup_optional_filter_nodes(&[]).await.unwrap_err();
        assert!(err.mentions("ADDITIONAL_NODES"));
    }
}
