//! Publishing nodes and the store nodes archiving their messages.
//!
//! Publishing nodes relay (and usually store) messages; store nodes bootstrap
//! from the first publishing node and use it as their store peer. Checks compare
//! what the store returns with what was published: message fields on the v1
//! API, message hashes on v3.

use crate::{
    common::{add_node_peer, check, compute_message_hash, is_enabled, with_defaults, DEFAULT_SHARDS},
    data::VALID_PUBSUB_TOPICS,
    filter::subscription,
    light_push::light_push_payload,
    topology::{Phase, Topology},
};
use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};
use tracing::debug;
use waku_interop_node::{
    assert_received, Error, Flags, Message, Node, StartOptions, StoreQuery, StoreResponse,
    StoreVersion, Variant,
};
use waku_interop_utils::{delay, Retry};

pub const CONTENT_TOPIC: &str = "/myapp/1/latest/proto";
pub const PUBSUB_TOPIC: &str = VALID_PUBSUB_TOPICS[0];
pub const PAYLOAD: &str = "Store works!!";

pub const PROPAGATION_DELAY: Duration = Duration::from_millis(200);

/// How long a published message may take to show up in a store.
pub const STORE_RETRY: Retry = Retry::secs(30, 1000);

/// Most pages a single pagination run follows.
pub const MAX_PAGES: usize = 1000;

/// How a message enters the network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Via {
    #[default]
    Relay,
    LightPush,
}

/// Rewrite `query` the way a go-waku store expects it.
///
/// go-waku requires a content topic, and hash lookups must go through a store
/// peer without any topic filter.
pub fn adjust_query(variant: Variant, mut query: StoreQuery, store_peer: Option<&str>) -> StoreQuery {
    if variant != Variant::GoWaku {
        return query;
    }
    if query.content_topics.is_empty() {
        query.content_topics.push(CONTENT_TOPIC.to_string());
    }
    if !query.hashes.is_empty() {
        query.content_topics.clear();
        query.pubsub_topic = None;
        query.peer_addr = store_peer.map(String::from);
    }
    query
}

/// Follow the cursor from `query` through `fetch` and return every hash, in
/// response order.
///
/// Stops on an empty page or a missing cursor. A cursor the store already
/// handed out, or more than [MAX_PAGES] pages, is an assertion failure.
pub async fn follow_cursor<F, Fut>(mut query: StoreQuery, mut fetch: F) -> Result<Vec<String>, Error>
where
    F: FnMut(StoreQuery) -> Fut,
    Fut: Future<Output = Result<StoreResponse, Error>>,
{
    let mut hashes = Vec::new();
    let mut seen = HashSet::new();
    for _ in 0..MAX_PAGES {
        let response = fetch(query.clone()).await?;
        hashes.extend(response.hashes().into_iter().map(String::from));
        let cursor = match response.cursor() {
            Some(cursor) if !response.is_empty() => cursor.to_string(),
            _ => return Ok(hashes),
        };
        check(seen.insert(cursor.clone()), || {
            format!("Store returned cursor {cursor} twice after {} hashes", hashes.len())
        })?;
        query.cursor = Some(cursor);
    }
    Err(Error::Assertion(format!(
        "Store still had a cursor after {MAX_PAGES} pages"
    )))
}

/// Check the envelope fields every store response carries.
pub fn check_envelope(response: &StoreResponse) -> Result<(), Error> {
    check(response.request_id.is_some(), || "Request id is missing".into())?;
    check(response.status_code.is_some_and(|code| code != 0), || {
        "Status code is missing".into()
    })?;
    check(
        response.status_desc.as_deref().is_some_and(|desc| !desc.is_empty()),
        || "Status desc is missing".into(),
    )
}

/// Store cluster.
#[derive(Debug)]
pub struct Store {
    topology: Topology,
    enr_uri: Option<String>,
    multiaddrs: Vec<String>,
    main_publishing_nodes: Vec<Arc<Node>>,
    publishing_nodes: Vec<Arc<Node>>,
    store_nodes: Vec<Arc<Node>>,
}

impl Store {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            enr_uri: None,
            multiaddrs: Vec::new(),
            main_publishing_nodes: Vec::new(),
            publishing_nodes: Vec::new(),
            store_nodes: Vec::new(),
        }
    }

    /// One publishing node and one relaying store node, both subscribed.
    pub async fn setup(topology: Topology) -> Result<Self, Error> {
        let mut store = Self::new(topology);
        store
            .setup_first_publishing_node(StartOptions::new())
            .await?;
        store.setup_first_store_node(StartOptions::new()).await?;
        store.subscribe_to_pubsub_topics_via_relay(None, None).await?;
        store.topology.advance(Phase::Ready)?;
        Ok(store)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn publishing_node(&self, index: usize) -> Result<&Arc<Node>, Error> {
        self.publishing_nodes
            .get(index)
            .ok_or_else(|| Error::Fixture(format!("publishing node {} is not started", index + 1)))
    }

    /// Every node that stores messages, in start order.
    pub fn store_nodes(&self) -> &[Arc<Node>] {
        &self.store_nodes
    }

    pub fn main_publishing_nodes(&self) -> &[Arc<Node>] {
        &self.main_publishing_nodes
    }

    /// Multiaddrs of the publishing nodes, in start order.
    pub fn multiaddrs(&self) -> &[String] {
        &self.multiaddrs
    }

    fn publishing_defaults() -> Flags {
        Flags::new()
            .with("store", "true")
            .with("relay", "true")
            .with("pubsub-topic", PUBSUB_TOPIC)
    }

    async fn start_publishing_node(
        &mut self,
        image: &str,
        index: usize,
        options: StartOptions,
    ) -> Result<Arc<Node>, Error> {
        let options = with_defaults(Self::publishing_defaults(), options);
        let relay = is_enabled(&options, "relay");
        let store = is_enabled(&options, "store");
        let node = self
            .topology
            .start(image, &format!("publishing_node{index}"), options)
            .await?;
        if relay {
            self.main_publishing_nodes.push(node.clone());
        }
        if store {
            self.store_nodes.push(node.clone());
        }
        add_node_peer(&node, &self.multiaddrs, &DEFAULT_SHARDS).await?;
        self.multiaddrs.push(node.multiaddr_with_id()?);
        self.publishing_nodes.push(node.clone());
        Ok(node)
    }

    async fn setup_store_node(
        &mut self,
        image: &str,
        index: usize,
        options: StartOptions,
    ) -> Result<Arc<Node>, Error> {
        let (Some(enr_uri), Some(store_peer)) = (&self.enr_uri, self.multiaddrs.first()) else {
            return Err(Error::Fixture(
                "start a publishing node before a store node".into(),
            ));
        };
        let defaults = Flags::new()
            .with("store", "true")
            .with("relay", "true")
            .with("pubsub-topic", PUBSUB_TOPIC)
            .with("discv5-bootstrap-node", enr_uri)
            .with("storenode", store_peer);
        let options = with_defaults(defaults, options);
        let relay = is_enabled(&options, "relay");
        let node = self
            .topology
            .start(image, &format!("store_node{index}"), options)
            .await?;
        if relay {
            self.main_publishing_nodes.push(node.clone());
        }
        self.store_nodes.push(node.clone());
        add_node_peer(&node, &self.multiaddrs, &DEFAULT_SHARDS).await?;
        Ok(node)
    }

    /// First publishing node. Its ENR and multiaddr bootstrap every store node.
    pub async fn setup_first_publishing_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let image = self.topology.config().node_1.clone();
        let node = self.start_publishing_node(&image, 1, options).await?;
        self.enr_uri = Some(node.enr_uri()?);
        Ok(node)
    }

    pub async fn setup_second_publishing_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let image = self.topology.config().node_1.clone();
        self.start_publishing_node(&image, 2, options).await
    }

    pub async fn setup_additional_publishing_nodes(&mut self, images: &[String]) -> Result<(), Error> {
        if images.is_empty() {
            return Err(Error::Fixture(
                "ADDITIONAL_NODES/node_list is empty, cannot run test".into(),
            ));
        }
        for (index, image) in images.iter().enumerate() {
            self.start_publishing_node(image, index + 2, StartOptions::new())
                .await?;
        }
        Ok(())
    }

    pub async fn setup_first_store_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let image = self.topology.config().node_2.clone();
        self.setup_store_node(&image, 1, options).await
    }

    /// Second store node. It does not relay unless `options` says so.
    pub async fn setup_second_store_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let image = self.topology.config().node_2.clone();
        let options = with_defaults(Flags::new().with("relay", "false"), options);
        self.setup_store_node(&image, 2, options).await
    }

    pub async fn setup_additional_store_nodes(&mut self, images: &[String]) -> Result<Vec<Arc<Node>>, Error> {
        if images.is_empty() {
            return Err(Error::Fixture(
                "ADDITIONAL_NODES/node_list is empty, cannot run test".into(),
            ));
        }
        let mut started = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            let options = StartOptions::new().flag("relay", "false");
            started.push(self.setup_store_node(image, index + 2, options).await?);
        }
        Ok(started)
    }

    /// Subscribe `node` (or every relaying node) to `pubsub_topics`.
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
                for node in &self.main_publishing_nodes {
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

    /// Publish `message` (or a fresh one) from `sender` (or the first
    /// publishing node), wait for it to propagate and return it.
    pub async fn publish_message(
        &self,
        via: Via,
        pubsub_topic: Option<&str>,
        message: Option<Message>,
        sender: Option<&Node>,
    ) -> Result<Message, Error> {
        let message = message.unwrap_or_else(|| self.create_message());
        let pubsub_topic = pubsub_topic.unwrap_or(PUBSUB_TOPIC);
        let sender: &Node = match sender {
            Some(sender) => sender,
            None => self.publishing_node(0)?.as_ref(),
        };
        match via {
            Via::Relay => {
                debug!("relaying message");
                sender.send_relay_message(&message, pubsub_topic).await?;
            }
            Via::LightPush => {
                let payload = light_push_payload(pubsub_topic, &message)?;
                sender.send_light_push_message(&payload).await?;
            }
        }
        delay(PROPAGATION_DELAY).await;
        Ok(message)
    }

    /// Query `node`, defaulting the pubsub topic, and check the envelope.
    pub async fn get_messages_from_store(
        &self,
        node: &Node,
        query: StoreQuery,
    ) -> Result<StoreResponse, Error> {
        let query = self.prepare_query(node, query);
        let response = node.get_store_messages(&query).await?;
        check_envelope(&response)?;
        Ok(response)
    }

    fn prepare_query(&self, node: &Node, mut query: StoreQuery) -> StoreQuery {
        if query.pubsub_topic.is_none() {
            query.pubsub_topic = Some(PUBSUB_TOPIC.to_string());
        }
        adjust_query(
            node.variant(),
            query,
            self.multiaddrs.first().map(String::as_str),
        )
    }

    pub async fn get_messages_from_store_with_retry(&self, node: &Node) -> Result<StoreResponse, Error> {
        STORE_RETRY
            .run(|| {
                self.get_messages_from_store(node, StoreQuery::new().page_size(5).ascending(true))
            })
            .await
    }

    /// Check every store node (or `store_nodes`) returns `messages`.
    ///
    /// A single message is compared with the newest entry; several messages
    /// with the entries at the same positions.
    pub async fn check_published_message_is_stored(
        &self,
        store_nodes: Option<&[Arc<Node>]>,
        query: StoreQuery,
        messages: &[Message],
    ) -> Result<StoreResponse, Error> {
        let nodes = store_nodes.unwrap_or(&self.store_nodes);
        check(!nodes.is_empty(), || "no store node to check".into())?;
        let pubsub_topic = query
            .pubsub_topic
            .clone()
            .unwrap_or_else(|| PUBSUB_TOPIC.to_string());
        let mut last = StoreResponse::default();
        for node in nodes {
            debug!(image = node.image(), "checking that peer can find the stored messages");
            let response = self.get_messages_from_store(node, query.clone()).await?;
            check(!response.is_empty(), || {
                format!(
                    "Peer {} couldn't find any messages. Actual response: {response:?}",
                    node.image()
                )
            })?;
            check(response.len() >= messages.len(), || {
                format!(
                    "Expected at least {} messages but got {}",
                    messages.len(),
                    response.len()
                )
            })?;
            let indices: Vec<usize> = if messages.len() == 1 {
                vec![response.len() - 1]
            } else {
                (0..messages.len()).collect()
            };
            for (index, message) in indices.into_iter().zip(messages) {
                match query.version {
                    StoreVersion::V1 => {
                        let stored = response.message_at(index).ok_or_else(|| {
                            Error::Assertion(format!("no message at index {index}"))
                        })?;
                        assert_received(message, stored)?;
                    }
                    StoreVersion::V3 => {
                        let expected =
                            compute_message_hash(&pubsub_topic, message, node.hash_encoding())?;
                        let actual = response.message_hash(index);
                        check(actual == Some(expected.as_str()), || {
                            format!(
                                "Message hash at index {index} returned by store doesn't match the computed message hash {expected}. Actual hash: {actual:?}"
                            )
                        })?;
                    }
                }
            }
            last = response;
        }
        Ok(last)
    }

    /// Check no store node holds anything on `pubsub_topic`.
    pub async fn check_store_returns_empty_response(&self, pubsub_topic: Option<&str>) -> Result<(), Error> {
        let query = StoreQuery::new()
            .pubsub_topic(pubsub_topic.unwrap_or(PUBSUB_TOPIC))
            .page_size(5)
            .ascending(true);
        for node in &self.store_nodes {
            let response = self.get_messages_from_store(node, query.clone()).await?;
            check(response.is_empty(), || {
                format!(
                    "Peer {} returned {} messages, expected none",
                    node.image(),
                    response.len()
                )
            })?;
        }
        Ok(())
    }

    /// Status and body of a query, with transport failures reported as 500.
    pub async fn get_store_messages_with_errors(&self, node: &Node, query: StoreQuery) -> (u16, String) {
        match node.get_store_messages_raw(&query).await {
            Ok((status, body)) => (status.as_u16(), body),
            Err(err) => (500, err.to_string()),
        }
    }

    /// Follow the cursor from `query` until the store runs out and return every
    /// hash, in response order.
    pub async fn paginate_all(&self, node: &Node, query: StoreQuery) -> Result<Vec<String>, Error> {
        let hashes = follow_cursor(query, |query| self.get_messages_from_store(node, query)).await?;
        debug!(image = node.image(), count = hashes.len(), "paginated store");
        Ok(hashes)
    }

    pub async fn teardown(mut self) -> Result<(), Error> {
        self.topology.teardown().await
    }
}
