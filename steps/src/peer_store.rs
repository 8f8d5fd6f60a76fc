//! Relay nodes bootstrapped from one node, for peer store inspection.

use crate::{
    common::{add_node_peer, check, with_defaults, DEFAULT_SHARDS},
    topology::Topology,
};
use std::{collections::BTreeSet, sync::Arc};
use tracing::debug;
use waku_interop_node::{Error, Flags, Node, StartOptions};

/// Peer id at the end of a `/.../p2p/<id>` multiaddr.
pub fn multiaddr_peer_id(multiaddr: &str) -> &str {
    multiaddr.rsplit('/').next().unwrap_or(multiaddr)
}

/// Peer ids `node` currently knows.
pub async fn peer_ids(node: &Node) -> Result<Vec<String>, Error> {
    Ok(node
        .get_peer_multiaddrs()
        .await?
        .iter()
        .map(|multiaddr| multiaddr_peer_id(multiaddr).to_string())
        .collect())
}

/// Relay nodes sharing the first node as bootstrap and relay peer.
#[derive(Debug)]
pub struct PeerStore {
    topology: Topology,
    enr_uri: Option<String>,
    multiaddr: Option<String>,
    main_nodes: Vec<Arc<Node>>,
    optional_nodes: Vec<Arc<Node>>,
}

impl PeerStore {
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

    /// Main nodes followed by optional ones.
    pub fn all_nodes(&self) -> Vec<Arc<Node>> {
        self.main_nodes
            .iter()
            .chain(&self.optional_nodes)
            .cloned()
            .collect()
    }

    pub async fn setup_first_relay_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let image = self.topology.config().node_1.clone();
        let nodekey = self.topology.config().nodekey.clone();
        let defaults = Flags::new().with("relay", "true").with("nodekey", nodekey);
        let node = self
            .topology
            .start(&image, "node1", with_defaults(defaults, options))
            .await?;
        self.enr_uri = Some(node.enr_uri()?);
        self.multiaddr = Some(node.multiaddr_with_id()?);
        self.main_nodes.push(node.clone());
        Ok(node)
    }

    async fn start_bootstrapped(
        &mut self,
        image: &str,
        role: &str,
        options: StartOptions,
    ) -> Result<Arc<Node>, Error> {
        let (Some(enr_uri), Some(multiaddr)) = (self.enr_uri.clone(), self.multiaddr.clone()) else {
            return Err(Error::Fixture("start the first relay node first".into()));
        };
        let defaults = Flags::new()
            .with("relay", "true")
            .with("discv5-bootstrap-node", enr_uri);
        let node = self
            .topology
            .start(image, role, with_defaults(defaults, options))
            .await?;
        add_node_peer(&node, &[multiaddr], &DEFAULT_SHARDS).await?;
        Ok(node)
    }

    pub async fn setup_second_relay_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let image = self.topology.config().node_2.clone();
        let node = self.start_bootstrapped(&image, "node2", options).await?;
        self.main_nodes.push(node.clone());
        Ok(node)
    }

    pub async fn setup_third_relay_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let image = self.topology.config().node_1.clone();
        let node = self.start_bootstrapped(&image, "node3", options).await?;
        self.main_nodes.push(node.clone());
        Ok(node)
    }

    pub async fn setup_main_relay_nodes(&mut self) -> Result<(), Error> {
        self.setup_first_relay_node(StartOptions::new()).await?;
        self.setup_second_relay_node(StartOptions::new()).await?;
        Ok(())
    }

    /// Start the configured additional images, bootstrapped from the first node.
    pub async fn setup_optional_relay_nodes(&mut self) -> Result<(), Error> {
        let images = self.topology.config().additional_nodes.clone();
        if images.is_empty() {
            return Err(Error::Fixture(
                "ADDITIONAL_NODES is empty, cannot run test".into(),
            ));
        }
        for (index, image) in images.iter().enumerate() {
            let role = format!("node{}", index + 3);
            let node = self
                .start_bootstrapped(image, &role, StartOptions::new())
                .await?;
            self.optional_nodes.push(node);
        }
        Ok(())
    }

    /// Check the first node knows every other node and the rest know at least one.
    pub async fn check_peer_stores_are_populated(&self) -> Result<(), Error> {
        let nodes = self.all_nodes();
        for (index, node) in nodes.iter().enumerate() {
            let peers = peer_ids(node).await?;
            debug!(image = node.image(), peers = peers.len(), "peer store");
            let expected = if index == 0 { nodes.len() - 1 } else { 1 };
            check(peers.len() >= expected, || {
                format!(
                    "Some nodes missing in the peer store of Node ID {}",
                    node.id().unwrap_or_default()
                )
            })?;
        }
        Ok(())
    }

    /// Distinct multiaddrs known to `nodes`.
    pub async fn collect_peer_multiaddrs(nodes: &[Arc<Node>]) -> Result<BTreeSet<String>, Error> {
        let mut multiaddrs = BTreeSet::new();
        for node in nodes {
            multiaddrs.extend(node.get_peer_multiaddrs().await?);
        }
        Ok(multiaddrs)
    }

    /// Add every multiaddr in `peers` to `node`, skipping its own.
    pub async fn add_peers_excluding_self(node: &Node, peers: &BTreeSet<String>) -> Result<(), Error> {
        let own_id = node.id()?;
        for peer in peers {
            if multiaddr_peer_id(peer) == own_id {
                continue;
            }
            node.add_peer(peer, &[0]).await?;
        }
        Ok(())
    }

    pub async fn teardown(mut self) -> Result<(), Error> {
        self.topology.teardown().await
    }
}
