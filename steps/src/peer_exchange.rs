//! A requester node discovering the mesh through a peer exchange responder.

use crate::{
    common::{add_node_peer, with_defaults, DEFAULT_SHARDS},
    topology::Topology,
};
use std::sync::Arc;
use tracing::debug;
use waku_interop_node::{Error, Flags, Node, StartOptions};

/// Two bootstrapped relay nodes and a peer exchange requester.
#[derive(Debug)]
pub struct PeerExchange {
    topology: Topology,
    enr_uri: Option<String>,
    multiaddr: Option<String>,
    main_nodes: Vec<Arc<Node>>,
}

impl PeerExchange {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            enr_uri: None,
            multiaddr: None,
            main_nodes: Vec::new(),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn main_nodes(&self) -> &[Arc<Node>] {
        &self.main_nodes
    }

    pub fn node(&self, index: usize) -> Result<&Arc<Node>, Error> {
        self.main_nodes
            .get(index)
            .ok_or_else(|| Error::Fixture(format!("node {} is not started", index + 1)))
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

    pub async fn setup_second_relay_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let (Some(enr_uri), Some(multiaddr)) = (self.enr_uri.clone(), self.multiaddr.clone()) else {
            return Err(Error::Fixture("start the first relay node first".into()));
        };
        let image = self.topology.config().node_2.clone();
        let defaults = Flags::new()
            .with("relay", "true")
            .with("discv5-bootstrap-node", enr_uri);
        let node = self
            .topology
            .start(&image, "node2", with_defaults(defaults, options))
            .await?;
        add_node_peer(&node, &[multiaddr], &DEFAULT_SHARDS).await?;
        self.main_nodes.push(node.clone());
        Ok(node)
    }

    /// Multiaddr of the first peer the first node knows, to use as responder.
    pub async fn responder_multiaddr(&self) -> Result<String, Error> {
        let node = self.node(0)?;
        let peers = node.get_peers().await?;
        let peer = peers
            .first()
            .ok_or_else(|| Error::Assertion(format!("{} has no peers", node.image())))?;
        node.flavor().peer_multiaddr(peer).ok_or_else(|| {
            Error::UnexpectedResponse(format!("peer entry without a multiaddr: {peer}"))
        })
    }

    /// Third node, asking `responder` for peers and connected to the first node.
    pub async fn setup_peer_exchange_requester_node(
        &mut self,
        responder: &str,
        options: StartOptions,
    ) -> Result<Arc<Node>, Error> {
        let Some(multiaddr) = self.multiaddr.clone() else {
            return Err(Error::Fixture("start the first relay node first".into()));
        };
        let image = self.topology.config().node_2.clone();
        let defaults = Flags::new()
            .with("relay", "true")
            .with("peer-exchange-node", responder);
        debug!(responder, "starting peer exchange requester");
        let node = self
            .topology
            .start(&image, "node3", with_defaults(defaults, options))
            .await?;
        add_node_peer(&node, &[multiaddr], &DEFAULT_SHARDS).await?;
        self.main_nodes.push(node.clone());
        Ok(node)
    }

    pub async fn teardown(mut self) -> Result<(), Error> {
        self.topology.teardown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waku_interop_node::Config;

    #[tokio::test]
    async fn test_requester_needs_a_mesh() {
        let mut exchange = PeerExchange::new(Topology::new(Config::default()));
        let err = exchange
            .setup_peer_exchange_requester_node("/ip4/1.2.3.4/tcp/1/p2p/x", StartOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fixture(_)));
        assert!(matches!(
            exchange.responder_multiaddr().await,
            Err(Error::Fixture(_))
        ));
    }
}
