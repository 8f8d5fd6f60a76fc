//! nwaku relay nodes with rate-limiting nullifier (RLN) membership.
//!
//! Each node needs its own registered credential. Registration runs a one-shot
//! container that writes `keystore_<id>/keystore.json` under the RLN directory;
//! relay nodes mount that keystore when they start.

use crate::{
    common::with_defaults,
    data::PUBSUB_TOPICS_RLN,
    topology::{Phase, Topology},
};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use waku_interop_node::{
    config::DEFAULT_NWAKU, rln, Config, Error, Flags, Message, Node, RlnRequest, StartOptions,
    Variant,
};

pub const PUBSUB_TOPIC: &str = PUBSUB_TOPICS_RLN[0];
pub const CONTENT_TOPIC: &str = "/test/1/waku-rln-relay/proto";
pub const PAYLOAD: &str = "RLN relay works!!";

/// Membership index every test node uses.
pub const MEMBERSHIP_INDEX: &str = "1";

/// The configured credentials, or a fixture error when RLN is not set up.
pub fn credentials(config: &Config) -> Result<&str, Error> {
    config
        .rln_credentials
        .as_deref()
        .filter(|source| !source.trim().is_empty())
        .ok_or_else(|| Error::Fixture("RLN_CREDENTIALS is not set, cannot run test".into()))
}

/// RLN relay pair.
#[derive(Debug)]
pub struct RlnRelay {
    topology: Topology,
    enr_uri: Option<String>,
    multiaddr: Option<String>,
    main_nodes: Vec<Arc<Node>>,
}

impl RlnRelay {
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

    fn request(&self, id: &str) -> Result<RlnRequest, Error> {
        Ok(RlnRequest::new(credentials(self.topology.config())?, id))
    }

    /// Throwaway node registering credential `id`. It logs under its own role
    /// so the relay node started later does not overwrite its log.
    fn registration_node(&self, id: &str) -> Result<Arc<Node>, Error> {
        self.topology.node(DEFAULT_NWAKU, &format!("register{id}"))
    }

    /// Register credential `id` with a throwaway node.
    pub async fn register_rln_single_node(&self, source: &str, id: &str) -> Result<(), Error> {
        debug!(id, "registering rln credentials for single node");
        self.registration_node(id)?
            .register_rln(&RlnRequest::new(source, id))
            .await
    }

    /// Register credentials "1" and "2" for the two relay nodes.
    pub async fn register_main_rln_relay_nodes(&self) -> Result<(), Error> {
        for id in ["1", "2"] {
            let request = self.request(id)?;
            self.registration_node(id)?.register_rln(&request).await?;
        }
        Ok(())
    }

    /// Wait for the keystore of credential `id` to exist.
    pub async fn check_rln_registration(&self, id: &str) -> Result<(), Error> {
        let path = rln::keystore_path(&self.topology.config().rln_dir, id);
        rln::wait_for_keystore(&path).await.inspect_err(|err| {
            tracing::error!(path = ?path, %err, "credentials not available");
        })
    }

    fn relay_defaults(&self, id: &str) -> Result<StartOptions, Error> {
        Ok(StartOptions::new()
            .rln(self.request(id)?)
            .flag("relay", "true")
            .flag("pubsub-topic", PUBSUB_TOPIC)
            .flag("rln-relay-membership-index", MEMBERSHIP_INDEX))
    }

    fn merge(defaults: StartOptions, options: StartOptions) -> StartOptions {
        let rln = defaults.rln.clone();
        let mut merged = with_defaults(defaults.flags, options);
        if merged.rln.is_none() {
            merged.rln = rln;
        }
        merged
    }

    pub async fn setup_first_rln_relay_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let nodekey = self.topology.config().nodekey.clone();
        let defaults = self.relay_defaults("1")?.flag("nodekey", nodekey);
        let node = self
            .topology
            .start(DEFAULT_NWAKU, "node1", Self::merge(defaults, options))
            .await?;
        self.enr_uri = Some(node.enr_uri()?);
        self.multiaddr = Some(node.multiaddr_with_id()?);
        self.main_nodes.push(node.clone());
        Ok(node)
    }

    pub async fn setup_second_rln_relay_node(&mut self, options: StartOptions) -> Result<Arc<Node>, Error> {
        let (Some(enr_uri), Some(multiaddr)) = (self.enr_uri.clone(), self.multiaddr.clone()) else {
            return Err(Error::Fixture("start the first rln relay node first".into()));
        };
        let defaults = self
            .relay_defaults("2")?
            .flag("discv5-bootstrap-node", enr_uri);
        let node = self
            .topology
            .start(DEFAULT_NWAKU, "node2", Self::merge(defaults, options))
            .await?;
        if node.variant() == Variant::Nwaku {
            node.add_peers(&json!([multiaddr])).await?;
        }
        self.main_nodes.push(node.clone());
        Ok(node)
    }

    pub async fn setup_main_rln_relay_nodes(&mut self) -> Result<(), Error> {
        self.setup_first_rln_relay_node(StartOptions::new()).await?;
        self.setup_second_rln_relay_node(StartOptions::new()).await?;
        Ok(())
    }

    pub async fn ensure_relay_subscriptions_on_nodes(
        &self,
        nodes: &[Arc<Node>],
        topics: &[&str],
    ) -> Result<(), Error> {
        for node in nodes {
            node.set_relay_subscriptions(topics).await?;
        }
        Ok(())
    }

    pub async fn subscribe_main_relay_nodes(&mut self) -> Result<(), Error> {
        self.ensure_relay_subscriptions_on_nodes(&self.main_nodes, &[PUBSUB_TOPIC])
            .await?;
        if self.topology.phase() < Phase::Subscribed {
            self.topology.advance(Phase::Subscribed)?;
        }
        Ok(())
    }

    pub fn create_message(&self) -> Message {
        Message::new(PAYLOAD, CONTENT_TOPIC)
    }

    /// Publish `message` (or a fresh one) from `sender` (or the first node).
    pub async fn publish_message(
        &self,
        message: Option<&Message>,
        pubsub_topic: Option<&str>,
        sender: Option<&Node>,
    ) -> Result<(), Error> {
        let fresh;
        let message = match message {
            Some(message) => message,
            None => {
                fresh = self.create_message();
                &fresh
            }
        };
        let sender: &Node = match sender {
            Some(sender) => sender,
            None => self.node(0)?.as_ref(),
        };
        sender
            .send_relay_message(message, pubsub_topic.unwrap_or(PUBSUB_TOPIC))
            .await?;
        Ok(())
    }

    pub async fn teardown(mut self) -> Result<(), Error> {
        self.topology.teardown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials() {
        let mut config = Config::default();
        assert!(matches!(credentials(&config), Err(Error::Fixture(_))));
        config.rln_credentials = Some("  ".into());
        assert!(credentials(&config).is_err());
        config.rln_credentials = Some("{}".into());
        assert_eq!(credentials(&config).unwrap(), "{}");
    }

    #[test]
    fn test_caller_options_win() {
        let defaults = StartOptions::new()
            .rln(RlnRequest::new("{}", "1"))
            .flag("relay", "true")
            .flag("rln-relay-membership-index", MEMBERSHIP_INDEX);
        let merged = RlnRelay::merge(
            defaults.clone(),
            StartOptions::new().flag("rln-relay-membership-index", "2"),
        );
        assert_eq!(merged.flags.get_text("rln-relay-membership-index"), Some("2"));
        assert_eq!(merged.flags.get_text("relay"), Some("true"));
        assert_eq!(merged.rln, Some(RlnRequest::new("{}", "1")));

        let merged = RlnRelay::merge(defaults, StartOptions::new().rln(RlnRequest::new("{}", "9")));
        assert_eq!(merged.rln.map(|request| request.id), Some("9".to_string()));
    }

    #[tokio::test]
    async fn test_relay_nodes_need_credentials() {
        let mut relay = RlnRelay::new(Topology::new(Config::default()));
        assert!(matches!(
            relay.setup_first_rln_relay_node(StartOptions::new()).await,
            Err(Error::Fixture(_))
        ));
        assert!(matches!(
            relay.register_main_rln_relay_nodes().await,
            Err(Error::Fixture(_))
        ));
        assert!(relay.publish_message(None, None, None).await.is_err());
    }

    #[test]
    fn test_registration_logs_apart_from_relay_nodes() {
        let relay = RlnRelay::new(Topology::new(Config::default()));
        for (id, role) in [("1", "node1"), ("2", "node2")] {
            let registration = relay.registration_node(id).unwrap();
            let relay_node = relay.topology.node(DEFAULT_NWAKU, role).unwrap();
            assert_ne!(registration.log_path(), relay_node.log_path());
            let name = registration.log_path().file_name().unwrap().to_string_lossy();
            assert!(name.starts_with(&format!("register{id}_")));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_rln_registration_waits_for_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            rln_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let relay = RlnRelay::new(Topology::new(config));
        let path = rln::keystore_path(dir.path(), "1");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{}").unwrap();
        relay.check_rln_registration("1").await.unwrap();
    }
}
