//! Per-test node topology.
//!
//! A [Topology] owns the test identity, the configuration and the [Registry]
//! every node it starts joins. Fixtures build on it and move it through the
//! [Phase]s of a test; [Topology::teardown] is the single release point.

use chrono::Local;
use std::{fmt, sync::Arc};
use tracing::{debug, info, Level};
use uuid::Uuid;
use waku_interop_node::{Config, Error, Node, Registry, StartOptions};
use waku_interop_utils::telemetry;

/// Progress of a fixture through a test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Uninitialized,
    NodesStarted,
    Subscribed,
    WarmedUp,
    Ready,
    TornDown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::NodesStarted => "nodes started",
            Phase::Subscribed => "subscribed",
            Phase::WarmedUp => "warmed up",
            Phase::Ready => "ready",
            Phase::TornDown => "torn down",
        };
        f.write_str(name)
    }
}

/// Identity of one test run: `<YYYY-mm-dd_HH-MM-SS>__<uuid v4>`.
pub fn new_test_id() -> String {
    format!(
        "{}__{}",
        Local::now().format("%Y-%m-%d_%H-%M-%S"),
        Uuid::new_v4()
    )
}

/// Nodes of one test and the phase they are in.
pub struct Topology {
    config: Arc<Config>,
    test_id: String,
    registry: Registry,
    phase: Phase,
}

impl Topology {
    pub fn new(config: Config) -> Self {
        let test_id = new_test_id();
        info!(test_id, "running test");
        Self {
            config: Arc::new(config),
            test_id,
            registry: Registry::new(),
            phase: Phase::Uninitialized,
        }
    }

    /// Install logging and load the configuration from the environment.
    pub fn from_env() -> Result<Self, Error> {
        telemetry::init(Level::DEBUG);
        Ok(Self::new(Config::load()?))
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `next`. Phases may be skipped but never revisited.
    pub fn advance(&mut self, next: Phase) -> Result<(), Error> {
        if next < self.phase {
            return Err(Error::Fixture(format!(
                "cannot move from {} back to {next}",
                self.phase
            )));
        }
        if next != self.phase {
            debug!(from = %self.phase, to = %next, "fixture phase");
            self.phase = next;
        }
        Ok(())
    }

    /// A node for `image` whose log file is prefixed by `role` and the test id.
    pub fn node(&self, image: &str, role: &str) -> Result<Arc<Node>, Error> {
        let prefix = format!("{role}_{}", self.test_id);
        Ok(Arc::new(Node::new(image, &prefix, self.config.clone())?))
    }

    /// Create and start a node in one go.
    pub async fn start(
        &mut self,
        image: &str,
        role: &str,
        options: StartOptions,
    ) -> Result<Arc<Node>, Error> {
        if self.phase == Phase::TornDown {
            return Err(Error::Fixture("topology is torn down".into()));
        }
        let node = self.node(image, role)?;
        node.start(&self.registry, options).await?;
        if self.phase < Phase::NodesStarted {
            self.advance(Phase::NodesStarted)?;
        }
        Ok(node)
    }

    /// Stop every node this topology started. Calling it again is a no-op.
    pub async fn teardown(&mut self) -> Result<(), Error> {
        if self.phase == Phase::TornDown && self.registry.is_empty() {
            return Ok(());
        }
        debug!(test_id = self.test_id, nodes = self.registry.len(), "tearing down");
        let result = self.registry.stop_all().await;
        self.phase = Phase::TornDown;
        result
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("test_id", &self.test_id)
            .field("phase", &self.phase)
            .field("nodes", &self.registry.len())
            .finish()
    }
}
