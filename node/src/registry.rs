//! Nodes started by one test.

use crate::{node::Node, Error};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Tracks every node a test started so teardown reaches all of them.
///
/// [Registry::stop_all] is the orderly release point. Anything still registered
/// when the registry is dropped is force-removed.
#[derive(Default)]
pub struct Registry {
    nodes: Mutex<Vec<Arc<Node>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Node>>> {
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track `node`. Registering the same node twice has no effect.
    pub fn register(&self, node: Arc<Node>) {
        let mut nodes = self.lock();
        if nodes.iter().any(|known| Arc::ptr_eq(known, &node)) {
            return;
        }
        debug!(image = node.image(), "registered node");
        nodes.push(node);
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Stop every registered node.
    ///
    /// Every node is attempted. Nodes that fail to stop stay registered (and are
    /// force-removed on drop); the first failure is returned.
    pub async fn stop_all(&self) -> Result<(), Error> {
        let nodes = std::mem::take(&mut *self.lock());
        let mut first = None;
        for node in nodes {
            if let Err(err) = node.stop().await {
                warn!(image = node.image(), ?err, "failed to stop node");
                first.get_or_insert(err);
                self.lock().push(node);
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let nodes = std::mem::take(
            self.nodes
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for node in nodes {
            if node.is_started() {
                warn!(image = node.image(), "node was not stopped, removing it");
                node.force_remove_blocking();
            }
        }
    }
}
