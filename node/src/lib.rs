//! Provision, drive, and tear down containerized waku nodes.
//!
//! Each [Node] wraps one container started from an nwaku or go-waku image and
//! exposes the node's REST (and legacy JSON-RPC) interface through a single
//! facade, whatever the variant. Variant differences live behind [Flavor].
//!
//! Nodes join a shared bridge network at addresses leased from a process-wide
//! [network::AddressPool], and every started node is tracked by a [Registry] so
//! teardown reaches it.

pub mod api;
pub mod config;
pub use config::{Config, Protocol};
pub mod docker;
pub mod error;
pub use error::{Error, ErrorKind};
pub mod flags;
pub use flags::{FlagValue, Flags};
pub mod message;
pub use message::{assert_received, Fingerprint, HashEncoding, Message, Timestamp};
pub mod metrics;
pub use metrics::Metrics;
pub mod network;
pub use network::{Lease, Ports};
pub mod node;
pub use node::{Node, StartOptions};
pub mod registry;
pub use registry::Registry;
pub mod rln;
pub use rln::RlnRequest;
pub mod store;
pub use store::{StoreQuery, StoreResponse, StoreVersion};
pub mod variant;
pub use variant::{Capability, Flavor, Variant};
