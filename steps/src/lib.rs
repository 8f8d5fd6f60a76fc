//! Topology fixtures and protocol steps for waku interop scenarios.
//!
//! A scenario builds a [Topology] (test identity, configuration and node
//! registry), hands it to a fixture for the protocol under test, and drives the
//! fixture's verbs. Every verb builds the expected artifact, acts on the nodes,
//! waits (a flat propagation delay or a bounded poll) and then compares what the
//! nodes report with what was expected, returning [waku_interop_node::Error]
//! on mismatch.
//!
//! # Example
//!
//! ```rust,no_run
//! use waku_interop_steps::{
//!     relay::{Relay, PROPAGATION_DELAY},
//!     Topology,
//! };
//!
//! # async fn example() -> Result<(), waku_interop_node::Error> {
//! let relay = Relay::setup(Topology::from_env()?).await?;
//! let message = relay.create_message();
//! relay
//!     .check_published_message_reaches_peer(&message, None, PROPAGATION_DELAY)
//!     .await?;
//! relay.teardown().await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod data;
pub mod filter;
pub mod light_push;
pub mod metrics;
pub mod peer_exchange;
pub mod peer_store;
pub mod relay;
pub mod rln;
pub mod sharding;
pub mod store;
pub mod topology;
pub use topology::{Phase, Topology};
