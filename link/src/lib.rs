//! Schedule entanglement generation across shared links and deliver entangled pairs to both endpoints.
//!
//! # Overview
//!
//! Programs running on each node ask their [LinkLayer] for entangled pairs with a peer
//! ([LinkLayer::create_keep] on one side, [LinkLayer::recv_keep] on the other). The request is
//! forwarded to the [resource] actor that owns the physical link between the two nodes. Once both
//! endpoints have submitted compatible requests, the resource admits the pairing (assigning it a
//! per-link `sequence`) and drives its generation [model] attempt by attempt until the requested
//! number of pairs has been produced.
//!
//! Each successful attempt is delivered in two phases. At the attempt's state-ready time the
//! [Distributor] binds both halves of the pair into the endpoints' [Memory] and each program
//! receives a [Keep] holding its [Qubit]. At the label-ready time the classical [Delivery]
//! (sequence, Bell state, goodness and timestamps) is released to both endpoints.
//!
//! When several node pairs share one physical device (a hub), the [hub] actor decides which
//! spokes may attempt generation in each time window under a static, dynamic or FIFO policy.
//!
//! A complete network (nodes, links and hubs) can be described with a [NetworkConfig] and
//! instantiated with [Network::build].
//!
//! # Example
//!
//! ```rust
//! use futures::StreamExt;
//! use qnet_link::{Network, NetworkConfig};
//! use qnet_runtime::{deterministic, Runner, Spawner};
//!
//! let cfg = NetworkConfig::from_yaml(
//!     r#"
//! nodes:
//!   - name: alice
//!   - name: bob
//! links:
//!   - a: alice
//!     b: bob
//!     model:
//!       typ: depolarise
//!       cfg:
//!         fidelity: 0.9
//!         prob_success: 0.8
//!         t_cycle: 10
//! "#,
//! )
//! .unwrap();
//!
//! let executor = deterministic::Runner::seeded(0);
//! executor.start(|context| async move {
//!     let network = Network::build(context.clone(), &cfg).unwrap();
//!     let mut alice = network.link_layer("alice").unwrap();
//!     let mut bob = network.link_layer("bob").unwrap();
//!
//!     let receiver = context.spawn(move |_| async move {
//!         let mut pairs = bob.recv_keep("alice", 0, 1).await.unwrap();
//!         let mut keep = pairs.next().await.unwrap().unwrap();
//!         keep.label().await.unwrap()
//!     });
//!     let mut pairs = alice.create_keep("bob", 0, 1).await.unwrap();
//!     let mut keep = pairs.next().await.unwrap().unwrap();
//!     let delivery = keep.label().await.unwrap();
//!     assert_eq!(delivery, receiver.await.unwrap());
//!     assert_eq!(delivery.sequence, 0);
//! });
//! ```

use thiserror::Error;

mod bell;
pub use bell::{prob_max_mixed, BellState, Herald, Pair};
pub mod config;
pub use config::NetworkConfig;
mod delivery;
pub use delivery::{Delivery, Keep, Pairs};
mod distributor;
pub use distributor::Distributor;
pub mod hub;
mod layer;
pub use layer::LinkLayer;
mod memory;
pub use memory::{Memory, Qubit};
pub mod model;
mod network;
pub use network::Network;
mod request;
pub use request::{Request, Role};
pub mod resource;

/// Errors that can occur when requesting, generating or delivering entangled pairs.
///
/// Request-level failures are surfaced to every affected endpoint, so the type is cheap to clone
/// and compare.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("duplicate request: {0}")]
    DuplicateRequest(u64),
    #[error("specification mismatch")]
    SpecificationMismatch,
    #[error("generation timeout")]
    GenerationTimeout,
    #[error("request in service: {0}")]
    InService(u64),
    #[error("unknown request: {0}")]
    UnknownRequest(u64),
    #[error("empty request (must ask for at least one pair)")]
    EmptyRequest,
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("duplicate node: {0}")]
    DuplicateNode(String),
    #[error("not valid to link self")]
    LinkingSelf,
    #[error("duplicate link: {0} <-> {1}")]
    DuplicateLink(String, String),
    #[error("invalid fidelity (must be in (0, 1]): {0}")]
    InvalidFidelity(f64),
    #[error("invalid probability (must be in [0, 1]): {0}")]
    InvalidProbability(f64),
    #[error("invalid duration (must be positive): {0}")]
    InvalidDuration(f64),
    #[error("invalid length (must be non-negative): {0}")]
    InvalidLength(f64),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(&'static str),
    #[error("memory exhausted: {0}")]
    MemoryExhausted(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("closed")]
    Closed,
}
