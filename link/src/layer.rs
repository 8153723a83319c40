//! Per-node entry point for programs.

use crate::{resource, Error, Pairs, Request, Role};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::debug;

/// Link-layer service of one node.
///
/// Routes the node's requests to the links it shares with each of its peers and assigns request
/// identifiers. Clones share the identifier counter, so identifiers stay unique per node.
#[derive(Clone)]
pub struct LinkLayer {
    node: String,
    links: HashMap<String, resource::Mailbox>,
    next: Arc<AtomicU64>,
}

impl LinkLayer {
    pub(crate) fn new(node: &str) -> Self {
        Self {
            node: node.to_string(),
            links: HashMap::new(),
            next: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Reach `peer` over the link served by `resource`.
    pub(crate) fn connect(&mut self, peer: &str, resource: resource::Mailbox) {
        self.links.insert(peer.to_string(), resource);
    }

    /// Name of the node.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Peers this node shares a link with (sorted).
    pub fn peers(&self) -> Vec<&str> {
        let mut peers: Vec<_> = self.links.keys().map(String::as_str).collect();
        peers.sort_unstable();
        peers
    }

    /// Ask for `number` pairs with `peer`.
    ///
    /// Pairs are generated once `peer` calls [LinkLayer::recv_keep] with the same `purpose` and
    /// `number`. Each pair is yielded as soon as its qubit is in memory.
    pub async fn create_keep(
        &mut self,
        peer: &str,
        purpose: u32,
        number: u32,
    ) -> Result<Pairs, Error> {
        self.submit(peer, purpose, number, Role::Create).await
    }

    /// Accept `number` pairs initiated by `peer` (with [LinkLayer::create_keep]).
    pub async fn recv_keep(
        &mut self,
        peer: &str,
        purpose: u32,
        number: u32,
    ) -> Result<Pairs, Error> {
        self.submit(peer, purpose, number, Role::Receive).await
    }

    /// Withdraw the request `id` (returned by [Pairs::id]) made to `peer`.
    ///
    /// Only requests the peer has not yet matched can be withdrawn.
    pub async fn withdraw(&mut self, peer: &str, id: u64) -> Result<(), Error> {
        let resource = self
            .links
            .get_mut(peer)
            .ok_or_else(|| Error::UnknownPeer(peer.to_string()))?;
        resource.withdraw(&self.node, id).await
    }

    async fn submit(
        &mut self,
        peer: &str,
        purpose: u32,
        number: u32,
        role: Role,
    ) -> Result<Pairs, Error> {
        let resource = self
            .links
            .get_mut(peer)
            .ok_or_else(|| Error::UnknownPeer(peer.to_string()))?;
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        debug!(node = %self.node, peer, id, purpose, number, ?role, "requesting pairs");
        resource
            .submit(
                &self.node,
                Request {
                    id,
                    purpose,
                    number,
                    role,
                },
            )
            .await
    }
}
