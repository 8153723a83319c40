//! Instantiate a network from its configuration.

use crate::{
    config::{HubConfig, LinkConfig},
    hub,
    model::Model,
    resource, Distributor, Error, LinkLayer, Memory, NetworkConfig,
};
use qnet_runtime::{Clock, Metrics, Spawner};
use rand::RngCore;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::Duration,
};
use tracing::info;

/// Backlog of each link's mailbox.
const MAILBOX_SIZE: usize = 1024;

/// A link ready to be spawned.
struct Plan {
    a: String,
    b: String,
    model: Box<dyn Model>,
    max_attempts: Option<u64>,
    deadline: Option<Duration>,
}

impl Plan {
    fn direct(cfg: &LinkConfig) -> Result<Self, Error> {
        Ok(Self {
            a: cfg.a.clone(),
            b: cfg.b.clone(),
            model: cfg.model.build()?,
            max_attempts: cfg.max_attempts,
            deadline: cfg.deadline.map(Duration::from_nanos),
        })
    }
}

/// Running network: one link actor per link (or hub spoke) and one scheduler per hub.
pub struct Network {
    memories: BTreeMap<String, Memory>,
    layers: BTreeMap<String, LinkLayer>,
    links: Vec<(String, String)>,
    hubs: HashMap<String, hub::Mailbox>,
}

impl Network {
    /// Validate `cfg` and start every actor it describes.
    ///
    /// Links are labeled `link_<index>` (links first, then the spokes of each hub in order) and
    /// hubs `hub_<index>`.
    pub fn build<E: Clock + Spawner + Metrics + RngCore>(
        context: E,
        cfg: &NetworkConfig,
    ) -> Result<Self, Error> {
        // Nodes
        let mut memories = BTreeMap::new();
        for node in &cfg.nodes {
            if node.memory == 0 {
                return Err(Error::InvalidConfig(format!(
                    "node {} has no memory",
                    node.name
                )));
            }
            if memories
                .insert(node.name.clone(), Memory::new(&node.name, node.memory))
                .is_some()
            {
                return Err(Error::DuplicateNode(node.name.clone()));
            }
        }

        // Check every link (including those formed by hubs) before starting anything
        let mut seen = HashSet::new();
        let mut check = |a: &str, b: &str| -> Result<(), Error> {
            for node in [a, b] {
                if !memories.contains_key(node) {
                    return Err(Error::UnknownNode(node.to_string()));
                }
            }
            if a == b {
                return Err(Error::LinkingSelf);
            }
            let key = if a < b { (a, b) } else { (b, a) };
            if !seen.insert((key.0.to_string(), key.1.to_string())) {
                return Err(Error::DuplicateLink(a.to_string(), b.to_string()));
            }
            Ok(())
        };
        let mut direct = Vec::with_capacity(cfg.links.len());
        for link in &cfg.links {
            check(&link.a, &link.b)?;
            direct.push(Plan::direct(link)?);
        }
        let mut hubs = Vec::with_capacity(cfg.hubs.len());
        for hub in &cfg.hubs {
            let spokes = Self::spokes(hub)?;
            for spoke in &spokes {
                check(&spoke.a, &spoke.b)?;
            }
            hubs.push((hub, hub.schedule.build()?, spokes));
        }

        // Start links
        let mut network = Self {
            layers: memories
                .keys()
                .map(|node| (node.clone(), LinkLayer::new(node)))
                .collect(),
            memories,
            links: Vec::new(),
            hubs: HashMap::new(),
        };
        for plan in direct {
            network.spawn(&context, plan, None);
        }

        // Start hubs
        for (index, (hub, schedule, spokes)) in hubs.into_iter().enumerate() {
            let (actor, mailbox) =
                hub::Actor::new(context.with_label(&format!("hub_{index}")), schedule);
            let mut attached = Vec::with_capacity(spokes.len());
            for (spoke, plan) in spokes.into_iter().enumerate() {
                let (a, b) = (plan.a.clone(), plan.b.clone());
                let resource = network.spawn(&context, plan, Some(mailbox.attach(spoke)));
                attached.push(hub::Spoke { a, b, resource });
            }
            info!(hub = %hub.name, spokes = attached.len(), "started hub");
            actor.start(attached);
            network.hubs.insert(hub.name.clone(), mailbox);
        }
        Ok(network)
    }

    /// Links formed by every pair of nodes connected to `hub`.
    fn spokes(hub: &HubConfig) -> Result<Vec<Plan>, Error> {
        let mut spokes = Vec::new();
        for (i, a) in hub.connections.iter().enumerate() {
            for b in &hub.connections[i + 1..] {
                spokes.push(Plan {
                    a: a.node.clone(),
                    b: b.node.clone(),
                    model: hub.model.build_between(a.length, b.length)?,
                    max_attempts: hub.max_attempts,
                    deadline: hub.deadline.map(Duration::from_nanos),
                });
            }
        }
        Ok(spokes)
    }

    fn spawn<E: Clock + Spawner + Metrics + RngCore>(
        &mut self,
        context: &E,
        plan: Plan,
        hub: Option<hub::Attachment>,
    ) -> resource::Mailbox {
        let index = self.links.len();
        let memory = |node: &str| {
            self.memories
                .get(node)
                .cloned()
                .unwrap_or_else(|| Memory::new(node, 0))
        };
        let distributor = Distributor::new(memory(&plan.a), memory(&plan.b));
        let (actor, mailbox) = resource::Actor::new(
            context.with_label(&format!("link_{index}")),
            resource::Config {
                a: plan.a.clone(),
                b: plan.b.clone(),
                model: plan.model,
                distributor,
                max_attempts: plan.max_attempts,
                deadline: plan.deadline,
                hub,
                mailbox_size: MAILBOX_SIZE,
            },
        );
        actor.start();
        info!(link = index, a = %plan.a, b = %plan.b, "started link");
        if let Some(layer) = self.layers.get_mut(&plan.a) {
            layer.connect(&plan.b, mailbox.clone());
        }
        if let Some(layer) = self.layers.get_mut(&plan.b) {
            layer.connect(&plan.a, mailbox.clone());
        }
        self.links.push((plan.a, plan.b));
        mailbox
    }

    /// Link-layer service of `node`.
    ///
    /// Every handle returned for the same node shares request identifiers.
    pub fn link_layer(&self, node: &str) -> Option<LinkLayer> {
        self.layers.get(node).cloned()
    }

    /// Quantum memory of `node`.
    pub fn memory(&self, node: &str) -> Option<&Memory> {
        self.memories.get(node)
    }

    /// Scheduler of the hub named `name`.
    pub fn hub(&self, name: &str) -> Option<hub::Mailbox> {
        self.hubs.get(name).cloned()
    }

    /// Names of all nodes (sorted).
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.memories.keys().map(String::as_str)
    }

    /// Endpoints of every link, in the order of their labels.
    pub fn links(&self) -> &[(String, String)] {
        &self.links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qnet_macros::test_traced;
    use qnet_runtime::{deterministic, Runner};

    fn build(yaml: &str) -> Result<(), Error> {
        let cfg = NetworkConfig::from_yaml(yaml)?;
        let executor = deterministic::Runner::default();
        executor.start(|context| async move { Network::build(context, &cfg).map(|_| ()) })
    }

    const PERFECT: &str = "model:\n      typ: perfect\n      cfg: {}";

    #[test_traced]
    fn test_duplicate_node() {
        let yaml = "nodes:\n  - name: alice\n  - name: alice";
        assert_eq!(build(yaml), Err(Error::DuplicateNode("alice".into())));
    }

    #[test_traced]
    fn test_unknown_node() {
        let yaml = format!("nodes:\n  - name: alice\nlinks:\n  - a: alice\n    b: bob\n    {PERFECT}");
        assert_eq!(build(&yaml), Err(Error::UnknownNode("bob".into())));
    }

    #[test_traced]
    fn test_linking_self() {
        let yaml = format!("nodes:\n  - name: alice\nlinks:\n  - a: alice\n    b: alice\n    {PERFECT}");
        assert_eq!(build(&yaml), Err(Error::LinkingSelf));
    }

    #[test_traced]
    fn test_duplicate_link() {
        let yaml = format!(
            "nodes:\n  - name: alice\n  - name: bob\nlinks:\n  - a: alice\n    b: bob\n    {PERFECT}\n  - a: bob\n    b: alice\n    {PERFECT}"
        );
        assert_eq!(
            build(&yaml),
            Err(Error::DuplicateLink("bob".into(), "alice".into()))
        );
    }

    #[test_traced]
    fn test_hub_spoke_duplicates_link() {
        let yaml = format!(
            r#"nodes:
  - name: alice
  - name: bob
links:
  - a: alice
    b: bob
    {PERFECT}
hubs:
  - name: midpoint
    connections:
      - node: alice
        length: 1.0
      - node: bob
        length: 1.0
    {PERFECT}
    schedule:
      typ: fifo
      cfg: {{}}"#
        );
        assert_eq!(
            build(&yaml),
            Err(Error::DuplicateLink("alice".into(), "bob".into()))
        );
    }

    #[test_traced]
    fn test_empty_memory() {
        let yaml = "nodes:\n  - name: alice\n    memory: 0";
        assert!(matches!(build(yaml), Err(Error::InvalidConfig(_))));
    }

    #[test_traced]
    fn test_topology() {
        let yaml = format!(
            r#"nodes:
  - name: alice
  - name: bob
  - name: charlie
  - name: dave
    memory: 2
links:
  - a: alice
    b: dave
    {PERFECT}
hubs:
  - name: midpoint
    connections:
      - node: alice
        length: 1.0
      - node: bob
        length: 1.0
      - node: charlie
        length: 1.0
    {PERFECT}
    schedule:
      typ: static
      cfg: {{}}"#
        );
        let cfg = NetworkConfig::from_yaml(&yaml).unwrap();
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let network = Network::build(context, &cfg).unwrap();
            let links: Vec<_> = network
                .links()
                .iter()
                .map(|(a, b)| (a.as_str(), b.as_str()))
                .collect();
            assert_eq!(
                links,
                vec![
                    ("alice", "dave"),
                    ("alice", "bob"),
                    ("alice", "charlie"),
                    ("bob", "charlie"),
                ]
            );
            assert_eq!(
                network.nodes().collect::<Vec<_>>(),
                vec!["alice", "bob", "charlie", "dave"]
            );
            assert_eq!(network.memory("dave").unwrap().capacity(), 2);
            assert_eq!(
                network.link_layer("alice").unwrap().peers(),
                vec!["bob", "charlie", "dave"]
            );
            assert_eq!(network.link_layer("dave").unwrap().peers(), vec!["alice"]);
            assert!(network.link_layer("eve").is_none());
            assert!(network.hub("midpoint").is_some());
            assert!(network.hub("elsewhere").is_none());
        });
    }

    #[test_traced]
    fn test_unknown_peer() {
        let yaml = format!(
            "nodes:\n  - name: alice\n  - name: bob\n  - name: charlie\nlinks:\n  - a: alice\n    b: bob\n    {PERFECT}"
        );
        let cfg = NetworkConfig::from_yaml(&yaml).unwrap();
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let network = Network::build(context, &cfg).unwrap();
            let mut alice = network.link_layer("alice").unwrap();
            let result = alice.create_keep("charlie", 0, 1).await;
            assert!(matches!(result, Err(Error::UnknownPeer(peer)) if peer == "charlie"));
            let result = alice.withdraw("charlie", 0).await;
            assert_eq!(result, Err(Error::UnknownPeer("charlie".into())));
        });
    }
}
