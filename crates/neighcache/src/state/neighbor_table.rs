//! Per-VLAN neighbor tables (ARP for IPv4, NDP for IPv6).

use super::vlan::Vlan;
use crate::types::{InterfaceId, MacAddress, PortId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// Persisted state of a neighbor node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NeighborNodeState {
    /// Placeholder installed while the address is being resolved
    Pending,
    /// Resolved to a link-layer address and port
    Reachable,
}

/// Address family a neighbor cache operates on.
///
/// Selects which of the VLAN's neighbor tables the cache reads and mutates.
pub trait NeighborAddress:
    Copy + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static + Into<IpAddr>
{
    /// Resolution protocol name, used in log output
    const PROTOCOL: &'static str;

    fn table(vlan: &Vlan) -> &Arc<NeighborTable<Self>>;

    fn table_mut(vlan: &mut Vlan) -> &mut Arc<NeighborTable<Self>>;
}

impl NeighborAddress for Ipv4Addr {
    const PROTOCOL: &'static str = "ARP";

    fn table(vlan: &Vlan) -> &Arc<NeighborTable<Self>> {
        &vlan.arp_table
    }

    fn table_mut(vlan: &mut Vlan) -> &mut Arc<NeighborTable<Self>> {
        &mut vlan.arp_table
    }
}

impl NeighborAddress for Ipv6Addr {
    const PROTOCOL: &'static str = "NDP";

    fn table(vlan: &Vlan) -> &Arc<NeighborTable<Self>> {
        &vlan.ndp_table
    }

    fn table_mut(vlan: &mut Vlan) -> &mut Arc<NeighborTable<Self>> {
        &mut vlan.ndp_table
    }
}

/// Value snapshot of a neighbor binding.
///
/// Shared by cache entries and tree nodes; the identity key is `ip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryFields<A> {
    pub ip: A,
    pub mac: MacAddress,
    pub port: PortId,
    pub interface_id: InterfaceId,
    pub state: NeighborNodeState,
}

impl<A: NeighborAddress> EntryFields<A> {
    /// Resolved binding.
    pub fn new(ip: A, mac: MacAddress, port: PortId, interface_id: InterfaceId) -> Self {
        Self {
            ip,
            mac,
            port,
            interface_id,
            state: NeighborNodeState::Reachable,
        }
    }

    /// Unresolved placeholder: broadcast MAC, no port.
    pub fn pending(ip: A, interface_id: InterfaceId) -> Self {
        Self {
            ip,
            mac: MacAddress::BROADCAST,
            port: PortId(0),
            interface_id,
            state: NeighborNodeState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == NeighborNodeState::Pending
    }
}

/// A neighbor as persisted in the switch state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborNode<A> {
    fields: EntryFields<A>,
}

impl<A: NeighborAddress> NeighborNode<A> {
    pub fn new(fields: EntryFields<A>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &EntryFields<A> {
        &self.fields
    }

    pub fn ip(&self) -> A {
        self.fields.ip
    }

    pub fn mac(&self) -> MacAddress {
        self.fields.mac
    }

    pub fn port(&self) -> PortId {
        self.fields.port
    }

    pub fn interface_id(&self) -> InterfaceId {
        self.fields.interface_id
    }

    pub fn is_pending(&self) -> bool {
        self.fields.is_pending()
    }
}

/// IP -> neighbor node map for one VLAN and one address family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborTable<A> {
    nodes: BTreeMap<A, Arc<NeighborNode<A>>>,
}

/// IPv4 neighbors of a VLAN
pub type ArpTable = NeighborTable<Ipv4Addr>;
/// IPv6 neighbors of a VLAN
pub type NdpTable = NeighborTable<Ipv6Addr>;

impl<A> Default for NeighborTable<A> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }
}

impl<A: NeighborAddress> NeighborTable<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_node_if(&self, ip: A) -> Option<&Arc<NeighborNode<A>>> {
        self.nodes.get(&ip)
    }

    /// Adds a resolved node. The IP must not already be present.
    pub fn add_entry(&mut self, fields: EntryFields<A>) {
        let prev = self.nodes.insert(fields.ip, Arc::new(NeighborNode::new(fields)));
        debug_assert!(prev.is_none(), "neighbor {} already present", fields.ip);
    }

    /// Replaces the node for `fields.ip` (resolving a pending node, or
    /// moving a resolved one to a new MAC/port).
    pub fn update_entry(&mut self, fields: EntryFields<A>) {
        self.nodes
            .insert(fields.ip, Arc::new(NeighborNode::new(fields)));
    }

    /// Adds a pending placeholder. The IP must not already be present.
    pub fn add_pending_entry(&mut self, ip: A, interface_id: InterfaceId) {
        let prev = self.nodes.insert(
            ip,
            Arc::new(NeighborNode::new(EntryFields::pending(ip, interface_id))),
        );
        debug_assert!(prev.is_none(), "neighbor {} already present", ip);
    }

    pub fn remove_node(&mut self, ip: A) -> Option<Arc<NeighborNode<A>>> {
        self.nodes.remove(&ip)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<NeighborNode<A>>> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
