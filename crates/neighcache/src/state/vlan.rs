//! VLAN nodes of the switch state.

use super::neighbor_table::{ArpTable, NdpTable, NeighborAddress, NeighborTable};
use crate::types::{InterfaceId, VlanId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A VLAN with its neighbor tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vlan {
    id: VlanId,
    name: String,
    interface_id: InterfaceId,
    pub(super) arp_table: Arc<ArpTable>,
    pub(super) ndp_table: Arc<NdpTable>,
}

impl Vlan {
    pub fn new(id: VlanId, name: impl Into<String>, interface_id: InterfaceId) -> Self {
        Self {
            id,
            name: name.into(),
            interface_id,
            arp_table: Arc::default(),
            ndp_table: Arc::default(),
        }
    }

    pub fn id(&self) -> VlanId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Routed interface the VLAN's neighbors are resolved on.
    pub fn interface_id(&self) -> InterfaceId {
        self.interface_id
    }

    pub fn arp_table(&self) -> &Arc<ArpTable> {
        &self.arp_table
    }

    pub fn ndp_table(&self) -> &Arc<NdpTable> {
        &self.ndp_table
    }

    /// Neighbor table for address family `A`.
    pub fn neighbor_table<A: NeighborAddress>(&self) -> &Arc<NeighborTable<A>> {
        A::table(self)
    }
}

/// All VLANs of a switch state, keyed by ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VlanMap {
    vlans: BTreeMap<VlanId, Arc<Vlan>>,
}

impl VlanMap {
    pub fn get_vlan_if(&self, id: VlanId) -> Option<&Arc<Vlan>> {
        self.vlans.get(&id)
    }

    pub(super) fn get_vlan_mut(&mut self, id: VlanId) -> Option<&mut Arc<Vlan>> {
        self.vlans.get_mut(&id)
    }

    pub(super) fn insert(&mut self, vlan: Vlan) {
        self.vlans.insert(vlan.id(), Arc::new(vlan));
    }

    pub(super) fn remove(&mut self, id: VlanId) -> Option<Arc<Vlan>> {
        self.vlans.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Vlan>> {
        self.vlans.values()
    }

    pub fn len(&self) -> usize {
        self.vlans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vlans.is_empty()
    }
}
