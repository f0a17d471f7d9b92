//! Root of the switch state tree.

use super::interface::{Interface, InterfaceMap};
use super::neighbor_table::{NeighborAddress, NeighborTable};
use super::vlan::{Vlan, VlanMap};
use crate::types::VlanId;
use std::sync::Arc;

/// An immutable revision of the switch configuration.
///
/// Every level of the tree sits behind an `Arc`. Mutating helpers take
/// `&mut Arc<SwitchState>` and clone only the path from the root to the node
/// being changed, so the new revision shares every untouched subtree with
/// the revision it was derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchState {
    generation: u64,
    vlans: Arc<VlanMap>,
    interfaces: Arc<InterfaceMap>,
}

impl SwitchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revision number, assigned by the state updater on commit.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn get_vlans(&self) -> &Arc<VlanMap> {
        &self.vlans
    }

    pub fn get_interfaces(&self) -> &Arc<InterfaceMap> {
        &self.interfaces
    }

    /// New revision with `vlan` added or replaced.
    pub fn with_vlan(self: &Arc<Self>, vlan: Vlan) -> Arc<Self> {
        let mut state = Arc::clone(self);
        Arc::make_mut(&mut Arc::make_mut(&mut state).vlans).insert(vlan);
        state
    }

    /// New revision without VLAN `id`.
    pub fn without_vlan(self: &Arc<Self>, id: VlanId) -> Arc<Self> {
        let mut state = Arc::clone(self);
        if self.vlans.get_vlan_if(id).is_some() {
            Arc::make_mut(&mut Arc::make_mut(&mut state).vlans).remove(id);
        }
        state
    }

    /// New revision with `interface` added or replaced.
    pub fn with_interface(self: &Arc<Self>, interface: Interface) -> Arc<Self> {
        let mut state = Arc::clone(self);
        Arc::make_mut(&mut Arc::make_mut(&mut state).interfaces).insert(interface);
        state
    }

    /// Mutable VLAN node inside `state`, copying the path from the root.
    ///
    /// Returns `None` (leaving `state` untouched) if the VLAN does not exist.
    pub(crate) fn modify_vlan(state: &mut Arc<Self>, id: VlanId) -> Option<&mut Vlan> {
        state.vlans.get_vlan_if(id)?;
        let root = Arc::make_mut(state);
        let vlan = Arc::make_mut(&mut root.vlans).get_vlan_mut(id)?;
        Some(Arc::make_mut(vlan))
    }

    /// Mutable neighbor table of family `A` on VLAN `id`, copying the path
    /// from the root.
    pub fn modify_neighbor_table<A: NeighborAddress>(
        state: &mut Arc<Self>,
        id: VlanId,
    ) -> Option<&mut NeighborTable<A>> {
        let vlan = Self::modify_vlan(state, id)?;
        Some(Arc::make_mut(A::table_mut(vlan)))
    }

    /// Removes the neighbor node for `ip` on VLAN `vlan_id`.
    ///
    /// Returns false, leaving `state` untouched, if the VLAN or the node is
    /// absent.
    pub fn remove_neighbor<A: NeighborAddress>(
        state: &mut Arc<Self>,
        vlan_id: VlanId,
        ip: A,
    ) -> bool {
        let present = state
            .vlans
            .get_vlan_if(vlan_id)
            .is_some_and(|vlan| vlan.neighbor_table::<A>().get_node_if(ip).is_some());
        if !present {
            return false;
        }
        Self::modify_neighbor_table::<A>(state, vlan_id)
            .is_some_and(|table| table.remove_node(ip).is_some())
    }
}
