//! Routed interfaces of the switch state.

use super::switch_state::SwitchState;
use crate::types::{InterfaceId, IpPrefix, VlanId};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

/// A routed interface and the subnets attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    id: InterfaceId,
    name: String,
    vlan_id: VlanId,
    addresses: Vec<IpPrefix>,
}

impl Interface {
    pub fn new(
        id: InterfaceId,
        name: impl Into<String>,
        vlan_id: VlanId,
        addresses: Vec<IpPrefix>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            vlan_id,
            addresses,
        }
    }

    pub fn id(&self) -> InterfaceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vlan_id(&self) -> VlanId {
        self.vlan_id
    }

    pub fn addresses(&self) -> &[IpPrefix] {
        &self.addresses
    }

    /// Returns true if `ip` is inside one of the interface's subnets.
    pub fn has_address_in_subnet(&self, ip: IpAddr) -> bool {
        self.addresses.iter().any(|prefix| prefix.contains(ip))
    }

    /// Returns true if `intf` exists in `state` and `ip` is on one of its
    /// locally attached subnets.
    pub fn is_ip_attached(ip: IpAddr, intf: InterfaceId, state: &SwitchState) -> bool {
        state
            .get_interfaces()
            .get_interface_if(intf)
            .is_some_and(|interface| interface.has_address_in_subnet(ip))
    }
}

/// All interfaces of a switch state, keyed by ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceMap {
    interfaces: BTreeMap<InterfaceId, Arc<Interface>>,
}

impl InterfaceMap {
    pub fn get_interface_if(&self, id: InterfaceId) -> Option<&Arc<Interface>> {
        self.interfaces.get(&id)
    }

    pub(super) fn insert(&mut self, interface: Interface) {
        self.interfaces.insert(interface.id(), Arc::new(interface));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Interface>> {
        self.interfaces.values()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}
