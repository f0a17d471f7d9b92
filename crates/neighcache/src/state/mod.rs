//! Copy-on-write switch state tree
//!
//! `SwitchState -> VlanMap -> Vlan -> NeighborTable<A> -> NeighborNode<A>`,
//! plus the interface map used to validate that neighbors are on attached
//! subnets. Revisions are immutable once published; see [`SwitchState`] for
//! how new revisions are derived.

mod interface;
mod neighbor_table;
mod switch_state;
mod vlan;

pub use interface::{Interface, InterfaceMap};
pub use neighbor_table::{
    ArpTable, EntryFields, NdpTable, NeighborAddress, NeighborNode, NeighborNodeState,
    NeighborTable,
};
pub use switch_state::SwitchState;
pub use vlan::{Vlan, VlanMap};
