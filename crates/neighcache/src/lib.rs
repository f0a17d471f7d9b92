//! Neighbor Resolution Cache for SONiC
//!
//! This crate tracks IP-to-MAC bindings (ARP for IPv4, NDP for IPv6) per VLAN
//! and keeps them in sync with a copy-on-write switch state tree. Each cache
//! entry runs its own aging/probing timer on a background event base; entry
//! changes become named update closures that a single-writer pipeline applies
//! against the current switch state revision.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! | Control | Description | Implementation |
//! |---------|-------------|----------------|
//! | AU-12 | Audit Record Generation | Neighbor programming and flushes logged |
//! | CM-6 | Configuration Settings | Timers and probing policy via TOML config |
//! | CM-8 | System Component Inventory | Per-VLAN neighbor cache dumps |
//! | SI-10 | Input Validation | Updates re-validated against current VLAN/subnets |
//! | SI-11 | Error Handling | Structured error types |
//!
//! # Architecture
//!
//! ```text
//!  protocol handlers                           background event base
//!         │                                    (entry timers, teardown)
//!         ▼                                              │
//!  ┌────────────────┐   per VLAN   ┌────────────────┐    │ tick
//!  │NeighborUpdater │─────────────▶│ NeighborCache  │◀───┘
//!  └────────────────┘  ARP + NDP   │  (locked impl) │
//!                                  └───────┬────────┘
//!                                          │ update_state(name, f)
//!                                          ▼
//!                                  ┌────────────────┐
//!                                  │SwitchStateUpdtr│──▶ SwitchState revisions
//!                                  └────────────────┘
//! ```

pub mod cache;
pub mod cache_impl;
pub mod config;
pub mod entry;
pub mod error;
pub mod event_base;
pub mod neighbor_updater;
pub mod state;
pub mod state_updater;
pub mod types;

pub use cache::{ArpCache, CacheContext, NdpCache, NeighborCache, NeighborEntryInfo, NeighborProber};
pub use cache_impl::NeighborCacheImpl;
pub use config::{DEFAULT_CONFIG_PATH, NeighborCacheConfig};
pub use entry::{EntryAction, NeighborCacheEntry, NeighborEntryState};
pub use error::{NeighCacheError, Result};
pub use event_base::{CompletionHandle, EventBase};
pub use neighbor_updater::NeighborUpdater;
pub use state::{
    ArpTable, EntryFields, Interface, InterfaceMap, NdpTable, NeighborAddress, NeighborNode,
    NeighborNodeState, NeighborTable, SwitchState, Vlan, VlanMap,
};
pub use state_updater::{StateUpdateFn, StateUpdater, SwitchStateUpdater, UpdateStats};
pub use types::{InterfaceId, IpPrefix, MacAddress, PortId, VlanId};
