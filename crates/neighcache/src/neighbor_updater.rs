//! Per-VLAN neighbor caches
//!
//! [`NeighborUpdater`] keeps one ARP and one NDP cache for every VLAN in the
//! switch state and hands them out to protocol handlers. The VLAN map lock is
//! always taken before any cache lock.

use crate::cache::{ArpCache, CacheContext, NdpCache, NeighborEntryInfo, NeighborProber};
use crate::config::NeighborCacheConfig;
use crate::event_base::EventBase;
use crate::state::{SwitchState, Vlan};
use crate::state_updater::StateUpdater;
use crate::types::{InterfaceId, PortId, VlanId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, info, instrument};

struct VlanCaches {
    interface_id: InterfaceId,
    arp: Arc<ArpCache>,
    ndp: Arc<NdpCache>,
}

pub struct NeighborUpdater {
    caches: RwLock<BTreeMap<VlanId, VlanCaches>>,
    arp_ctx: CacheContext<Ipv4Addr>,
    ndp_ctx: CacheContext<Ipv6Addr>,
}

impl NeighborUpdater {
    pub fn new(
        sw: Arc<dyn StateUpdater>,
        background: Arc<EventBase>,
        arp_prober: Arc<dyn NeighborProber<Ipv4Addr>>,
        ndp_prober: Arc<dyn NeighborProber<Ipv6Addr>>,
        config: Arc<NeighborCacheConfig>,
    ) -> Self {
        Self {
            caches: RwLock::new(BTreeMap::new()),
            arp_ctx: CacheContext {
                sw: sw.clone(),
                background: background.clone(),
                prober: arp_prober,
                config: config.clone(),
            },
            ndp_ctx: CacheContext {
                sw,
                background,
                prober: ndp_prober,
                config,
            },
        }
    }

    /// Brings the set of caches in line with the VLANs of `state`.
    ///
    /// New VLANs get caches repopulated from their neighbor tables. Caches of
    /// VLANs that are gone, or whose interface changed, are dropped (and
    /// replaced in the latter case).
    #[instrument(level = "debug", skip_all, fields(generation = state.generation()))]
    pub fn sync_vlans(&self, state: &SwitchState) {
        let mut retired = Vec::new();
        {
            let mut caches = self.caches.write();

            let stale: Vec<VlanId> = caches
                .iter()
                .filter(|(id, tracked)| {
                    state
                        .get_vlans()
                        .get_vlan_if(**id)
                        .is_none_or(|vlan| vlan.interface_id() != tracked.interface_id)
                })
                .map(|(id, _)| *id)
                .collect();
            for id in stale {
                if let Some(tracked) = caches.remove(&id) {
                    info!(vlan = %id, "Removing neighbor caches");
                    retired.push(tracked);
                }
            }

            for vlan in state.get_vlans().iter() {
                if !caches.contains_key(&vlan.id()) {
                    caches.insert(vlan.id(), self.create_caches(vlan));
                }
            }
        }
        // Teardown waits on the background event base; keep it outside the
        // map lock
        drop(retired);
    }

    fn create_caches(&self, vlan: &Vlan) -> VlanCaches {
        let arp = ArpCache::new(&self.arp_ctx, vlan.id(), vlan.name(), vlan.interface_id());
        let ndp = NdpCache::new(&self.ndp_ctx, vlan.id(), vlan.name(), vlan.interface_id());
        arp.repopulate(vlan.arp_table());
        ndp.repopulate(vlan.ndp_table());
        info!(
            vlan = %vlan.id(),
            interface = %vlan.interface_id(),
            arp_entries = arp.len(),
            ndp_entries = ndp.len(),
            "Created neighbor caches"
        );
        VlanCaches {
            interface_id: vlan.interface_id(),
            arp,
            ndp,
        }
    }

    pub fn arp_cache(&self, vlan_id: VlanId) -> Option<Arc<ArpCache>> {
        self.caches.read().get(&vlan_id).map(|c| c.arp.clone())
    }

    pub fn ndp_cache(&self, vlan_id: VlanId) -> Option<Arc<NdpCache>> {
        self.caches.read().get(&vlan_id).map(|c| c.ndp.clone())
    }

    /// VLANs currently tracked.
    pub fn vlans(&self) -> Vec<VlanId> {
        self.caches.read().keys().copied().collect()
    }

    /// Moves every entry learned on `port`, in every VLAN, back to pending.
    pub fn port_down(&self, port: PortId) {
        debug!(%port, "Port down, re-resolving neighbors");
        for caches in self.caches.read().values() {
            caches.arp.port_down(port);
            caches.ndp.port_down(port);
        }
    }

    /// Flushes `ip` from the cache of `vlan_id` and from the switch state,
    /// waiting for the switch state update.
    pub fn flush_entry(&self, vlan_id: VlanId, ip: IpAddr) -> bool {
        let caches = self.caches.read();
        let Some(caches) = caches.get(&vlan_id) else {
            return false;
        };
        match ip {
            IpAddr::V4(ip) => caches.arp.flush_entry_blocking(ip),
            IpAddr::V6(ip) => caches.ndp.flush_entry_blocking(ip),
        }
    }

    /// Snapshot of every entry of every cache.
    pub fn get_cache_data(&self) -> Vec<NeighborEntryInfo> {
        let caches = self.caches.read();
        caches
            .values()
            .flat_map(|c| {
                let mut data = c.arp.get_cache_data();
                data.extend(c.ndp.get_cache_data());
                data
            })
            .collect()
    }
}
