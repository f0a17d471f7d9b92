//! Locked per-VLAN neighbor cache
//!
//! [`NeighborCache`] is the handle protocol handlers hold. Every operation
//! takes the cache lock and forwards to [`NeighborCacheImpl`]. Entry timers
//! reach the cache through a weak reference, so a cache that is no longer
//! referenced is torn down even while its timers are still armed.

use crate::cache_impl::NeighborCacheImpl;
use crate::config::NeighborCacheConfig;
use crate::entry::NeighborEntryState;
use crate::event_base::EventBase;
use crate::state::{NeighborAddress, NeighborTable};
use crate::state_updater::StateUpdater;
use crate::types::{InterfaceId, MacAddress, PortId, VlanId};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

/// Sends solicitations (ARP requests, neighbor solicitations) on behalf of
/// the cache.
pub trait NeighborProber<A>: Send + Sync {
    fn probe_for(&self, ip: A, vlan_id: VlanId, interface_id: InterfaceId);
}

/// Collaborators shared by every cache of one address family.
pub struct CacheContext<A: NeighborAddress> {
    pub sw: Arc<dyn StateUpdater>,
    pub background: Arc<EventBase>,
    pub prober: Arc<dyn NeighborProber<A>>,
    pub config: Arc<NeighborCacheConfig>,
}

impl<A: NeighborAddress> Clone for CacheContext<A> {
    fn clone(&self) -> Self {
        Self {
            sw: self.sw.clone(),
            background: self.background.clone(),
            prober: self.prober.clone(),
            config: self.config.clone(),
        }
    }
}

/// Diagnostic snapshot of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborEntryInfo {
    pub ip: IpAddr,
    pub mac: MacAddress,
    pub port: PortId,
    pub interface_id: InterfaceId,
    pub vlan_id: VlanId,
    pub state: NeighborEntryState,
    pub probes_left: u32,
}

/// Neighbor cache of one VLAN and one address family.
pub struct NeighborCache<A: NeighborAddress> {
    inner: Mutex<NeighborCacheImpl<A>>,
}

/// IPv4 (ARP) neighbor cache
pub type ArpCache = NeighborCache<Ipv4Addr>;
/// IPv6 (NDP) neighbor cache
pub type NdpCache = NeighborCache<Ipv6Addr>;

impl<A: NeighborAddress> NeighborCache<A> {
    pub fn new(
        ctx: &CacheContext<A>,
        vlan_id: VlanId,
        vlan_name: impl Into<String>,
        interface_id: InterfaceId,
    ) -> Arc<Self> {
        let vlan_name = vlan_name.into();
        Arc::new_cyclic(|cache| Self {
            inner: Mutex::new(NeighborCacheImpl::new(
                cache.clone(),
                ctx,
                vlan_id,
                vlan_name,
                interface_id,
            )),
        })
    }

    /// Locks the cache for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, NeighborCacheImpl<A>> {
        self.inner.lock()
    }

    pub fn vlan_id(&self) -> VlanId {
        self.inner.lock().vlan_id()
    }

    pub fn interface_id(&self) -> InterfaceId {
        self.inner.lock().interface_id()
    }

    pub fn set_entry(&self, ip: A, mac: MacAddress, port: PortId, state: NeighborEntryState) {
        self.inner.lock().set_entry(ip, mac, port, state);
    }

    pub fn set_existing_entry(
        &self,
        ip: A,
        mac: MacAddress,
        port: PortId,
        state: NeighborEntryState,
    ) {
        self.inner.lock().set_existing_entry(ip, mac, port, state);
    }

    pub fn set_pending_entry(&self, ip: A, force: bool) {
        self.inner.lock().set_pending_entry(ip, force);
    }

    pub fn process_entry(&self, ip: A) {
        self.inner.lock().process_entry(ip);
    }

    pub fn port_down(&self, port: PortId) {
        self.inner.lock().port_down(port);
    }

    pub fn repopulate(&self, table: &NeighborTable<A>) {
        self.inner.lock().repopulate(table);
    }

    pub fn remove_entry(&self, ip: A) -> bool {
        self.inner.lock().remove_entry(ip)
    }

    pub fn flush_entry(&self, ip: A, blocking: bool) -> bool {
        self.inner.lock().flush_entry(ip, blocking)
    }

    pub fn flush_entry_blocking(&self, ip: A) -> bool {
        self.inner.lock().flush_entry_blocking(ip)
    }

    pub fn is_solicited(&self, ip: A) -> bool {
        self.inner.lock().is_solicited(ip)
    }

    /// State of the entry for `ip`, if cached.
    pub fn get_state(&self, ip: A) -> Option<NeighborEntryState> {
        self.inner.lock().get_cache_entry(ip).map(|entry| entry.get_state())
    }

    pub fn get_cache_data(&self) -> Vec<NeighborEntryInfo> {
        self.inner.lock().get_cache_data()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Timer callback for the entry of `ip`. Returns the delay until its
    /// next tick, or `None` once the entry is gone.
    pub(crate) fn tick_entry(&self, ip: A) -> Option<Duration> {
        let mut inner = self.inner.lock();
        inner.process_entry(ip);
        inner.get_cache_entry(ip).map(|entry| entry.next_interval())
    }
}
