//! Per-VLAN neighbor cache core
//!
//! Keeps the cache entries of one VLAN and one address family, and turns
//! entry changes into switch state updates. Update closures capture value
//! snapshots only and re-validate against whatever revision is current when
//! the pipeline runs them, discarding themselves if the VLAN or subnet went
//! away or a later update already produced the same node.

use crate::cache::{CacheContext, NeighborCache, NeighborEntryInfo, NeighborProber};
use crate::config::NeighborCacheConfig;
use crate::entry::{EntryAction, NeighborCacheEntry, NeighborEntryState};
use crate::event_base::EventBase;
use crate::state::{EntryFields, Interface, NeighborAddress, NeighborTable, SwitchState};
use crate::state_updater::{StateUpdateFn, StateUpdater};
use crate::types::{InterfaceId, MacAddress, PortId, VlanId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, instrument, trace};

pub struct NeighborCacheImpl<A: NeighborAddress> {
    vlan_id: VlanId,
    vlan_name: String,
    interface_id: InterfaceId,
    entries: HashMap<A, NeighborCacheEntry<A>>,
    sw: Arc<dyn StateUpdater>,
    background: Arc<EventBase>,
    cache: Weak<NeighborCache<A>>,
    prober: Arc<dyn NeighborProber<A>>,
    config: Arc<NeighborCacheConfig>,
}

impl<A: NeighborAddress> NeighborCacheImpl<A> {
    pub(crate) fn new(
        cache: Weak<NeighborCache<A>>,
        ctx: &CacheContext<A>,
        vlan_id: VlanId,
        vlan_name: String,
        interface_id: InterfaceId,
    ) -> Self {
        Self {
            vlan_id,
            vlan_name,
            interface_id,
            entries: HashMap::new(),
            sw: ctx.sw.clone(),
            background: ctx.background.clone(),
            cache,
            prober: ctx.prober.clone(),
            config: ctx.config.clone(),
        }
    }

    pub fn vlan_id(&self) -> VlanId {
        self.vlan_id
    }

    pub fn interface_id(&self) -> InterfaceId {
        self.interface_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Creates or updates the entry for `ip` and programs it into the switch
    /// state.
    #[instrument(level = "debug", skip(self), fields(vlan = %self.vlan_id))]
    pub fn set_entry(&mut self, ip: A, mac: MacAddress, port: PortId, state: NeighborEntryState) {
        let fields = EntryFields::new(ip, mac, port, self.interface_id);
        if let Some(fields) = self.set_entry_internal(fields, state, true) {
            self.program_entry(fields);
        }
    }

    /// Like [`Self::set_entry`], but only if an entry for `ip` already exists.
    pub fn set_existing_entry(
        &mut self,
        ip: A,
        mac: MacAddress,
        port: PortId,
        state: NeighborEntryState,
    ) {
        let fields = EntryFields::new(ip, mac, port, self.interface_id);
        if let Some(fields) = self.set_entry_internal(fields, state, false) {
            self.program_entry(fields);
        }
    }

    /// Updates the entry for `fields.ip`, creating it if `add` is set.
    ///
    /// Returns a snapshot of the entry's fields after the update, or `None`
    /// if no entry exists and `add` is false.
    pub fn set_entry_internal(
        &mut self,
        fields: EntryFields<A>,
        state: NeighborEntryState,
        add: bool,
    ) -> Option<EntryFields<A>> {
        if let Some(entry) = self.entries.get_mut(&fields.ip) {
            if !entry.fields_match(&fields) {
                entry.update_fields(fields);
            }
            entry.update_state(state);
            return Some(*entry.get_fields());
        }
        if !add {
            return None;
        }

        let cache = self.cache.clone();
        let ip = fields.ip;
        let entry = NeighborCacheEntry::new(
            fields,
            state,
            self.config.clone(),
            &self.background,
            move || cache.upgrade()?.tick_entry(ip),
        );
        self.set_cache_entry(entry);
        Some(fields)
    }

    /// Installs a pending entry for `ip`.
    ///
    /// An existing entry is only replaced when `force` is set.
    #[instrument(level = "debug", skip(self), fields(vlan = %self.vlan_id))]
    pub fn set_pending_entry(&mut self, ip: A, force: bool) {
        if !force && self.entries.contains_key(&ip) {
            return;
        }
        let fields = EntryFields::pending(ip, self.interface_id);
        if let Some(fields) =
            self.set_entry_internal(fields, NeighborEntryState::Incomplete, true)
        {
            self.program_pending_entry(fields, force);
        }
    }

    /// Advances the entry for `ip` by one tick, flushing it once expired.
    pub fn process_entry(&mut self, ip: A) {
        let Some(entry) = self.entries.get_mut(&ip) else {
            return;
        };
        if entry.process() == EntryAction::Probe {
            trace!(%ip, vlan = %self.vlan_id, protocol = A::PROTOCOL, "Probing neighbor");
            self.prober.probe_for(ip, self.vlan_id, self.interface_id);
        }
        if entry.get_state() == NeighborEntryState::Expired {
            debug!(%ip, vlan = %self.vlan_id, protocol = A::PROTOCOL, "Neighbor entry expired");
            self.flush_entry(ip, false);
        }
    }

    /// Re-resolves every entry learned on `port`.
    ///
    /// Entries go back to pending rather than stale so traffic is not
    /// forwarded to the port again until the neighbor answers.
    #[instrument(level = "debug", skip(self), fields(vlan = %self.vlan_id))]
    pub fn port_down(&mut self, port: PortId) {
        let ips: Vec<A> = self
            .entries
            .values()
            .filter(|entry| entry.get_port() == port)
            .map(|entry| entry.get_ip())
            .collect();
        for ip in ips {
            self.set_pending_entry(ip, true);
        }
    }

    /// Rebuilds cache entries from a neighbor table already in the switch
    /// state, without submitting any updates.
    pub fn repopulate(&mut self, table: &NeighborTable<A>) {
        for node in table.iter() {
            let state = if node.is_pending() {
                NeighborEntryState::Incomplete
            } else {
                NeighborEntryState::Stale
            };
            self.set_entry_internal(*node.fields(), state, true);
        }
        debug!(
            vlan = %self.vlan_id,
            vlan_name = %self.vlan_name,
            protocol = A::PROTOCOL,
            entries = self.entries.len(),
            "Repopulated neighbor cache"
        );
    }

    fn program_entry(&self, fields: EntryFields<A>) {
        assert!(!fields.is_pending(), "programming pending entry {}", fields.ip);

        let vlan_id = self.vlan_id;
        let name = format!("add neighbor {}", fields.ip);
        self.sw.update_state(
            &name,
            Box::new(move |state| {
                if !check_vlan_and_intf(state, &fields, vlan_id) {
                    return None;
                }
                let node = state
                    .get_vlans()
                    .get_vlan_if(vlan_id)?
                    .neighbor_table::<A>()
                    .get_node_if(fields.ip)
                    .cloned();
                if let Some(node) = &node {
                    if node.mac() == fields.mac
                        && node.port() == fields.port
                        && node.interface_id() == fields.interface_id
                        && !node.is_pending()
                    {
                        // Already updated by an earlier update
                        return None;
                    }
                }

                let mut new_state = state.clone();
                let table = SwitchState::modify_neighbor_table::<A>(&mut new_state, vlan_id)?;
                match node {
                    None => {
                        table.add_entry(fields);
                        debug!(ip = %fields.ip, mac = %fields.mac, "Adding entry");
                    }
                    Some(node) => {
                        table.update_entry(fields);
                        if node.is_pending() {
                            debug!(ip = %fields.ip, mac = %fields.mac, "Converting pending entry");
                        } else {
                            debug!(ip = %fields.ip, mac = %fields.mac, "Updating entry");
                        }
                    }
                }
                Some(new_state)
            }),
        );
    }

    fn program_pending_entry(&self, fields: EntryFields<A>, force: bool) {
        assert!(fields.is_pending(), "entry {} is not pending", fields.ip);

        let vlan_id = self.vlan_id;
        let name = format!("add pending entry {}", fields.ip);
        self.sw.update_state(
            &name,
            Box::new(move |state| {
                if !check_vlan_and_intf(state, &fields, vlan_id) {
                    return None;
                }
                let exists = state
                    .get_vlans()
                    .get_vlan_if(vlan_id)?
                    .neighbor_table::<A>()
                    .get_node_if(fields.ip)
                    .is_some();
                if exists && !force {
                    // Never replace a node with a pending one unless forced
                    return None;
                }

                let mut new_state = state.clone();
                let table = SwitchState::modify_neighbor_table::<A>(&mut new_state, vlan_id)?;
                if exists {
                    table.remove_node(fields.ip);
                }
                table.add_pending_entry(fields.ip, fields.interface_id);
                trace!(ip = %fields.ip, interface = %fields.interface_id, "Adding pending entry");
                Some(new_state)
            }),
        );
    }

    pub fn get_cache_entry(&self, ip: A) -> Option<&NeighborCacheEntry<A>> {
        self.entries.get(&ip)
    }

    fn set_cache_entry(&mut self, entry: NeighborCacheEntry<A>) {
        if let Some(displaced) = self.entries.insert(entry.get_ip(), entry) {
            self.retire(displaced);
        }
    }

    /// Hands `entry` to the background event base for destruction without
    /// waiting for it; its timer may be blocked on the cache lock we hold.
    /// A failed stop aborts inside the destruction task.
    fn retire(&self, entry: NeighborCacheEntry<A>) {
        drop(entry.destroy(&self.background));
    }

    /// Drops the entry for `ip` from the cache. The switch state is not
    /// touched.
    ///
    /// The entry is destroyed asynchronously on the background event base.
    pub fn remove_entry(&mut self, ip: A) -> bool {
        match self.entries.remove(&ip) {
            Some(entry) => {
                self.retire(entry);
                true
            }
            None => false,
        }
    }

    /// Removes the node for `ip` from `vlan_id` in `state`.
    ///
    /// The entry must already be gone from the cache.
    pub fn flush_entry_from_switch_state(
        &self,
        state: &mut Arc<SwitchState>,
        vlan_id: VlanId,
        ip: A,
    ) -> bool {
        self.assert_uncached(ip);
        SwitchState::remove_neighbor::<A>(state, vlan_id, ip)
    }

    fn assert_uncached(&self, ip: A) {
        assert!(
            !self.entries.contains_key(&ip),
            "flushing {} from switch state while it is still cached",
            ip
        );
    }

    /// Removes `ip` from the cache and then from the switch state.
    ///
    /// Returns false if there was no entry. A blocking flush returns whether
    /// the switch state actually changed; a non-blocking one returns true as
    /// soon as the cache entry is gone.
    #[instrument(level = "debug", skip(self), fields(vlan = %self.vlan_id))]
    pub fn flush_entry(&mut self, ip: A, blocking: bool) -> bool {
        if !self.remove_entry(ip) {
            return false;
        }
        self.assert_uncached(ip);

        let vlan_id = self.vlan_id;
        let update: StateUpdateFn = Box::new(move |state| {
            let mut new_state = state.clone();
            SwitchState::remove_neighbor::<A>(&mut new_state, vlan_id, ip).then_some(new_state)
        });

        if !blocking {
            self.sw.update_state("remove neighbor entry", update);
            return true;
        }
        match self.sw.update_state_blocking("flush neighbor entry", update) {
            Ok(new_state) => new_state.is_some(),
            Err(e) => {
                error!(%ip, vlan = %vlan_id, error = %e, "Failed to flush neighbor entry");
                false
            }
        }
    }

    pub fn flush_entry_blocking(&mut self, ip: A) -> bool {
        self.flush_entry(ip, true)
    }

    /// True if we are actively soliciting `ip`.
    pub fn is_solicited(&self, ip: A) -> bool {
        self.entries.get(&ip).is_some_and(|entry| entry.is_probing())
    }

    /// Snapshot of all entries, ordered by address.
    pub fn get_cache_data(&self) -> Vec<NeighborEntryInfo> {
        let mut data: Vec<NeighborEntryInfo> = self
            .entries
            .values()
            .map(|entry| {
                let fields = entry.get_fields();
                NeighborEntryInfo {
                    ip: fields.ip.into(),
                    mac: fields.mac,
                    port: fields.port,
                    interface_id: fields.interface_id,
                    vlan_id: self.vlan_id,
                    state: entry.get_state(),
                    probes_left: entry.probes_left(),
                }
            })
            .collect();
        data.sort_by_key(|info| info.ip);
        data
    }
}

impl<A: NeighborAddress> Drop for NeighborCacheImpl<A> {
    fn drop(&mut self) {
        // Entries must stop on the background event base, and all of them
        // must be stopped before we return.
        let background = &self.background;
        let stops: Vec<_> = self
            .entries
            .drain()
            .map(|(ip, entry)| {
                let handle = entry.destroy(background);
                async move { (ip, handle.await) }
            })
            .collect();

        for (ip, result) in futures::executor::block_on(futures::future::join_all(stops)) {
            if let Err(e) = result {
                error!(
                    %ip,
                    vlan = %self.vlan_id,
                    error = %e,
                    "Failed to stop neighbor cache entry"
                );
                std::process::abort();
            }
        }
        trace!(
            vlan = %self.vlan_id,
            vlan_name = %self.vlan_name,
            protocol = A::PROTOCOL,
            "Destroyed neighbor cache"
        );
    }
}

/// Checks that the VLAN still exists in `state` and that `fields.ip` is
/// still on a subnet attached to the entry's interface.
fn check_vlan_and_intf<A: NeighborAddress>(
    state: &SwitchState,
    fields: &EntryFields<A>,
    vlan_id: VlanId,
) -> bool {
    if state.get_vlans().get_vlan_if(vlan_id).is_none() {
        debug!(
            vlan = %vlan_id,
            ip = %fields.ip,
            mac = %fields.mac,
            "VLAN deleted before entry could be updated"
        );
        return false;
    }
    if !Interface::is_ip_attached(fields.ip.into(), fields.interface_id, state) {
        debug!(
            ip = %fields.ip,
            mac = %fields.mac,
            interface = %fields.interface_id,
            "Interface subnets changed before entry could be updated"
        );
        return false;
    }
    true
}
