//! Integration tests for the per-VLAN neighbor cache
//!
//! Each test runs a real background event base and switch state pipeline.
//! Timers are configured long enough that entries only move when a test
//! ticks them with `process_entry`, except where autonomous aging is the
//! point of the test.

mod common;

use common::*;
use mockall::mock;
use mockall::predicate::eq;
use pretty_assertions::assert_eq;
use sonic_neighcache::{
    InterfaceId, NeighborCache, NeighborCacheConfig, NeighborEntryState, NeighborProber, PortId,
    StateUpdater, SwitchState, VlanId,
};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

fn ip(s: &str) -> Ipv4Addr {
    s.parse().expect("valid IPv4")
}

const MAC: &str = "aa:bb:cc:dd:ee:ff";

#[test]
fn test_set_entry_programs_node() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    h.cache
        .set_entry(ip("10.0.0.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);

    assert_eq!(h.cache.get_state(ip("10.0.0.5")), Some(NeighborEntryState::Reachable));

    let state = h.settled_state();
    let node = node(&state, VLAN, ip("10.0.0.5")).expect("node programmed");
    assert!(!node.is_pending());
    assert_eq!(node.mac(), mac(MAC));
    assert_eq!(node.port(), PortId(7));
    assert_eq!(node.interface_id(), InterfaceId(10));
    assert_eq!(state.generation(), 1);
    assert_eq!(h.sw.names(), vec!["add neighbor 10.0.0.5".to_string()]);
}

#[test]
fn test_identical_set_entry_commits_once() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    for _ in 0..2 {
        h.cache
            .set_entry(ip("10.0.0.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);
    }

    let state = h.settled_state();
    assert_eq!(state.generation(), 1);
    assert_eq!(h.sw.stats().applied(), 1);
    assert_eq!(h.sw.stats().discarded(), 1);
    assert_eq!(h.cache.len(), 1);
}

#[test]
fn test_moved_neighbor_updates_node() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    h.cache
        .set_entry(ip("10.0.0.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);
    h.cache.set_entry(
        ip("10.0.0.5"),
        mac("00:11:22:33:44:55"),
        PortId(9),
        NeighborEntryState::Reachable,
    );

    let state = h.settled_state();
    let node = node(&state, VLAN, ip("10.0.0.5")).expect("node programmed");
    assert_eq!(node.mac(), mac("00:11:22:33:44:55"));
    assert_eq!(node.port(), PortId(9));
    assert_eq!(state.generation(), 2);
}

#[test]
fn test_pending_does_not_clobber_resolved_entry() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    let target = ip("10.0.0.5");
    h.cache
        .set_entry(target, mac(MAC), PortId(7), NeighborEntryState::Reachable);
    h.cache.set_pending_entry(target, false);

    assert_eq!(h.cache.get_state(target), Some(NeighborEntryState::Reachable));
    assert!(!h.cache.lock().get_cache_entry(target).unwrap().is_pending());
    assert_eq!(h.sw.count("add pending entry 10.0.0.5"), 0);
    assert!(!node(&h.settled_state(), VLAN, target).unwrap().is_pending());

    h.cache.set_pending_entry(target, true);
    assert_eq!(h.cache.get_state(target), Some(NeighborEntryState::Incomplete));
    assert!(h.cache.lock().get_cache_entry(target).unwrap().is_pending());

    let node = node(&h.settled_state(), VLAN, target).unwrap();
    assert!(node.is_pending());
    assert!(node.mac().is_broadcast());
}

#[test]
fn test_pending_does_not_clobber_node_in_switch_state() {
    // The switch state already knows the neighbor but the cache does not
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    let target = ip("10.0.0.5");
    h.sw.update_state(
        "seed",
        Box::new(move |state| {
            let mut state = state.clone();
            SwitchState::modify_neighbor_table::<Ipv4Addr>(&mut state, vlan_id(VLAN))?
                .add_entry(sonic_neighcache::EntryFields::new(
                    target,
                    mac(MAC),
                    PortId(7),
                    InterfaceId(10),
                ));
            Some(state)
        }),
    );

    h.cache.set_pending_entry(target, false);
    assert_eq!(h.cache.get_state(target), Some(NeighborEntryState::Incomplete));

    let state = h.settled_state();
    assert!(!node(&state, VLAN, target).unwrap().is_pending());
    assert_eq!(h.sw.stats().discarded(), 1);
}

#[test]
fn test_update_discarded_when_vlan_removed_first() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    h.sw.update_state(
        "remove vlan",
        Box::new(|state| Some(state.without_vlan(vlan_id(VLAN)))),
    );
    let before = h.settled_state();

    h.cache
        .set_entry(ip("10.0.0.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);

    // Cache reflects the update even though the switch state cannot
    assert_eq!(h.cache.get_state(ip("10.0.0.5")), Some(NeighborEntryState::Reachable));
    let after = h.settled_state();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(h.sw.stats().discarded(), 1);
}

#[test]
fn test_update_discarded_when_vlan_removed_while_queued() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

    // Hold the pipeline so the neighbor update queues behind the removal
    h.sw.update_state(
        "hold",
        Box::new(move |_| {
            let _ = release_rx.recv();
            None
        }),
    );
    h.sw.update_state(
        "remove vlan",
        Box::new(|state| Some(state.without_vlan(vlan_id(VLAN)))),
    );
    h.cache
        .set_entry(ip("10.0.0.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);
    release_tx.send(()).unwrap();

    let state = h.settled_state();
    assert!(state.get_vlans().get_vlan_if(vlan_id(VLAN)).is_none());
    assert_eq!(h.sw.stats().applied(), 1);
    assert_eq!(h.cache.len(), 1);
}

#[test]
fn test_update_discarded_for_unattached_subnet() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    h.cache
        .set_entry(ip("10.0.1.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);

    let state = h.settled_state();
    assert!(node(&state, VLAN, ip("10.0.1.5")).is_none());
    assert_eq!(state.generation(), 0);
    assert_eq!(h.cache.len(), 1);
}

#[test]
fn test_set_existing_entry_requires_entry() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    h.cache
        .set_existing_entry(ip("10.0.0.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);
    assert!(h.cache.is_empty());
    assert!(h.sw.names().is_empty());

    h.cache.set_pending_entry(ip("10.0.0.5"), false);
    h.cache
        .set_existing_entry(ip("10.0.0.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);
    assert_eq!(h.cache.get_state(ip("10.0.0.5")), Some(NeighborEntryState::Reachable));
    assert!(!node(&h.settled_state(), VLAN, ip("10.0.0.5")).unwrap().is_pending());
}

#[test]
fn test_remove_entry_is_immediate() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    h.cache
        .set_entry(ip("10.0.0.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);

    assert!(h.cache.remove_entry(ip("10.0.0.5")));
    assert_eq!(h.cache.get_state(ip("10.0.0.5")), None);
    assert!(!h.cache.remove_entry(ip("10.0.0.5")));

    // Only the cache is affected
    assert!(node(&h.settled_state(), VLAN, ip("10.0.0.5")).is_some());
}

#[test]
fn test_flush_entry_non_blocking() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    h.cache
        .set_entry(ip("10.0.0.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);

    assert!(h.cache.flush_entry(ip("10.0.0.5"), false));
    assert_eq!(h.cache.get_state(ip("10.0.0.5")), None);
    assert!(!h.cache.flush_entry(ip("10.0.0.5"), false));

    let state = h.settled_state();
    assert!(node(&state, VLAN, ip("10.0.0.5")).is_none());
    assert_eq!(h.sw.count("remove neighbor entry"), 1);
}

#[test]
fn test_flush_entry_blocking_reports_outcome() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    h.cache
        .set_entry(ip("10.0.0.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);
    // Never reaches the switch state: not on an attached subnet
    h.cache
        .set_entry(ip("10.0.1.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);

    assert!(h.cache.flush_entry_blocking(ip("10.0.0.5")));
    assert!(node(&h.sw.state(), VLAN, ip("10.0.0.5")).is_none());

    assert!(!h.cache.flush_entry_blocking(ip("10.0.1.5")));
    assert!(h.cache.is_empty());
    assert!(!h.cache.flush_entry_blocking(ip("10.0.0.9")));
    assert_eq!(h.sw.count("flush neighbor entry"), 2);
}

#[test]
fn test_flush_entry_from_switch_state() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    h.cache
        .set_entry(ip("10.0.0.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);
    let mut state = h.settled_state();
    h.cache.remove_entry(ip("10.0.0.5"));

    let cache = h.cache.lock();
    let original = state.clone();
    assert!(cache.flush_entry_from_switch_state(&mut state, vlan_id(VLAN), ip("10.0.0.5")));
    assert!(node(&state, VLAN, ip("10.0.0.5")).is_none());
    assert!(node(&original, VLAN, ip("10.0.0.5")).is_some());

    assert!(!cache.flush_entry_from_switch_state(&mut state, vlan_id(VLAN), ip("10.0.0.5")));
    assert!(!cache.flush_entry_from_switch_state(
        &mut state,
        vlan_id(OTHER_VLAN),
        ip("10.0.0.5")
    ));
}

#[test]
#[should_panic(expected = "still cached")]
fn test_flush_from_switch_state_requires_uncached_entry() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    h.cache
        .set_entry(ip("10.0.0.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);
    let mut state = h.settled_state();
    h.cache
        .lock()
        .flush_entry_from_switch_state(&mut state, vlan_id(VLAN), ip("10.0.0.5"));
}

#[test]
fn test_port_down_only_affects_port() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    h.cache
        .set_entry(ip("10.0.0.5"), mac(MAC), PortId(7), NeighborEntryState::Reachable);
    h.cache
        .set_entry(ip("10.0.0.6"), mac("00:11:22:33:44:55"), PortId(7), NeighborEntryState::Stale);
    h.cache
        .set_entry(ip("10.0.0.7"), mac("00:11:22:33:44:66"), PortId(8), NeighborEntryState::Reachable);

    h.cache.port_down(PortId(7));

    for down in ["10.0.0.5", "10.0.0.6"] {
        assert_eq!(h.cache.get_state(ip(down)), Some(NeighborEntryState::Incomplete));
        assert!(h.cache.lock().get_cache_entry(ip(down)).unwrap().is_pending());
    }
    assert_eq!(h.cache.get_state(ip("10.0.0.7")), Some(NeighborEntryState::Reachable));

    let state = h.settled_state();
    assert!(node(&state, VLAN, ip("10.0.0.5")).unwrap().is_pending());
    assert!(node(&state, VLAN, ip("10.0.0.6")).unwrap().is_pending());
    assert!(!node(&state, VLAN, ip("10.0.0.7")).unwrap().is_pending());
    assert_eq!(h.sw.count("add pending entry 10.0.0.5"), 1);
    assert_eq!(h.sw.count("add pending entry 10.0.0.7"), 0);
}

#[test]
fn test_aging_expires_unresolved_entry() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    let target = ip("10.0.0.5");
    h.cache.set_pending_entry(target, false);
    assert!(node(&h.settled_state(), VLAN, target).is_some());

    for _ in 0..3 {
        h.cache.process_entry(target);
        assert_eq!(h.cache.get_state(target), Some(NeighborEntryState::Incomplete));
    }
    assert_eq!(h.prober.probes(), vec![target; 3]);

    h.cache.process_entry(target);
    assert_eq!(h.cache.get_state(target), None);
    assert!(node(&h.settled_state(), VLAN, target).is_none());
    assert_eq!(h.prober.probes().len(), 3);
}

#[test]
fn test_resolved_entry_ages_through_probe() {
    let h = Harness::<Ipv4Addr>::new(manual_config(2));
    let target = ip("10.0.0.5");
    h.cache
        .set_entry(target, mac(MAC), PortId(7), NeighborEntryState::Reachable);

    h.cache.process_entry(target);
    assert_eq!(h.cache.get_state(target), Some(NeighborEntryState::Stale));
    assert!(h.prober.probes().is_empty());

    h.cache.process_entry(target);
    assert_eq!(h.cache.get_state(target), Some(NeighborEntryState::Probe));
    assert!(h.cache.is_solicited(target));

    // A reply puts it back to reachable
    h.cache
        .set_entry(target, mac(MAC), PortId(7), NeighborEntryState::Reachable);
    assert!(!h.cache.is_solicited(target));

    h.cache.process_entry(target);
    h.cache.process_entry(target);
    h.cache.process_entry(target);
    h.cache.process_entry(target);
    assert_eq!(h.cache.get_state(target), None);
    assert_eq!(h.prober.probes().len(), 3);
}

#[test]
fn test_timers_expire_entry_without_ticks() {
    let config = NeighborCacheConfig {
        probe_interval_ms: 10,
        max_probes: 2,
        ..manual_config(2)
    };
    let h = Harness::<Ipv4Addr>::new(config);
    let target = ip("10.0.0.5");
    h.cache.set_pending_entry(target, false);

    assert!(wait_until(Duration::from_secs(5), || h.cache.is_empty()));
    assert_eq!(h.prober.probes(), vec![target, target]);
    assert!(node(&h.settled_state(), VLAN, target).is_none());
}

#[test]
fn test_external_tick_rearms_entry_timer() {
    let config = NeighborCacheConfig {
        probe_interval_ms: 10,
        ..manual_config(2)
    };
    let h = Harness::<Ipv4Addr>::new(config);
    let target = ip("10.0.0.5");
    h.cache
        .set_entry(target, mac(MAC), PortId(7), NeighborEntryState::Stale);

    // Moves to PROBE; from here on the probe interval drives the entry, not
    // the hour-long stale interval it was armed with
    h.cache.process_entry(target);
    assert_eq!(h.cache.get_state(target), Some(NeighborEntryState::Probe));

    assert!(wait_until(Duration::from_secs(5), || h.cache.is_empty()));
    assert_eq!(h.prober.probes(), vec![target, target]);
    assert!(node(&h.settled_state(), VLAN, target).is_none());
}

#[test]
fn test_pending_then_resolved_scenario() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    let target = ip("10.0.0.5");

    h.cache.set_pending_entry(target, false);
    assert_eq!(h.cache.get_state(target), Some(NeighborEntryState::Incomplete));

    h.cache
        .set_entry(target, mac(MAC), PortId(7), NeighborEntryState::Reachable);
    assert_eq!(h.cache.len(), 1);
    assert_eq!(h.cache.get_state(target), Some(NeighborEntryState::Reachable));
    assert!(!h.cache.lock().get_cache_entry(target).unwrap().is_pending());

    let state = h.settled_state();
    assert_eq!(h.sw.count("add neighbor 10.0.0.5"), 1);
    let node = node(&state, VLAN, target).unwrap();
    assert!(!node.is_pending());
    assert_eq!(node.mac(), mac(MAC));
    assert_eq!(node.port(), PortId(7));
}

#[test]
fn test_repopulate_from_switch_state() {
    let state = base_state();
    let mut seeded = state.clone();
    {
        let table = SwitchState::modify_neighbor_table::<Ipv4Addr>(&mut seeded, vlan_id(VLAN))
            .unwrap();
        table.add_entry(sonic_neighcache::EntryFields::new(
            ip("10.0.0.5"),
            mac(MAC),
            PortId(7),
            InterfaceId(10),
        ));
        table.add_pending_entry(ip("10.0.0.6"), InterfaceId(10));
    }

    let h = Harness::<Ipv4Addr>::with_state(seeded.clone(), manual_config(3));
    let table = seeded
        .get_vlans()
        .get_vlan_if(vlan_id(VLAN))
        .unwrap()
        .arp_table()
        .clone();
    h.cache.repopulate(&table);

    assert_eq!(h.cache.get_state(ip("10.0.0.5")), Some(NeighborEntryState::Stale));
    assert_eq!(h.cache.get_state(ip("10.0.0.6")), Some(NeighborEntryState::Incomplete));
    assert!(h.cache.is_solicited(ip("10.0.0.6")));
    assert!(h.sw.names().is_empty());
}

#[test]
fn test_is_solicited_uses_configured_states() {
    let config = NeighborCacheConfig {
        probing_states: vec![
            NeighborEntryState::Incomplete,
            NeighborEntryState::Probe,
            NeighborEntryState::Delay,
        ],
        ..manual_config(3)
    };
    let h = Harness::<Ipv4Addr>::new(config);
    let target = ip("10.0.0.5");
    assert!(!h.cache.is_solicited(target));

    h.cache
        .set_entry(target, mac(MAC), PortId(7), NeighborEntryState::Delay);
    assert!(h.cache.is_solicited(target));
    h.cache
        .set_entry(target, mac(MAC), PortId(7), NeighborEntryState::Stale);
    assert!(!h.cache.is_solicited(target));
}

#[test]
fn test_ndp_cache_uses_ndp_table() {
    let h = Harness::<Ipv6Addr>::new(manual_config(3));
    let target: Ipv6Addr = "2001:db8::5".parse().unwrap();
    h.cache
        .set_entry(target, mac(MAC), PortId(3), NeighborEntryState::Reachable);

    let state = h.settled_state();
    let vlan = state.get_vlans().get_vlan_if(vlan_id(VLAN)).unwrap();
    assert!(vlan.ndp_table().get_node_if(target).is_some());
    assert!(vlan.arp_table().is_empty());
    assert_eq!(h.sw.names(), vec!["add neighbor 2001:db8::5".to_string()]);
}

#[test]
fn test_cache_data_serializes() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    h.cache
        .set_entry(ip("10.0.0.6"), mac(MAC), PortId(7), NeighborEntryState::Reachable);
    h.cache.set_pending_entry(ip("10.0.0.5"), false);

    let data = h.cache.get_cache_data();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0].ip, std::net::IpAddr::V4(ip("10.0.0.5")));
    assert_eq!(data[0].state, NeighborEntryState::Incomplete);
    assert_eq!(data[1].vlan_id, vlan_id(VLAN));

    let json = serde_json::to_value(&data).unwrap();
    assert_eq!(json[1]["ip"], "10.0.0.6");
    assert_eq!(json[1]["mac"], MAC);
    assert_eq!(json[1]["state"], "REACHABLE");
    assert_eq!(json[1]["vlan_id"], 10);
}

#[test]
fn test_drop_destroys_entries_on_background() {
    let h = Harness::<Ipv4Addr>::new(manual_config(3));
    for last in 2..50u8 {
        h.cache.set_entry(
            Ipv4Addr::new(10, 0, 0, last),
            mac(MAC),
            PortId(u32::from(last % 4)),
            NeighborEntryState::Reachable,
        );
    }
    let weak = Arc::downgrade(&h.cache);
    let Harness {
        background, cache, ..
    } = h;
    drop(cache);

    assert!(weak.upgrade().is_none());
    // Background context is still healthy after teardown
    assert_eq!(background.run_in_event_base(|| 1u32).wait().unwrap(), 1);
}

#[test]
fn test_drop_with_fast_timers_does_not_hang() {
    for _ in 0..20 {
        let config = NeighborCacheConfig {
            probe_interval_ms: 1,
            ..manual_config(1000)
        };
        let h = Harness::<Ipv4Addr>::new(config);
        for last in 2..20u8 {
            h.cache.set_pending_entry(Ipv4Addr::new(10, 0, 0, last), false);
        }
        std::thread::sleep(Duration::from_millis(3));
        drop(h);
    }
}

mock! {
    Prober {}

    impl NeighborProber<Ipv4Addr> for Prober {
        fn probe_for(&self, ip: Ipv4Addr, vlan_id: VlanId, interface_id: InterfaceId);
    }
}

#[test]
fn test_probe_targets_cache_vlan_and_interface() {
    init_tracing();
    let target = ip("10.0.0.5");
    let mut prober = MockProber::new();
    prober
        .expect_probe_for()
        .with(eq(target), eq(vlan_id(VLAN)), eq(InterfaceId(10)))
        .times(2)
        .return_const(());

    let sw = RecordingUpdater::new(base_state());
    let ctx = sonic_neighcache::CacheContext {
        sw: sw.clone(),
        background: sonic_neighcache::EventBase::new("neigh-bg").unwrap(),
        prober: Arc::new(prober),
        config: Arc::new(manual_config(2)),
    };
    let cache = NeighborCache::new(&ctx, vlan_id(VLAN), "Vlan10", InterfaceId(10));
    cache.set_pending_entry(target, false);
    cache.process_entry(target);
    cache.process_entry(target);
    cache.process_entry(target);
    assert!(cache.is_empty());
}
