//! Shared fixtures for neighbor cache integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use sonic_neighcache::{
    CacheContext, EventBase, Interface, InterfaceId, IpPrefix, MacAddress, NeighborAddress,
    NeighborCache, NeighborCacheConfig, NeighborNode, NeighborProber, Result, StateUpdateFn,
    StateUpdater, SwitchState, SwitchStateUpdater, UpdateStats, Vlan, VlanId,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const VLAN: u16 = 10;
pub const OTHER_VLAN: u16 = 20;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn vlan_id(id: u16) -> VlanId {
    VlanId::new(id).expect("valid VLAN")
}

pub fn mac(s: &str) -> MacAddress {
    s.parse().expect("valid MAC")
}

pub fn prefix(s: &str) -> IpPrefix {
    s.parse().expect("valid prefix")
}

/// VLAN 10 on interface 10 (10.0.0.1/24, 2001:db8::1/64) and VLAN 20 on
/// interface 20 (10.0.20.1/24).
pub fn base_state() -> Arc<SwitchState> {
    Arc::new(SwitchState::new())
        .with_vlan(Vlan::new(vlan_id(VLAN), "Vlan10", InterfaceId(10)))
        .with_vlan(Vlan::new(vlan_id(OTHER_VLAN), "Vlan20", InterfaceId(20)))
        .with_interface(Interface::new(
            InterfaceId(10),
            "Vlan10",
            vlan_id(VLAN),
            vec![prefix("10.0.0.1/24"), prefix("2001:db8::1/64")],
        ))
        .with_interface(Interface::new(
            InterfaceId(20),
            "Vlan20",
            vlan_id(OTHER_VLAN),
            vec![prefix("10.0.20.1/24")],
        ))
}

/// Timers long enough that they never fire during a test; entries only
/// move when the test ticks them.
pub fn manual_config(max_probes: u32) -> NeighborCacheConfig {
    NeighborCacheConfig {
        reachable_timeout_secs: 3600,
        max_probes,
        probe_interval_ms: 3_600_000,
        stale_interval_secs: 3600,
        delay_interval_secs: 3600,
        ..Default::default()
    }
}

/// Node for `ip` on `vlan` in `state`, if any.
pub fn node<A: NeighborAddress>(
    state: &SwitchState,
    vlan: u16,
    ip: A,
) -> Option<Arc<NeighborNode<A>>> {
    state
        .get_vlans()
        .get_vlan_if(vlan_id(vlan))?
        .neighbor_table::<A>()
        .get_node_if(ip)
        .cloned()
}

/// Polls `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Switch state updater that records the name of every submitted update.
pub struct RecordingUpdater {
    inner: SwitchStateUpdater,
    names: Mutex<Vec<String>>,
}

impl RecordingUpdater {
    pub fn new(initial: Arc<SwitchState>) -> Arc<Self> {
        Arc::new(Self {
            inner: SwitchStateUpdater::new(initial).expect("updater"),
            names: Mutex::new(Vec::new()),
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.names.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names.lock().iter().filter(|n| *n == name).count()
    }

    pub fn stats(&self) -> &UpdateStats {
        self.inner.stats()
    }

    pub fn wait(&self) {
        self.inner.wait_for_updates().expect("pipeline running");
    }
}

impl StateUpdater for RecordingUpdater {
    fn state(&self) -> Arc<SwitchState> {
        self.inner.state()
    }

    fn update_state(&self, name: &str, f: StateUpdateFn) {
        self.names.lock().push(name.to_string());
        self.inner.update_state(name, f);
    }

    fn update_state_blocking(
        &self,
        name: &str,
        f: StateUpdateFn,
    ) -> Result<Option<Arc<SwitchState>>> {
        self.names.lock().push(name.to_string());
        self.inner.update_state_blocking(name, f)
    }
}

/// Prober that remembers which addresses it was asked to solicit.
pub struct RecordingProber<A> {
    probes: Mutex<Vec<A>>,
}

impl<A> Default for RecordingProber<A> {
    fn default() -> Self {
        Self {
            probes: Mutex::new(Vec::new()),
        }
    }
}

impl<A: NeighborAddress> RecordingProber<A> {
    pub fn probes(&self) -> Vec<A> {
        self.probes.lock().clone()
    }
}

impl<A: NeighborAddress> NeighborProber<A> for RecordingProber<A> {
    fn probe_for(&self, ip: A, _vlan_id: VlanId, _interface_id: InterfaceId) {
        self.probes.lock().push(ip);
    }
}

/// A cache for VLAN 10 wired to a recording pipeline and prober.
pub struct Harness<A: NeighborAddress> {
    pub sw: Arc<RecordingUpdater>,
    pub background: Arc<EventBase>,
    pub prober: Arc<RecordingProber<A>>,
    pub ctx: CacheContext<A>,
    pub cache: Arc<NeighborCache<A>>,
}

impl<A: NeighborAddress> Harness<A> {
    pub fn new(config: NeighborCacheConfig) -> Self {
        Self::with_state(base_state(), config)
    }

    pub fn with_state(state: Arc<SwitchState>, config: NeighborCacheConfig) -> Self {
        init_tracing();
        let sw = RecordingUpdater::new(state);
        let background = EventBase::new("neigh-bg").expect("event base");
        let prober = Arc::new(RecordingProber::default());
        let ctx = CacheContext {
            sw: sw.clone(),
            background: background.clone(),
            prober: prober.clone(),
            config: Arc::new(config),
        };
        let cache = NeighborCache::new(&ctx, vlan_id(VLAN), "Vlan10", InterfaceId(10));
        Self {
            sw,
            background,
            prober,
            ctx,
            cache,
        }
    }

    /// Current switch state after every submitted update has been applied.
    pub fn settled_state(&self) -> Arc<SwitchState> {
        self.sw.wait();
        self.sw.state()
    }
}
