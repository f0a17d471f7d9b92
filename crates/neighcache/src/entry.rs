//! Neighbor cache entries
//!
//! Each entry carries its resolution state machine and a timer task on the
//! background event base. The timer fires after a state-dependent interval
//! and calls back into the owning cache, which advances the entry with
//! [`NeighborCacheEntry::process`]. Entries are owned by the cache and only
//! touched under the cache lock; they are retired on the background event
//! base with [`NeighborCacheEntry::destroy`].

use crate::config::NeighborCacheConfig;
use crate::event_base::{CompletionHandle, EventBase, panic_message};
use crate::state::NeighborAddress;
use crate::types::PortId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, trace};

pub use crate::state::EntryFields;

/// Resolution state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NeighborEntryState {
    /// No link-layer address yet; soliciting
    Incomplete,
    /// Traffic seen on a stale entry; waiting before probing
    Delay,
    /// Re-verifying a previously resolved entry
    Probe,
    /// Resolved but unconfirmed
    Stale,
    /// Recently confirmed
    Reachable,
    /// Out of probes; to be flushed
    Expired,
}

impl NeighborEntryState {
    /// States in which the entry sends solicitations on every tick.
    pub fn sends_probes(self) -> bool {
        matches!(self, Self::Incomplete | Self::Probe)
    }
}

impl fmt::Display for NeighborEntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Incomplete => "INCOMPLETE",
            Self::Delay => "DELAY",
            Self::Probe => "PROBE",
            Self::Stale => "STALE",
            Self::Reachable => "REACHABLE",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// Side effect requested by a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    None,
    /// Send a solicitation for the entry's address
    Probe,
}

/// A cached neighbor binding and its resolution state machine.
pub struct NeighborCacheEntry<A: NeighborAddress> {
    fields: EntryFields<A>,
    state: NeighborEntryState,
    probes_left: u32,
    config: Arc<NeighborCacheConfig>,
    timer: EntryTimer,
}

impl<A: NeighborAddress> NeighborCacheEntry<A> {
    /// Creates an entry and starts its timer on `evb`.
    ///
    /// `tick` runs on the event base thread each time the timer fires and
    /// returns the interval until the next tick, or `None` to stop.
    pub(crate) fn new<F>(
        fields: EntryFields<A>,
        state: NeighborEntryState,
        config: Arc<NeighborCacheConfig>,
        evb: &EventBase,
        tick: F,
    ) -> Self
    where
        F: FnMut() -> Option<Duration> + Send + 'static,
    {
        let interval = timer_interval(&config, state);
        Self {
            fields,
            state,
            probes_left: config.max_probes,
            timer: EntryTimer::start(evb, interval, tick),
            config,
        }
    }

    pub fn get_fields(&self) -> &EntryFields<A> {
        &self.fields
    }

    pub fn get_ip(&self) -> A {
        self.fields.ip
    }

    pub fn get_port(&self) -> PortId {
        self.fields.port
    }

    pub fn get_state(&self) -> NeighborEntryState {
        self.state
    }

    /// Solicitations left before a probing entry expires.
    pub fn probes_left(&self) -> u32 {
        self.probes_left
    }

    pub fn fields_match(&self, fields: &EntryFields<A>) -> bool {
        self.fields == *fields
    }

    pub fn update_fields(&mut self, fields: EntryFields<A>) {
        debug_assert_eq!(self.fields.ip, fields.ip);
        self.fields = fields;
    }

    /// Moves the entry to `state` and re-arms its timer for that state.
    pub fn update_state(&mut self, state: NeighborEntryState) {
        if state == self.state {
            return;
        }
        if state.sends_probes() && !self.state.sends_probes() {
            self.probes_left = self.config.max_probes;
        }
        trace!(ip = %self.fields.ip, from = %self.state, to = %state, "Entry state changed");
        self.state = state;
        self.timer.rearm(timer_interval(&self.config, state));
    }

    /// True while the entry has no usable link-layer address.
    pub fn is_pending(&self) -> bool {
        self.fields.is_pending()
    }

    /// True if the entry is in one of the configured soliciting states.
    pub fn is_probing(&self) -> bool {
        self.config.is_probing_state(self.state)
    }

    /// Advances the state machine by one timer tick.
    ///
    /// A state change re-arms the timer for the new state.
    pub fn process(&mut self) -> EntryAction {
        let previous = self.state;
        let action = match self.state {
            NeighborEntryState::Incomplete | NeighborEntryState::Probe => {
                if self.probes_left == 0 {
                    self.state = NeighborEntryState::Expired;
                    EntryAction::None
                } else {
                    self.probes_left -= 1;
                    EntryAction::Probe
                }
            }
            NeighborEntryState::Reachable => {
                self.state = NeighborEntryState::Stale;
                EntryAction::None
            }
            NeighborEntryState::Stale | NeighborEntryState::Delay => {
                self.state = NeighborEntryState::Probe;
                self.probes_left = self.config.max_probes.saturating_sub(1);
                EntryAction::Probe
            }
            NeighborEntryState::Expired => EntryAction::None,
        };
        if self.state != previous {
            trace!(ip = %self.fields.ip, from = %previous, to = %self.state, "Entry aged");
            self.timer.rearm(timer_interval(&self.config, self.state));
        }
        action
    }

    /// Interval until the entry's next tick in its current state.
    pub fn next_interval(&self) -> Duration {
        timer_interval(&self.config, self.state)
    }

    /// Stops the entry's timer and drops the entry on `evb`.
    ///
    /// Runs inline when called from the event base thread itself. An entry
    /// that fails to stop aborts the process.
    pub fn destroy(self, evb: &EventBase) -> CompletionHandle<()> {
        evb.run_immediately_or_in_event_base(move || {
            let ip = self.fields.ip;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(move || drop(self))) {
                error!(%ip, error = %panic_message(payload), "Failed to stop neighbor entry");
                std::process::abort();
            }
            trace!(%ip, "Destroyed neighbor entry");
        })
    }
}

impl<A: NeighborAddress> fmt::Debug for NeighborCacheEntry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeighborCacheEntry")
            .field("fields", &self.fields)
            .field("state", &self.state)
            .field("probes_left", &self.probes_left)
            .finish()
    }
}

// Expired entries get flushed on their next tick
fn timer_interval(config: &NeighborCacheConfig, state: NeighborEntryState) -> Duration {
    config
        .interval_for(state)
        .unwrap_or_else(|| config.probe_interval())
}

/// Periodic timer task of an entry.
///
/// The interval can be changed while the timer is sleeping; the new interval
/// restarts the wait. Dropping the timer aborts the task.
pub(crate) struct EntryTimer {
    task: JoinHandle<()>,
    interval: watch::Sender<Duration>,
}

impl EntryTimer {
    pub(crate) fn start<F>(evb: &EventBase, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Option<Duration> + Send + 'static,
    {
        let (tx, mut rx) = watch::channel(interval);
        let task = evb.spawn(async move {
            let mut interval = *rx.borrow_and_update();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => match tick() {
                        Some(next) => interval = next,
                        None => break,
                    },
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        interval = *rx.borrow_and_update();
                    }
                }
            }
        });
        Self {
            task,
            interval: tx,
        }
    }

    pub(crate) fn rearm(&self, interval: Duration) {
        self.interval.send_replace(interval);
    }
}

impl Drop for EntryTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
