//! Single-writer switch state update pipeline
//!
//! Callers submit named closures `f(&current) -> Option<new>`. The pipeline
//! runs them one at a time, in submission order, on its own event base
//! thread. Returning `None` (or the revision that was passed in) discards the
//! update and leaves the current revision untouched.

use crate::error::Result;
use crate::event_base::{CompletionHandle, EventBase};
use crate::state::SwitchState;
use arc_swap::ArcSwap;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, trace};

/// Mutation closure applied against the revision current at commit time.
pub type StateUpdateFn =
    Box<dyn FnOnce(&Arc<SwitchState>) -> Option<Arc<SwitchState>> + Send + 'static>;

/// Serialized writer of the switch state tree.
pub trait StateUpdater: Send + Sync {
    /// Most recently committed revision.
    fn state(&self) -> Arc<SwitchState>;

    /// Queues `f` and returns immediately.
    fn update_state(&self, name: &str, f: StateUpdateFn);

    /// Queues `f` and blocks until it has been applied.
    ///
    /// Returns the committed revision, or `None` if `f` discarded the update.
    fn update_state_blocking(
        &self,
        name: &str,
        f: StateUpdateFn,
    ) -> Result<Option<Arc<SwitchState>>>;
}

/// Update pipeline counters
#[derive(Debug, Default)]
pub struct UpdateStats {
    submitted: AtomicU64,
    applied: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
}

impl UpdateStats {
    /// Updates queued so far
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Updates that produced a new revision
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }

    /// Updates that returned no mutation
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::SeqCst)
    }

    /// Updates whose closure panicked
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// [`StateUpdater`] backed by an [`ArcSwap`] and a dedicated event base.
///
/// Readers load the current revision lock-free; only the pipeline thread
/// stores new ones.
pub struct SwitchStateUpdater {
    current: Arc<ArcSwap<SwitchState>>,
    evb: Arc<EventBase>,
    stats: Arc<UpdateStats>,
}

impl SwitchStateUpdater {
    pub fn new(initial: Arc<SwitchState>) -> Result<Self> {
        Ok(Self {
            current: Arc::new(ArcSwap::new(initial)),
            evb: EventBase::new("sw-updates")?,
            stats: Arc::new(UpdateStats::default()),
        })
    }

    pub fn stats(&self) -> &UpdateStats {
        &self.stats
    }

    /// Blocks until every update submitted before this call has been applied.
    pub fn wait_for_updates(&self) -> Result<()> {
        self.assert_not_pipeline_thread("wait_for_updates");
        self.evb.run_in_event_base(|| ()).wait()
    }

    fn schedule(
        &self,
        name: &str,
        f: StateUpdateFn,
    ) -> CompletionHandle<Option<Arc<SwitchState>>> {
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        let current = self.current.clone();
        let stats = self.stats.clone();
        let name = name.to_string();
        self.evb
            .run_in_event_base(move || apply(&current, &stats, &name, f))
    }

    fn assert_not_pipeline_thread(&self, op: &str) {
        assert!(
            !self.evb.in_event_base_thread(),
            "{} called from the state update thread would deadlock",
            op
        );
    }
}

impl StateUpdater for SwitchStateUpdater {
    fn state(&self) -> Arc<SwitchState> {
        self.current.load_full()
    }

    fn update_state(&self, name: &str, f: StateUpdateFn) {
        // Outcome is observed through the stats and the published revision
        let _ = self.schedule(name, f);
    }

    fn update_state_blocking(
        &self,
        name: &str,
        f: StateUpdateFn,
    ) -> Result<Option<Arc<SwitchState>>> {
        self.assert_not_pipeline_thread(name);
        self.schedule(name, f).wait()
    }
}

fn apply(
    current: &ArcSwap<SwitchState>,
    stats: &UpdateStats,
    name: &str,
    f: StateUpdateFn,
) -> Option<Arc<SwitchState>> {
    let old = current.load_full();
    match catch_unwind(AssertUnwindSafe(|| f(&old))) {
        Ok(Some(mut new)) if !Arc::ptr_eq(&old, &new) => {
            let generation = old.generation() + 1;
            Arc::make_mut(&mut new).set_generation(generation);
            current.store(new.clone());
            stats.applied.fetch_add(1, Ordering::SeqCst);
            debug!(update = name, generation, "Applied state update");
            Some(new)
        }
        Ok(_) => {
            stats.discarded.fetch_add(1, Ordering::SeqCst);
            trace!(update = name, "State update made no changes");
            None
        }
        Err(payload) => {
            stats.failed.fetch_add(1, Ordering::SeqCst);
            error!(update = name, "State update panicked, state left unchanged");
            resume_unwind(payload)
        }
    }
}
