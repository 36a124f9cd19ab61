//! The timer record: the sole first-class entity of this subsystem.
//!
//! A [`TimerRecord`] couples a backing kernel timer, a DPC, a work item
//! and a signal-queue entry into one lifecycle. Two distinct references
//! keep a record alive:
//!
//! - the *registry reference*: the `Arc<TimerRecord>` clone held in
//!   [`crate::registry::TimerRegistry`], from `Insert` until
//!   post-`Delete`-flush;
//! - the *in-flight reference*: a second `Arc<TimerRecord>` clone,
//!   stashed in this record's own `in_flight` slot by the expiry
//!   pipeline's leading-edge transition ([`crate::expiry::on_dpc_fire`])
//!   and taken back out by [`crate::expiry::on_signal_completed`] (or by
//!   forced teardown).
//!
//! Both are ordinary `Arc` clones; `Drop` runs exactly once, when the
//! last clone (of either kind) is dropped, and performs the destruction
//! described in the module docs: releasing the backing objects and the
//! process reference taken at creation.

use core::sync::atomic::{AtomicU64, Ordering};

use alloc::sync::Arc;
use spin::Mutex;

use crate::collab::{Collaborators, DpcHandle, SignalEntryHandle, TimerHandle, WorkItemHandle};
use crate::log_service::{klog, LogLevel};
use crate::process::ProcessId;

/// Identity of a timer, unique within its owning process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

impl core::fmt::Display for TimerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The signal payload selected at creation: either a caller-supplied
/// value, or the timer's own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalParameter {
    Value(u64),
    TimerId,
}

pub struct TimerRecord {
    /// Assigned once, by [`crate::registry::TimerRegistry::insert`],
    /// while holding the per-process lock — not at construction time,
    /// so that allocation (which may block) never happens under that
    /// lock.
    timer_id: AtomicU64,
    pub process_id: ProcessId,
    process: Arc<dyn crate::collab::ProcessHandle>,
    collaborators: Collaborators,

    /// Tick delta between periodic expiries; 0 = one-shot. The due time
    /// itself is not mirrored here: it is owned by the scheduler and
    /// read back through [`crate::collab::Scheduler::due_time`], since a
    /// self-tracked copy would go stale the moment a one-shot timer
    /// fires and naturally disarms.
    interval: AtomicU64,

    /// Hardware expiries observed since the last full drain.
    expiration_count: AtomicU64,
    /// Expiries beyond the one currently being reported to user mode.
    overflow_count: AtomicU64,

    signal_number: u32,
    signal_parameter: SignalParameter,

    timer_handle: TimerHandle,
    dpc_handle: DpcHandle,
    work_item_handle: WorkItemHandle,
    signal_entry_handle: SignalEntryHandle,

    /// The in-flight reference stashed by Stage A and reclaimed by
    /// Stage C (see [`crate::expiry`]).
    in_flight: Mutex<Option<Arc<TimerRecord>>>,
}

impl TimerRecord {
    /// Construct a new, disarmed timer record for `process`, allocating
    /// its backing objects through `collaborators`. Takes a reference on
    /// `process` that is released on destruction.
    ///
    /// `timer_id` is assigned by the registry before this is called; see
    /// [`crate::registry::TimerRegistry::insert`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        process: Arc<dyn crate::collab::ProcessHandle>,
        collaborators: Collaborators,
        signal_number: u32,
        signal_value: u64,
        use_timer_number: bool,
    ) -> crate::error::TimerResult<Arc<Self>> {
        let process_id = process.pid();
        let timer_handle = collaborators.scheduler.create_timer()?;

        let signal_parameter = if use_timer_number {
            SignalParameter::TimerId
        } else {
            SignalParameter::Value(signal_value)
        };

        process.retain_process();

        let record = Arc::new_cyclic(|weak| {
            let dpc_handle = collaborators.dpc_queue.create_dpc(weak.clone());
            let work_item_handle = collaborators.work_queue.create_work_item(weak.clone());
            TimerRecord {
                timer_id: AtomicU64::new(0),
                process_id,
                process,
                collaborators,
                interval: AtomicU64::new(0),
                expiration_count: AtomicU64::new(0),
                overflow_count: AtomicU64::new(0),
                signal_number,
                signal_parameter,
                timer_handle,
                dpc_handle,
                work_item_handle,
                signal_entry_handle: SignalEntryHandle(timer_handle.0),
                in_flight: Mutex::new(None),
            }
        });

        klog(LogLevel::Debug, "timer", "created record");

        Ok(record)
    }

    pub fn timer_id(&self) -> TimerId {
        TimerId(self.timer_id.load(Ordering::Acquire))
    }

    /// Assign the record's id. Called exactly once, by
    /// [`crate::registry::TimerRegistry::insert`] while holding the
    /// process lock.
    pub(crate) fn set_timer_id(&self, id: TimerId) {
        self.timer_id.store(id.0, Ordering::Release);
    }

    pub fn interval(&self) -> u64 {
        self.interval.load(Ordering::Acquire)
    }

    pub fn set_interval(&self, value: u64) {
        self.interval.store(value, Ordering::Release);
    }

    pub fn timer_handle(&self) -> TimerHandle {
        self.timer_handle
    }

    pub fn dpc_handle(&self) -> DpcHandle {
        self.dpc_handle
    }

    pub fn work_item_handle(&self) -> WorkItemHandle {
        self.work_item_handle
    }

    pub fn signal_entry_handle(&self) -> SignalEntryHandle {
        self.signal_entry_handle
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn signal_number(&self) -> u32 {
        self.signal_number
    }

    /// The payload to publish with the next delivered signal.
    pub fn signal_payload(&self) -> u64 {
        match self.signal_parameter {
            SignalParameter::Value(v) => v,
            SignalParameter::TimerId => self.timer_id().0,
        }
    }

    pub(crate) fn expiration_count(&self) -> &AtomicU64 {
        &self.expiration_count
    }

    pub(crate) fn overflow_count(&self) -> &AtomicU64 {
        &self.overflow_count
    }

    pub fn overflow_count_snapshot(&self) -> u64 {
        self.overflow_count.load(Ordering::Acquire)
    }

    /// Stage A's leading-edge hook: stash an additional ("in-flight")
    /// reference to `self` so the record survives until
    /// [`TimerRecord::take_in_flight`] releases it. Panics (debug only)
    /// if a reference is already stashed, which would indicate the
    /// leading-edge test in [`crate::expiry::on_dpc_fire`] fired twice
    /// without an intervening drain.
    pub(crate) fn stash_in_flight(self: &Arc<Self>) {
        let mut slot = self.in_flight.lock();
        debug_assert!(slot.is_none(), "in-flight reference already held");
        *slot = Some(self.clone());
    }

    /// Stage C's (or teardown's) release hook: take back the in-flight
    /// reference stashed by [`TimerRecord::stash_in_flight`], dropping
    /// it on return. Returns `true` if a reference was present.
    pub(crate) fn take_in_flight(&self) -> bool {
        self.in_flight.lock().take().is_some()
    }
}

impl Drop for TimerRecord {
    fn drop(&mut self) {
        klog(LogLevel::Debug, "timer", "destroying record");
        self.collaborators.scheduler.destroy_timer(self.timer_handle);
        self.collaborators.dpc_queue.destroy_dpc(self.dpc_handle);
        self.collaborators
            .work_queue
            .destroy_work_item(self.work_item_handle);
        self.process.release_process();
    }
}
