//! Trait contracts for the kernel collaborators this crate does not
//! implement itself: the timer scheduler, the DPC queue, the work-item
//! queue, the signal queue and the system time counter.
//!
//! A real kernel embedding this crate supplies production
//! implementations of these traits. [`crate::sim`] supplies a
//! deterministic in-memory implementation used by this crate's own test
//! suite.

use alloc::sync::{Arc, Weak};

use crate::error::TimerResult;
use crate::process::ProcessId;

/// Opaque handle to a backing kernel timer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(pub u64);

/// Opaque handle to a backing DPC object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpcHandle(pub u64);

/// Opaque handle to a backing work-item object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItemHandle(pub u64);

/// Opaque handle to a queued signal-queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalEntryHandle(pub u64);

/// Scheduler coalescing policy requested when arming a timer.
///
/// `SoftWake` is the only policy the control surface ever requests: it
/// permits the scheduler to coalesce nearby expiries across timers to
/// reduce wakeups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakePolicy {
    SoftWake,
}

/// Result of attempting to cancel a DPC that may already be running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpcCancelOutcome {
    /// The DPC was pending and has been removed; it will not run.
    Cancelled,
    /// The DPC had already been dispatched; the caller must flush the
    /// queue on the DPC's CPU to rendezvous with it.
    AlreadyDispatched,
}

/// The kernel timer scheduler.
pub trait Scheduler: Send + Sync {
    /// Allocate a new, disarmed backing timer.
    fn create_timer(&self) -> TimerResult<TimerHandle>;
    /// Destroy a backing timer. The timer must not be armed.
    fn destroy_timer(&self, timer: TimerHandle);
    /// Arm `timer` to fire at `due` and, if `interval` is non-zero,
    /// periodically every `interval` ticks thereafter, invoking `dpc`
    /// on expiry.
    fn queue_timer(
        &self,
        timer: TimerHandle,
        policy: WakePolicy,
        due: u64,
        interval: u64,
        dpc: DpcHandle,
    ) -> TimerResult<()>;
    /// Disarm a timer. No-op if already disarmed.
    fn cancel_timer(&self, timer: TimerHandle);
    /// The absolute tick at which an armed timer will next fire, or 0 if
    /// disarmed.
    fn due_time(&self, timer: TimerHandle) -> u64;
}

/// The deferred-procedure-call queue.
///
/// A DPC runs at elevated, non-preemptible priority on the CPU that
/// observed the expiry; it may not block or allocate.
pub trait DpcQueue: Send + Sync {
    /// Bind a new DPC to `record`; firing it invokes
    /// [`crate::expiry::on_dpc_fire`] for that record. The queue holds
    /// only a weak reference: a DPC binding does not by itself keep the
    /// record alive, matching the reference-count discipline in
    /// [`crate::timer_record`].
    fn create_dpc(&self, record: Weak<crate::timer_record::TimerRecord>) -> DpcHandle;
    /// Attempt to cancel a DPC before it runs.
    fn cancel_dpc(&self, dpc: DpcHandle) -> DpcCancelOutcome;
    /// Block until any in-flight instance of `dpc` has completed.
    fn flush_dpc(&self, dpc: DpcHandle);
    /// Release the DPC object. The DPC must not be pending or in flight.
    fn destroy_dpc(&self, dpc: DpcHandle);
}

/// The work-item queue (runs callbacks in a schedulable worker thread).
pub trait WorkQueue: Send + Sync {
    /// Bind a new work item to `record`; running it invokes
    /// [`crate::expiry::on_work_run`] for that record. Weak, for the
    /// same reason as [`DpcQueue::create_dpc`].
    fn create_work_item(
        &self,
        record: Weak<crate::timer_record::TimerRecord>,
    ) -> WorkItemHandle;
    /// Enqueue `work` to run. A no-op if already queued is not assumed;
    /// callers (the expiry pipeline) only ever queue on the leading edge
    /// or from completion, never redundantly.
    fn queue_work_item(&self, work: WorkItemHandle);
    /// Block until no instance of `work` is queued or running.
    fn flush_work_queue(&self, work: WorkItemHandle);
    /// Release the work item. Must not be queued or running.
    fn destroy_work_item(&self, work: WorkItemHandle);
}

/// The per-process signal queue.
pub trait SignalQueueApi: Send + Sync {
    /// Queue `entry` against `process`, to be delivered as signal
    /// `signal_number` with `overflow_count` and `payload` as context.
    /// When user mode consumes the signal, the collaborator must invoke
    /// [`crate::expiry::on_signal_completed`] for the originating
    /// record.
    fn signal_process(
        &self,
        process: ProcessId,
        signal_number: u32,
        overflow_count: u64,
        payload: u64,
        entry: SignalEntryHandle,
    ) -> TimerResult<()>;
    /// Cancel a queued entry before it is consumed, if still pending.
    fn cancel_queued_signal(&self, process: ProcessId, entry: SignalEntryHandle);
}

/// The monotonic system time counter.
pub trait TimeSource: Send + Sync {
    /// Current tick value.
    fn now(&self) -> u64;
}

/// The slice of process state this crate needs: identity, liveness and
/// the ability to be retained/released so a timer's owning process
/// cannot be destroyed out from under it.
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> ProcessId;
    /// Take a reference on the process, preventing its destruction while
    /// at least one timer references it.
    fn retain_process(&self);
    /// Release a reference taken by [`ProcessHandle::retain_process`].
    fn release_process(&self);
}

/// A cheaply-cloneable bundle of the five external collaborators, passed
/// to every operation that needs to reach outside the timer subsystem.
#[derive(Clone)]
pub struct Collaborators {
    pub scheduler: Arc<dyn Scheduler>,
    pub dpc_queue: Arc<dyn DpcQueue>,
    pub work_queue: Arc<dyn WorkQueue>,
    pub signal_queue: Arc<dyn SignalQueueApi>,
    pub time_source: Arc<dyn TimeSource>,
}
