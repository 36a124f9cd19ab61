//! `TimerControl` — the system-call-facing entry point.
//!
//! [`ControlSurface`] binds one [`TimerRegistry`] and one set of
//! [`Collaborators`] to a process and implements the four operations a
//! process may perform on its timers: `create`, `delete`, `get`, `set`.
//! All four acquire the registry's lock for their critical section; none
//! of them run at DPC level.

use alloc::sync::Arc;

use crate::collab::{Collaborators, DpcCancelOutcome, ProcessHandle, WakePolicy};
use crate::error::TimerResult;
use crate::log_service::{klog, LogLevel};
use crate::registry::TimerRegistry;
use crate::timer_record::{TimerId, TimerRecord};

/// Snapshot returned by `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetTimerResult {
    pub due_time: u64,
    pub period: u64,
    pub overflow_count: u64,
}

/// The record's schedule immediately before a `set`, returned so the
/// caller can restore it if desired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetTimerResult {
    pub previous_due_time: u64,
    pub previous_period: u64,
}

/// The process-facing entry point for timer control operations.
pub struct ControlSurface {
    registry: TimerRegistry,
    collaborators: Collaborators,
}

impl ControlSurface {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            registry: TimerRegistry::new(),
            collaborators,
        }
    }

    /// `CreateTimer`: allocate a disarmed record and publish it to the
    /// registry. On failure, any partial allocation performed by
    /// [`TimerRecord::new`] is released by that function's own error
    /// path (it does not publish a record it cannot fully construct).
    pub fn create(
        &self,
        process: Arc<dyn ProcessHandle>,
        signal_number: u32,
        signal_value: u64,
        use_timer_number: bool,
    ) -> TimerResult<TimerId> {
        let record = self.registry.create_and_insert(
            process,
            self.collaborators.clone(),
            signal_number,
            signal_value,
            use_timer_number,
        )?;
        klog(LogLevel::Info, "control", "timer created");
        Ok(record.timer_id())
    }

    /// `DeleteTimer`: unlink, flush, then drop the registry reference.
    /// After this returns, no signal attributable to this record will
    /// ever be delivered.
    pub fn delete(&self, id: TimerId) -> TimerResult<()> {
        let record = self.registry.remove_one(id)?;
        flush(&record);
        klog(LogLevel::Info, "control", "timer deleted");
        // `record` is the last remaining registry reference; dropping it
        // here runs `TimerRecord::drop` once no in-flight reference
        // remains (any in-flight reference was just quiesced by flush).
        drop(record);
        Ok(())
    }

    /// `GetTimer`: read the current schedule and overflow count.
    /// `due_time` is read from the live scheduler, not the record's own
    /// last-armed value, so a one-shot that has already fired (and
    /// naturally disarmed) reports `0` rather than its stale arm time.
    /// `overflow_count` is read, not cleared.
    pub fn get(&self, id: TimerId) -> TimerResult<GetTimerResult> {
        let record = self.registry.lookup(id).ok_or(crate::error::TimerError::InvalidHandle {
            timer_id: id.0,
        })?;
        Ok(GetTimerResult {
            due_time: self.collaborators.scheduler.due_time(record.timer_handle()),
            period: record.interval(),
            overflow_count: record.overflow_count_snapshot(),
        })
    }

    /// `SetTimer`: disarm, write the new schedule, re-arm if either
    /// field is non-zero. If `due_time == 0` and `period != 0`,
    /// the current time counter is substituted so the timer starts one
    /// period from now (see the design notes on this in `SPEC_FULL.md`).
    /// Returns the schedule as it was immediately before this call.
    /// On `SchedulerFailure` the new fields are left written (no
    /// rollback): a later `get`/`set` can still observe and correct
    /// them.
    pub fn set(&self, id: TimerId, due_time: u64, period: u64) -> TimerResult<SetTimerResult> {
        let record = self.registry.lookup(id).ok_or(crate::error::TimerError::InvalidHandle {
            timer_id: id.0,
        })?;

        let previous = SetTimerResult {
            previous_due_time: self.collaborators.scheduler.due_time(record.timer_handle()),
            previous_period: record.interval(),
        };

        // Cancelling an already-disarmed timer is a no-op, so there is
        // no need to consult prior arm state first.
        self.collaborators.scheduler.cancel_timer(record.timer_handle());

        record.set_interval(period);

        if due_time != 0 || period != 0 {
            let effective_due = if due_time == 0 {
                self.collaborators.time_source.now()
            } else {
                due_time
            };
            self.collaborators.scheduler.queue_timer(
                record.timer_handle(),
                WakePolicy::SoftWake,
                effective_due,
                period,
                record.dpc_handle(),
            )?;
        }

        klog(LogLevel::Debug, "control", "timer (re)armed");
        Ok(previous)
    }

    /// Process teardown: unlink every record, flush each (cancel timer
    /// and DPC only — not the work queue or signal, matching the
    /// original teardown path; see the design notes), and release each
    /// registry reference. Destruction of a record may be deferred to
    /// an in-flight callback still running after this returns.
    pub fn teardown_process(&self) {
        let records = self.registry.teardown_all();
        for record in records {
            self.collaborators.scheduler.cancel_timer(record.timer_handle());
            match self.collaborators.dpc_queue.cancel_dpc(record.dpc_handle()) {
                DpcCancelOutcome::Cancelled => {}
                DpcCancelOutcome::AlreadyDispatched => {
                    self.collaborators.dpc_queue.flush_dpc(record.dpc_handle());
                }
            }
            klog(LogLevel::Info, "control", "timer torn down with process");
            drop(record);
        }
    }

    pub fn timer_count(&self) -> usize {
        self.registry.len()
    }

    /// Expose the backing record for a timer id, so tests can drive the
    /// simulator's DPC/work/signal hooks directly. Not part of the
    /// operational `TimerControl` contract.
    #[cfg(any(test, feature = "sim"))]
    pub fn lookup_for_test(&self, id: TimerId) -> Arc<TimerRecord> {
        self.registry.lookup(id).expect("unknown timer id in test")
    }
}

/// The Flush protocol used by `Delete`: cancel the kernel timer, cancel
/// (or flush) the DPC, flush the work queue, then cancel any pending
/// signal. Each step quiesces the upstream stage before the next
/// proceeds, so by the time this returns, none of the record's backing
/// objects can ever invoke the expiry pipeline again.
fn flush(record: &Arc<TimerRecord>) {
    let collab = record.collaborators();

    collab.scheduler.cancel_timer(record.timer_handle());

    match collab.dpc_queue.cancel_dpc(record.dpc_handle()) {
        DpcCancelOutcome::Cancelled => {}
        DpcCancelOutcome::AlreadyDispatched => {
            collab.dpc_queue.flush_dpc(record.dpc_handle());
        }
    }

    collab.work_queue.flush_work_queue(record.work_item_handle());
    collab
        .signal_queue
        .cancel_queued_signal(record.process_id, record.signal_entry_handle());

    // If Stage A had already stashed an in-flight reference before this
    // flush ran (e.g. the DPC was already dispatched), nothing else will
    // ever drain `expiration_count`, so reclaim that reference here
    // rather than leaking it.
    record.take_in_flight();
}
