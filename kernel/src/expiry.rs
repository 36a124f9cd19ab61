//! The expiry coalescing pipeline.
//!
//! A single hardware expiry must produce at most one delivered signal
//! even when expiries accrue faster than user mode drains them. Three
//! stages, each at a different preemption level, cooperate through the
//! atomic counters on [`TimerRecord`]:
//!
//! - [`on_dpc_fire`] (Stage A) runs at elevated, non-preemptible level.
//! - [`on_work_run`] (Stage B) runs in a worker thread.
//! - [`on_signal_completed`] (Stage C) runs when user mode consumes the
//!   signal.
//!
//! None of the three ever blocks waiting on another; they communicate
//! only through the counters and by (re-)enqueuing work, never by a
//! rendezvous primitive.

use core::sync::atomic::Ordering;

use alloc::sync::Arc;

use crate::log_service::{klog, LogLevel};
use crate::timer_record::TimerRecord;

/// Stage A. Invoked by the DPC queue when a timer expires.
///
/// Increments `expiration_count`; on the leading edge (the
/// pre-increment value was `0`) stashes an in-flight reference and
/// queues the work item. A non-leading-edge call is a no-op beyond the
/// increment: the already-queued work item will observe the new count.
pub fn on_dpc_fire(record: &Arc<TimerRecord>) {
    let prior = record.expiration_count().fetch_add(1, Ordering::AcqRel);
    if prior == 0 {
        record.stash_in_flight();
        record
            .collaborators()
            .work_queue
            .queue_work_item(record.work_item_handle());
        klog(LogLevel::Trace, "expiry", "stage a: leading edge, work queued");
    } else {
        klog(LogLevel::Trace, "expiry", "stage a: coalesced into pending work");
    }
}

/// Stage B. Invoked by the work queue when the work item runs.
///
/// Reads `expiration_count`, publishes `overflow_count = count - 1`, and
/// hands a signal to the process's signal queue. Never clears
/// `expiration_count`; Stage C is responsible for draining it, which is
/// what lets Stage C detect expiries that arrived during this stage.
pub fn on_work_run(record: &Arc<TimerRecord>) {
    let count = record.expiration_count().fetch_or(0, Ordering::Acquire);
    debug_assert!(count > 0, "work ran without a leading-edge expiry");
    let overflow = count.saturating_sub(1);
    record.overflow_count().store(overflow, Ordering::Release);

    let result = record.collaborators().signal_queue.signal_process(
        record.process_id,
        record.signal_number(),
        overflow,
        record.signal_payload(),
        record.signal_entry_handle(),
    );
    if result.is_err() {
        klog(LogLevel::Warn, "expiry", "stage b: signal_process failed");
    } else {
        klog(LogLevel::Trace, "expiry", "stage b: signal queued");
    }
}

/// Stage C. Invoked by the signal queue when user mode consumes the
/// signal.
///
/// Snapshots and zeroes `overflow_count`, drains `expiration_count` by
/// `snapshot + 1`. If expiries accrued during Stage B (the post-drain
/// count is non-zero), re-queues the work item directly — the DPC will
/// not, because it only re-queues on a 0→1 transition and the counter
/// never returned to 0. Otherwise releases the in-flight reference
/// taken by Stage A.
pub fn on_signal_completed(record: &Arc<TimerRecord>) {
    let overflow = record.overflow_count().swap(0, Ordering::AcqRel);
    let drain = overflow + 1;
    let prior = record
        .expiration_count()
        .fetch_sub(drain, Ordering::AcqRel);
    let remaining = prior.saturating_sub(drain);

    if remaining != 0 {
        record
            .collaborators()
            .work_queue
            .queue_work_item(record.work_item_handle());
        klog(
            LogLevel::Trace,
            "expiry",
            "stage c: further expiries accrued, work re-queued",
        );
    } else {
        let released = record.take_in_flight();
        debug_assert!(released, "stage c ran without a stashed in-flight reference");
        klog(LogLevel::Trace, "expiry", "stage c: drained, reference released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessId;
    use crate::sim::SimEnvironment;
    use crate::timer_record::TimerRecord;
    use alloc::sync::Arc as StdArc;

    fn new_record(env: &SimEnvironment) -> StdArc<TimerRecord> {
        let process = env.spawn_process(ProcessId(1));
        TimerRecord::new(process, env.collaborators(), 14, 7, false).unwrap()
    }

    #[test]
    fn single_expiry_delivers_one_signal_with_zero_overflow() {
        let env = SimEnvironment::new();
        let record = new_record(&env);

        on_dpc_fire(&record);
        assert_eq!(StdArc::strong_count(&record), 2, "in-flight reference held");

        on_work_run(&record);
        assert_eq!(record.overflow_count_snapshot(), 0);

        on_signal_completed(&record);
        assert_eq!(StdArc::strong_count(&record), 1, "in-flight reference released");
        assert_eq!(record.expiration_count().load(Ordering::Acquire), 0);
    }

    #[test]
    fn burst_before_worker_runs_reports_overflow() {
        let env = SimEnvironment::new();
        let record = new_record(&env);

        on_dpc_fire(&record); // leading edge, queues work
        on_dpc_fire(&record);
        on_dpc_fire(&record);
        on_dpc_fire(&record);
        assert_eq!(record.expiration_count().load(Ordering::Acquire), 4);

        on_work_run(&record);
        assert_eq!(record.overflow_count_snapshot(), 3);

        on_signal_completed(&record);
        assert_eq!(record.expiration_count().load(Ordering::Acquire), 0);
        assert_eq!(StdArc::strong_count(&record), 1);
    }

    #[test]
    fn burst_during_worker_epoch_requeues_work() {
        let env = SimEnvironment::new();
        let record = new_record(&env);

        on_dpc_fire(&record);
        on_work_run(&record);
        // More expiries land while the signal is in flight.
        on_dpc_fire(&record);
        on_dpc_fire(&record);

        on_signal_completed(&record);
        // 1 (original) + 2 (during epoch) = 3; drain removes 1, leaving 2.
        assert_eq!(record.expiration_count().load(Ordering::Acquire), 2);
        assert_eq!(StdArc::strong_count(&record), 2, "reference retained for new epoch");

        on_work_run(&record);
        assert_eq!(record.overflow_count_snapshot(), 1);
        on_signal_completed(&record);
        assert_eq!(record.expiration_count().load(Ordering::Acquire), 0);
        assert_eq!(StdArc::strong_count(&record), 1);
    }
}
