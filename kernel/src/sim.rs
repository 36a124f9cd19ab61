//! A deterministic, in-memory implementation of every collaborator trait
//! in [`crate::collab`], driven explicitly by test code.
//!
//! No real hardware, scheduler or thread pool exists here: a "DPC fires"
//! only when a test calls [`SimEnvironment::fire_dpc`], a "worker runs"
//! only when a test calls [`SimEnvironment::run_work`], and a "signal is
//! consumed" only when a test calls [`SimEnvironment::consume_signal`].
//! This gives full control over the interleavings described in the
//! module docs of [`crate::expiry`], without timing-dependent flakiness.

use core::sync::atomic::{AtomicU64, Ordering};

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::collab::{
    Collaborators, DpcCancelOutcome, DpcHandle, DpcQueue, ProcessHandle, Scheduler,
    SignalEntryHandle, SignalQueueApi, TimeSource, TimerHandle, WakePolicy, WorkItemHandle,
};
use crate::error::TimerResult;
use crate::process::{DeliveredSignal, Process, ProcessId};
use crate::timer_record::TimerRecord;

#[derive(Default)]
struct Counter(AtomicU64);

impl Counter {
    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

struct ArmedTimer {
    due: u64,
    interval: u64,
    dpc: DpcHandle,
}

struct SimSchedulerState {
    ids: Counter,
    armed: BTreeMap<u64, ArmedTimer>,
}

/// Simulated timer scheduler: tracks arm state but never fires on its
/// own; firing is driven by [`SimEnvironment::fire_dpc`].
pub struct SimScheduler {
    state: Mutex<SimSchedulerState>,
}

impl SimScheduler {
    fn new() -> Self {
        Self {
            state: Mutex::new(SimSchedulerState {
                ids: Counter::default(),
                armed: BTreeMap::new(),
            }),
        }
    }
}

impl Scheduler for SimScheduler {
    fn create_timer(&self) -> TimerResult<TimerHandle> {
        Ok(TimerHandle(self.state.lock().ids.next()))
    }

    fn destroy_timer(&self, timer: TimerHandle) {
        self.state.lock().armed.remove(&timer.0);
    }

    fn queue_timer(
        &self,
        timer: TimerHandle,
        _policy: WakePolicy,
        due: u64,
        interval: u64,
        dpc: DpcHandle,
    ) -> TimerResult<()> {
        self.state
            .lock()
            .armed
            .insert(timer.0, ArmedTimer { due, interval, dpc });
        Ok(())
    }

    fn cancel_timer(&self, timer: TimerHandle) {
        self.state.lock().armed.remove(&timer.0);
    }

    fn due_time(&self, timer: TimerHandle) -> u64 {
        self.state
            .lock()
            .armed
            .get(&timer.0)
            .map(|t| t.due)
            .unwrap_or(0)
    }
}

impl SimScheduler {
    /// Mimic hardware firing behavior: a one-shot timer disarms itself
    /// (`due_time` reads back as `0` thereafter); a periodic timer
    /// reloads for its next period. Called by [`SimEnvironment::fire_dpc`]
    /// so `due_time` observations in tests reflect what a real scheduler
    /// would report after the same fire.
    fn on_fire(&self, timer: TimerHandle) {
        let mut state = self.state.lock();
        if let Some(armed) = state.armed.get_mut(&timer.0) {
            if armed.interval == 0 {
                state.armed.remove(&timer.0);
            } else {
                armed.due += armed.interval;
            }
        }
    }
}

struct SimDpcState {
    ids: Counter,
    bindings: BTreeMap<u64, Weak<TimerRecord>>,
    dispatched: BTreeMap<u64, bool>,
}

/// Simulated DPC queue.
pub struct SimDpcQueue {
    state: Mutex<SimDpcState>,
}

impl SimDpcQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(SimDpcState {
                ids: Counter::default(),
                bindings: BTreeMap::new(),
                dispatched: BTreeMap::new(),
            }),
        }
    }

    fn record_for(&self, dpc: DpcHandle) -> Option<Arc<TimerRecord>> {
        self.state.lock().bindings.get(&dpc.0)?.upgrade()
    }
}

impl DpcQueue for SimDpcQueue {
    fn create_dpc(&self, record: Weak<TimerRecord>) -> DpcHandle {
        let mut state = self.state.lock();
        let id = state.ids.next();
        state.bindings.insert(id, record);
        DpcHandle(id)
    }

    fn cancel_dpc(&self, dpc: DpcHandle) -> DpcCancelOutcome {
        let mut state = self.state.lock();
        if state.dispatched.remove(&dpc.0).unwrap_or(false) {
            DpcCancelOutcome::AlreadyDispatched
        } else {
            DpcCancelOutcome::Cancelled
        }
    }

    fn flush_dpc(&self, dpc: DpcHandle) {
        self.state.lock().dispatched.remove(&dpc.0);
    }

    fn destroy_dpc(&self, dpc: DpcHandle) {
        let mut state = self.state.lock();
        state.bindings.remove(&dpc.0);
        state.dispatched.remove(&dpc.0);
    }
}

struct SimWorkState {
    ids: Counter,
    bindings: BTreeMap<u64, Weak<TimerRecord>>,
    queued: BTreeMap<u64, bool>,
}

/// Simulated work-item queue.
pub struct SimWorkQueue {
    state: Mutex<SimWorkState>,
}

impl SimWorkQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(SimWorkState {
                ids: Counter::default(),
                bindings: BTreeMap::new(),
                queued: BTreeMap::new(),
            }),
        }
    }

    fn record_for(&self, work: WorkItemHandle) -> Option<Arc<TimerRecord>> {
        self.state.lock().bindings.get(&work.0)?.upgrade()
    }
}

impl crate::collab::WorkQueue for SimWorkQueue {
    fn create_work_item(&self, record: Weak<TimerRecord>) -> WorkItemHandle {
        let mut state = self.state.lock();
        let id = state.ids.next();
        state.bindings.insert(id, record);
        WorkItemHandle(id)
    }

    fn queue_work_item(&self, work: WorkItemHandle) {
        self.state.lock().queued.insert(work.0, true);
    }

    fn flush_work_queue(&self, work: WorkItemHandle) {
        self.state.lock().queued.remove(&work.0);
    }

    fn destroy_work_item(&self, work: WorkItemHandle) {
        let mut state = self.state.lock();
        state.bindings.remove(&work.0);
        state.queued.remove(&work.0);
    }
}

struct QueuedEntry {
    process: ProcessId,
    signal_number: u32,
    overflow_count: u64,
    payload: u64,
}

/// Simulated signal queue: records queued entries so a test can consume
/// them explicitly via [`SimEnvironment::consume_signal`].
pub struct SimSignalQueue {
    pending: Mutex<BTreeMap<u64, QueuedEntry>>,
    processes: Mutex<BTreeMap<ProcessId, Arc<Process>>>,
}

impl SimSignalQueue {
    fn new() -> Self {
        Self {
            pending: Mutex::new(BTreeMap::new()),
            processes: Mutex::new(BTreeMap::new()),
        }
    }

    fn register_process(&self, process: Arc<Process>) {
        self.processes.lock().insert(process.pid(), process);
    }
}

impl SignalQueueApi for SimSignalQueue {
    fn signal_process(
        &self,
        process: ProcessId,
        signal_number: u32,
        overflow_count: u64,
        payload: u64,
        entry: SignalEntryHandle,
    ) -> TimerResult<()> {
        self.pending.lock().insert(
            entry.0,
            QueuedEntry {
                process,
                signal_number,
                overflow_count,
                payload,
            },
        );
        Ok(())
    }

    fn cancel_queued_signal(&self, _process: ProcessId, entry: SignalEntryHandle) {
        self.pending.lock().remove(&entry.0);
    }
}

struct SimTimeSource {
    ticks: AtomicU64,
}

impl TimeSource for SimTimeSource {
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

/// A complete, deterministic collaborator environment for tests.
pub struct SimEnvironment {
    scheduler: Arc<SimScheduler>,
    dpc_queue: Arc<SimDpcQueue>,
    work_queue: Arc<SimWorkQueue>,
    signal_queue: Arc<SimSignalQueue>,
    time_source: Arc<SimTimeSource>,
}

impl SimEnvironment {
    pub fn new() -> Self {
        Self {
            scheduler: Arc::new(SimScheduler::new()),
            dpc_queue: Arc::new(SimDpcQueue::new()),
            work_queue: Arc::new(SimWorkQueue::new()),
            signal_queue: Arc::new(SimSignalQueue::new()),
            time_source: Arc::new(SimTimeSource {
                ticks: AtomicU64::new(0),
            }),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            scheduler: self.scheduler.clone(),
            dpc_queue: self.dpc_queue.clone(),
            work_queue: self.work_queue.clone(),
            signal_queue: self.signal_queue.clone(),
            time_source: self.time_source.clone(),
        }
    }

    pub fn spawn_process(&self, pid: ProcessId) -> Arc<Process> {
        let process = Arc::new(Process::new(pid));
        self.signal_queue.register_process(process.clone());
        process
    }

    pub fn advance_clock(&self, ticks: u64) {
        self.time_source.ticks.fetch_add(ticks, Ordering::Relaxed);
    }

    /// Drive Stage A (`on_dpc_fire`) for the record bound to `dpc`, as if
    /// the hardware timer had just fired. No-op if the DPC has been
    /// destroyed or its record already dropped.
    pub fn fire_dpc(&self, dpc: DpcHandle) {
        if let Some(record) = self.dpc_queue.record_for(dpc) {
            self.dpc_queue.state.lock().dispatched.insert(dpc.0, true);
            self.scheduler.on_fire(record.timer_handle());
            crate::expiry::on_dpc_fire(&record);
        }
    }

    /// Drive Stage B (`on_work_run`) for the record bound to `work`.
    pub fn run_work(&self, work: WorkItemHandle) {
        if let Some(record) = self.work_queue.record_for(work) {
            self.work_queue.state.lock().queued.remove(&work.0);
            crate::expiry::on_work_run(&record);
        }
    }

    /// Drive Stage C (`on_signal_completed`) for whichever record queued
    /// `entry`, as if user mode had just consumed the signal. Returns
    /// the consumed entry's contents, and records the delivery against
    /// the owning [`Process`] if it is registered in this environment.
    pub fn consume_signal(&self, entry: SignalEntryHandle, record: &Arc<TimerRecord>) {
        let consumed = self.signal_queue.pending.lock().remove(&entry.0);
        if let Some(entry_data) = consumed {
            if let Some(process) = self.signal_queue.processes.lock().get(&entry_data.process) {
                process.record_delivery(DeliveredSignal {
                    signal_number: entry_data.signal_number,
                    overflow_count: entry_data.overflow_count,
                    payload: entry_data.payload,
                });
            }
        }
        crate::expiry::on_signal_completed(record);
    }

    /// Number of entries currently queued in the simulated signal queue.
    pub fn pending_signal_count(&self) -> usize {
        self.signal_queue.pending.lock().len()
    }

    pub fn is_dpc_armed(&self, timer: TimerHandle) -> bool {
        self.scheduler.due_time(timer) != 0
    }

    pub fn work_items_queued(&self) -> Vec<WorkItemHandle> {
        self.work_queue
            .state
            .lock()
            .queued
            .iter()
            .filter(|(_, queued)| **queued)
            .map(|(id, _)| WorkItemHandle(*id))
            .collect()
    }
}

impl Default for SimEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_run_consume_round_trip_delivers_signal() {
        let env = SimEnvironment::new();
        let process = env.spawn_process(ProcessId(1));
        let record = TimerRecord::new(process.clone(), env.collaborators(), 14, 5, false).unwrap();

        env.fire_dpc(record.dpc_handle());
        env.run_work(record.work_item_handle());
        env.consume_signal(record.signal_entry_handle(), &record);

        let delivered = process.delivered_signals();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].signal_number, 14);
        assert_eq!(delivered[0].payload, 5);
        assert_eq!(delivered[0].overflow_count, 0);
    }

    #[test]
    fn one_shot_disarms_on_fire_but_periodic_reloads() {
        let env = SimEnvironment::new();
        let process = env.spawn_process(ProcessId(1));

        let one_shot = TimerRecord::new(process.clone(), env.collaborators(), 14, 0, false).unwrap();
        env.scheduler
            .queue_timer(one_shot.timer_handle(), WakePolicy::SoftWake, 10, 0, one_shot.dpc_handle())
            .unwrap();
        env.fire_dpc(one_shot.dpc_handle());
        assert_eq!(env.scheduler.due_time(one_shot.timer_handle()), 0);

        let periodic = TimerRecord::new(process, env.collaborators(), 14, 0, false).unwrap();
        env.scheduler
            .queue_timer(periodic.timer_handle(), WakePolicy::SoftWake, 10, 5, periodic.dpc_handle())
            .unwrap();
        env.fire_dpc(periodic.dpc_handle());
        assert_eq!(env.scheduler.due_time(periodic.timer_handle()), 15);
    }
}
