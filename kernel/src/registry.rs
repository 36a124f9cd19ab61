//! Per-process timer registry.
//!
//! An ordered collection of every live [`TimerRecord`] belonging to one
//! process, protected by a single mutex modeling that process's queued
//! lock. Never acquired from DPC level; only from thread-context control
//! operations and process teardown.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::collab::Collaborators;
use crate::error::{TimerError, TimerResult};
use crate::timer_record::{TimerId, TimerRecord};

/// Ordered, per-process collection of timer records.
///
/// Linear scan is intentional: a process typically holds a handful of
/// timers, so insert/lookup contention from a `Vec` under a single
/// mutex is lower than the bookkeeping overhead of a sorted map.
pub struct TimerRegistry {
    records: Mutex<Vec<Arc<TimerRecord>>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    /// Allocate the next id for `process`'s list: the last record's id
    /// plus one, or `1` for an empty list.
    ///
    /// Construction of the record itself (which may block) must happen
    /// *before* calling [`TimerRegistry::insert`]; only the id
    /// assignment and the append happen under the lock.
    #[allow(clippy::too_many_arguments)]
    pub fn create_and_insert(
        &self,
        process: Arc<dyn crate::collab::ProcessHandle>,
        collaborators: Collaborators,
        signal_number: u32,
        signal_value: u64,
        use_timer_number: bool,
    ) -> TimerResult<Arc<TimerRecord>> {
        let record = TimerRecord::new(process, collaborators, signal_number, signal_value, use_timer_number)?;

        let mut records = self.records.lock();
        let next_id = records.last().map(|r| r.timer_id().0 + 1).unwrap_or(1);
        record.set_timer_id(TimerId(next_id));
        records.push(record.clone());

        Ok(record)
    }

    /// Find a record by id.
    pub fn lookup(&self, id: TimerId) -> Option<Arc<TimerRecord>> {
        self.records
            .lock()
            .iter()
            .find(|r| r.timer_id() == id)
            .cloned()
    }

    /// Find and unlink a record by id, returning it. The caller owns the
    /// registry reference from this point and is responsible for
    /// eventually dropping it.
    pub fn remove_one(&self, id: TimerId) -> TimerResult<Arc<TimerRecord>> {
        let mut records = self.records.lock();
        let idx = records
            .iter()
            .position(|r| r.timer_id() == id)
            .ok_or(TimerError::InvalidHandle { timer_id: id.0 })?;
        Ok(records.remove(idx))
    }

    /// Unlink every record, returning them for the caller (process
    /// teardown) to flush and release. The registry's own lock is held
    /// only long enough to drain the `Vec`; flushing happens with the
    /// lock released.
    pub fn teardown_all(&self) -> Vec<Arc<TimerRecord>> {
        core::mem::take(&mut *self.records.lock())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessId;
    use crate::sim::SimEnvironment;

    #[test]
    fn ids_are_monotone_from_one() {
        let env = SimEnvironment::new();
        let registry = TimerRegistry::new();
        let process = env.spawn_process(ProcessId(1));

        let a = registry
            .create_and_insert(process.clone(), env.collaborators(), 14, 0, false)
            .unwrap();
        let b = registry
            .create_and_insert(process.clone(), env.collaborators(), 14, 0, false)
            .unwrap();
        let c = registry
            .create_and_insert(process, env.collaborators(), 14, 0, false)
            .unwrap();

        assert_eq!(a.timer_id().0, 1);
        assert_eq!(b.timer_id().0, 2);
        assert_eq!(c.timer_id().0, 3);
    }

    #[test]
    fn ids_reuse_gap_at_the_end_after_deletion() {
        let env = SimEnvironment::new();
        let registry = TimerRegistry::new();
        let process = env.spawn_process(ProcessId(1));

        let _a = registry
            .create_and_insert(process.clone(), env.collaborators(), 14, 0, false)
            .unwrap();
        let b = registry
            .create_and_insert(process.clone(), env.collaborators(), 14, 0, false)
            .unwrap();
        let _c = registry
            .create_and_insert(process.clone(), env.collaborators(), 14, 0, false)
            .unwrap();

        registry.remove_one(b.timer_id()).unwrap();
        let d = registry
            .create_and_insert(process, env.collaborators(), 14, 0, false)
            .unwrap();

        let ids: Vec<u64> = {
            let recs = registry.records.lock();
            recs.iter().map(|r| r.timer_id().0).collect()
        };
        assert_eq!(ids, alloc::vec![1, 3, 4]);
        assert_eq!(d.timer_id().0, 4);
    }

    #[test]
    fn remove_one_unknown_id_is_invalid_handle() {
        let registry = TimerRegistry::new();
        let err = registry.remove_one(TimerId(99)).unwrap_err();
        assert_eq!(err, TimerError::InvalidHandle { timer_id: 99 });
    }

    #[test]
    fn teardown_all_drains_the_list() {
        let env = SimEnvironment::new();
        let registry = TimerRegistry::new();
        let process = env.spawn_process(ProcessId(1));
        registry
            .create_and_insert(process.clone(), env.collaborators(), 14, 0, false)
            .unwrap();
        registry
            .create_and_insert(process, env.collaborators(), 14, 0, false)
            .unwrap();
        assert_eq!(registry.len(), 2);
        let drained = registry.teardown_all();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }
}
