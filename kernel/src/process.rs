//! The minimal process-facing surface the timer subsystem touches.
//!
//! A full kernel's process object carries scheduling state, an address
//! space and a capability space; none of that is this crate's concern.
//! What the timer subsystem actually touches is: a stable identity, a
//! reference count (so a process cannot be torn down while a timer still
//! references it), and a place to observe delivered signals. [`Process`]
//! models exactly that slice and implements [`crate::collab::ProcessHandle`].

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::collab::ProcessHandle;

/// Process identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A delivered signal, as observed by a [`Process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveredSignal {
    pub signal_number: u32,
    pub overflow_count: u64,
    pub payload: u64,
}

/// A minimal process object: identity, a reference count, and a log of
/// delivered signals.
///
/// This is deliberately not the full kernel `Process` type; it exists so
/// this crate's tests (and any embedder that has not yet wired in its own
/// process object) can exercise the timer subsystem end to end.
pub struct Process {
    pid: ProcessId,
    refcount: AtomicU64,
    alive: AtomicU32,
    delivered: Mutex<alloc::vec::Vec<DeliveredSignal>>,
}

impl Process {
    pub fn new(pid: ProcessId) -> Self {
        Self {
            pid,
            refcount: AtomicU64::new(1),
            alive: AtomicU32::new(1),
            delivered: Mutex::new(alloc::vec::Vec::new()),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) != 0
    }

    pub fn reference_count(&self) -> u64 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Record a delivered signal (called by the signal-queue simulator
    /// when a process consumes an entry).
    pub fn record_delivery(&self, signal: DeliveredSignal) {
        self.delivered.lock().push(signal);
    }

    pub fn delivered_signals(&self) -> alloc::vec::Vec<DeliveredSignal> {
        self.delivered.lock().clone()
    }
}

impl ProcessHandle for Process {
    fn pid(&self) -> ProcessId {
        self.pid
    }

    fn retain_process(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    fn release_process(&self) {
        let prior = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prior > 0, "process reference count underflow");
        if prior == 1 {
            self.alive.store(0, Ordering::Release);
        }
    }
}
