//! Per-process interval timer subsystem.
//!
//! A process may create, arm, query and destroy one or more software
//! timers that deliver an asynchronous signal on expiry. Each timer
//! couples a backing kernel timer, a deferred procedure call (DPC), a
//! work item and a signal-queue entry into a single lifecycle managed by
//! [`timer_record::TimerRecord`] and driven by [`expiry`].
//!
//! The subsystem does not talk to real hardware, a real scheduler or a
//! real signal-delivery path directly: it is written against the trait
//! contracts in [`collab`], so that an embedding kernel supplies its own
//! implementations while this crate supplies only the lifecycle and
//! coalescing logic. A deterministic in-memory implementation of those
//! contracts lives in [`sim`] and backs this crate's own test suite.
#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod collab;
pub mod control;
pub mod error;
pub mod expiry;
pub mod log_service;
pub mod process;
pub mod registry;
pub mod sync;
pub mod timer_record;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use collab::{Collaborators, DpcHandle, SignalEntryHandle, TimerHandle, WorkItemHandle};
pub use control::{ControlSurface, GetTimerResult, SetTimerResult};
pub use error::{TimerError, TimerResult};
pub use process::ProcessId;
pub use registry::TimerRegistry;
pub use timer_record::{TimerId, TimerRecord};
