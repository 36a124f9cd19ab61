//! Synchronization primitives shared across the timer subsystem.

pub mod once_lock;

pub use once_lock::{GlobalState, OnceLock};
