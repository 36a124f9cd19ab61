//! Structured log service.
//!
//! A fixed-size, heap-free circular buffer of structured log entries used
//! for lifecycle and coalescing diagnostics (record creation/destruction,
//! expiry pipeline transitions, flush protocol steps). Each entry carries
//! a monotonic sequence number, a severity level, a subsystem tag and a
//! fixed-length message. The service lives behind a single
//! [`crate::sync::GlobalState`] and is accessed through a small public
//! API; this is the one deliberate piece of global state in the crate
//! (see the module-level docs in [`crate`]).
//!
//! ```ignore
//! log_service::log_init();
//! log_service::klog(LogLevel::Info, "expiry", "stage a: leading edge, work queued");
//! ```

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::sync::GlobalState;

const LOG_BUFFER_CAPACITY: usize = 256;
const LOG_MESSAGE_MAX_LEN: usize = 128;
const LOG_SUBSYSTEM_MAX_LEN: usize = 16;

/// Severity levels for log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// A single structured log entry.
///
/// Fields are stored inline in fixed-size arrays so entries can live in a
/// static circular buffer without heap allocation.
#[derive(Clone)]
pub struct LogEntry {
    /// Monotonic sequence number, assigned at log time.
    pub sequence: u64,
    pub level: LogLevel,
    subsystem_buf: [u8; LOG_SUBSYSTEM_MAX_LEN],
    subsystem_len: u8,
    message_buf: [u8; LOG_MESSAGE_MAX_LEN],
    message_len: u8,
}

impl LogEntry {
    const fn empty() -> Self {
        Self {
            sequence: 0,
            level: LogLevel::Trace,
            subsystem_buf: [0u8; LOG_SUBSYSTEM_MAX_LEN],
            subsystem_len: 0,
            message_buf: [0u8; LOG_MESSAGE_MAX_LEN],
            message_len: 0,
        }
    }

    pub fn subsystem(&self) -> &str {
        let len = self.subsystem_len as usize;
        core::str::from_utf8(&self.subsystem_buf[..len]).unwrap_or("")
    }

    pub fn message(&self) -> &str {
        let len = self.message_len as usize;
        core::str::from_utf8(&self.message_buf[..len]).unwrap_or("")
    }
}

struct LogBuffer {
    entries: [LogEntry; LOG_BUFFER_CAPACITY],
    head: usize,
    count: usize,
}

impl LogBuffer {
    fn new() -> Self {
        const EMPTY: LogEntry = LogEntry::empty();
        Self {
            entries: [EMPTY; LOG_BUFFER_CAPACITY],
            head: 0,
            count: 0,
        }
    }

    fn push(&mut self, entry: LogEntry) {
        self.entries[self.head] = entry;
        self.head = (self.head + 1) % LOG_BUFFER_CAPACITY;
        if self.count < LOG_BUFFER_CAPACITY {
            self.count += 1;
        }
    }

    fn len(&self) -> usize {
        self.count
    }

    fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }

    fn tail(&self) -> usize {
        if self.count < LOG_BUFFER_CAPACITY {
            0
        } else {
            self.head
        }
    }

    fn get(&self, i: usize) -> Option<&LogEntry> {
        if i >= self.count {
            return None;
        }
        let physical = (self.tail() + i) % LOG_BUFFER_CAPACITY;
        Some(&self.entries[physical])
    }
}

struct LogService {
    buffer: LogBuffer,
    next_sequence: u64,
}

impl LogService {
    fn new() -> Self {
        Self {
            buffer: LogBuffer::new(),
            next_sequence: 0,
        }
    }

    fn log(&mut self, level: LogLevel, subsystem: &str, message: &str) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let mut subsystem_buf = [0u8; LOG_SUBSYSTEM_MAX_LEN];
        let sub_len = subsystem.len().min(LOG_SUBSYSTEM_MAX_LEN);
        subsystem_buf[..sub_len].copy_from_slice(&subsystem.as_bytes()[..sub_len]);

        let mut message_buf = [0u8; LOG_MESSAGE_MAX_LEN];
        let msg_len = message.len().min(LOG_MESSAGE_MAX_LEN);
        message_buf[..msg_len].copy_from_slice(&message.as_bytes()[..msg_len]);

        self.buffer.push(LogEntry {
            sequence,
            level,
            subsystem_buf,
            subsystem_len: sub_len as u8,
            message_buf,
            message_len: msg_len as u8,
        });
    }
}

static LOG_SERVICE: GlobalState<Mutex<LogService>> = GlobalState::new();
/// Fallback sequence source so `klog` still orders entries relative to
/// each other even when called before [`log_init`].
static FALLBACK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Initialize the log service. A second call is a silent no-op.
pub fn log_init() {
    let _ = LOG_SERVICE.init(Mutex::new(LogService::new()));
}

/// Record a structured log entry. Dropped silently if not yet
/// initialized.
pub fn klog(level: LogLevel, subsystem: &str, message: &str) {
    let logged = LOG_SERVICE.with_mut(|lock| {
        lock.lock().log(level, subsystem, message);
    });
    if logged.is_none() {
        FALLBACK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    }
}

/// Visit every buffered entry, oldest first. Returns `None` if
/// uninitialized.
pub fn log_drain<F: FnMut(&LogEntry)>(mut f: F) -> Option<usize> {
    LOG_SERVICE.with(|lock| {
        let service = lock.lock();
        let n = service.buffer.len();
        for i in 0..n {
            if let Some(entry) = service.buffer.get(i) {
                f(entry);
            }
        }
        n
    })
}

/// Number of entries currently buffered. Returns `None` if
/// uninitialized.
pub fn log_count() -> Option<usize> {
    LOG_SERVICE.with(|lock| lock.lock().buffer.len())
}

/// Clear all buffered entries. Returns `None` if uninitialized.
pub fn log_clear() -> Option<()> {
    LOG_SERVICE.with_mut(|lock| lock.lock().buffer.clear())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn klog_before_init_is_silently_dropped() {
        // A fresh process-wide GlobalState may already be initialized by
        // another test in this binary; only assert the no-panic property.
        klog(LogLevel::Info, "expiry", "probe");
    }

    #[test]
    fn drain_reports_push_order() {
        log_init();
        log_clear();
        klog(LogLevel::Info, "expiry", "stage a");
        klog(LogLevel::Info, "expiry", "stage b");
        let mut seen = alloc::vec::Vec::new();
        let n = log_drain(|e| seen.push(alloc::string::String::from(e.message()))).unwrap();
        assert_eq!(n, 2);
        assert_eq!(seen, alloc::vec!["stage a", "stage b"]);
        assert_eq!(log_count(), Some(2));
    }
}
