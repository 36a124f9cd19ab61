//! Error taxonomy for the timer subsystem.

use core::fmt;

/// Errors returned by [`crate::control::ControlSurface`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "timer errors must be handled, not silently discarded"]
pub enum TimerError {
    /// The referenced timer id is not present for this process.
    InvalidHandle { timer_id: u64 },
    /// Allocation or backing-object creation failed during `Create`.
    InsufficientResources,
    /// Arming the backing timer was rejected by the scheduler.
    SchedulerFailure,
    /// The request carried an unrecognized or malformed operation.
    InvalidParameter { name: &'static str },
}

pub type TimerResult<T> = Result<T, TimerError>;

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHandle { timer_id } => {
                write!(f, "invalid timer handle: {timer_id}")
            }
            Self::InsufficientResources => write!(f, "insufficient resources to create timer"),
            Self::SchedulerFailure => write!(f, "scheduler rejected timer arm request"),
            Self::InvalidParameter { name } => write!(f, "invalid parameter: {name}"),
        }
    }
}
