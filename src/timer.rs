//! The contract between the transaction layer and a timer service. The transaction layer arms
//!  a timer per confirmable message and cancels it when the transaction is cleared; the timer
//!  service is responsible for waking up at the right time and delivering [Expiration]s back
//!  to the (single) context that drives the transaction layer.
//!
//! Two implementations are provided:
//! * [manual::ManualTimerService] keeps a virtual clock that is advanced explicitly, for
//!   simulations and tests
//! * [tokio_timer::TokioTimerService] uses tokio's timers, delivering expirations through a
//!   channel

pub mod manual;
pub mod tokio_timer;

use std::fmt::{Display, Formatter};
use std::time::Duration;
use crate::transaction::TransactionHandle;

/// Identifies an armed timer for cancellation. Handles are never reused by a timer service.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TimerHandle(u64);

impl Display for TimerHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

impl TimerHandle {
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u64 {
        self.0
    }
}

/// What an armed timer is for. This is what gets handed back on expiry, so dispatching on it
///  does not require any type erasure.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TimerEvent {
    Retransmit(TransactionHandle),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Expiration {
    pub timer: TimerHandle,
    pub event: TimerEvent,
}

pub trait VirtualTimer: Send {
    /// Requests an [Expiration] for `event` no earlier than `delay` from now. Each armed timer
    ///  expires at most once.
    fn arm(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle;

    /// Withdraws a pending timer. Implementations should not deliver an expiration after
    ///  cancellation, but the transaction layer ignores expirations for timers it does not
    ///  know (anymore), so a race between expiry and cancellation is harmless.
    fn cancel(&mut self, timer: TimerHandle);
}
