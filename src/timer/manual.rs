use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;
use crate::timer::{Expiration, TimerEvent, TimerHandle, VirtualTimer};

struct PendingTimer {
    deadline: Duration,
    delay: Duration,
    event: TimerEvent,
}

#[derive(Default)]
struct ManualTimerState {
    now: Duration,
    next_id: u64,
    pending: BTreeMap<TimerHandle, PendingTimer>,
}

/// A timer service with a virtual clock that only moves when it is told to. Clones share the
///  same clock and timers, so one clone can be handed to the transaction layer while another one
///  drives time.
///
/// Expirations are returned to the caller of [ManualTimerService::advance] or
///  [ManualTimerService::fire_next], who is responsible for passing them on to the transaction
///  layer.
#[derive(Clone, Default)]
pub struct ManualTimerService {
    state: Arc<Mutex<ManualTimerState>>,
}

impl ManualTimerService {
    pub fn new() -> ManualTimerService {
        Default::default()
    }

    fn state(&self) -> MutexGuard<'_, ManualTimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// virtual time since creation
    pub fn now(&self) -> Duration {
        self.state().now
    }

    pub fn num_pending(&self) -> usize {
        self.state().pending.len()
    }

    /// The requested delays of all pending timers, in the order they were armed
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.state().pending.values()
            .map(|p| p.delay)
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.state().pending.values()
            .map(|p| p.deadline)
            .min()
    }

    /// Moves the clock forward, returning all timers that are due by then in the order of
    ///  their deadlines
    pub fn advance(&self, by: Duration) -> Vec<Expiration> {
        let mut state = self.state();
        state.now = state.now.saturating_add(by);
        let now = state.now;

        let mut due = state.pending.iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&timer, p)| (p.deadline, timer))
            .collect::<Vec<_>>();
        due.sort();

        due.into_iter()
            .filter_map(|(_, timer)| state.pending.remove(&timer)
                .map(|p| Expiration { timer, event: p.event }))
            .collect()
    }

    /// Moves the clock to the earliest pending deadline and expires that timer
    pub fn fire_next(&self) -> Option<Expiration> {
        let mut state = self.state();
        let (&timer, _) = state.pending.iter()
            .min_by_key(|(timer, p)| (p.deadline, **timer))?;
        let pending = state.pending.remove(&timer)?;
        state.now = state.now.max(pending.deadline);
        trace!("manual timer: firing {} at {:?}", timer, state.now);
        Some(Expiration { timer, event: pending.event })
    }
}

impl VirtualTimer for ManualTimerService {
    fn arm(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        let mut state = self.state();
        let timer = TimerHandle::from_raw(state.next_id);
        state.next_id += 1;

        let deadline = state.now.saturating_add(delay);
        state.pending.insert(timer, PendingTimer { deadline, delay, event });
        timer
    }

    fn cancel(&mut self, timer: TimerHandle) {
        if self.state().pending.remove(&timer).is_none() {
            trace!("manual timer: cancelling {} which is not pending", timer);
        }
    }
}
