use std::time::Duration;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::trace;
use crate::timer::{Expiration, TimerEvent, TimerHandle, VirtualTimer};

/// Timer service based on tokio's timers: every armed timer is a task that sleeps and then
///  sends its [Expiration] to a channel, cancelling aborts the task.
///
/// NB: Arming a timer spawns a task, so it must be done from inside a tokio runtime
pub struct TokioTimerService {
    next_id: u64,
    pending: FxHashMap<TimerHandle, JoinHandle<()>>,
    expirations: mpsc::UnboundedSender<Expiration>,
}

/// The receiving end for a [TokioTimerService]'s expirations
pub struct TimerExpirations {
    receiver: mpsc::UnboundedReceiver<Expiration>,
}

impl TimerExpirations {
    /// This returns `None` only after the timer service was dropped
    pub async fn recv(&mut self) -> Option<Expiration> {
        self.receiver.recv().await
    }
}

impl TokioTimerService {
    pub fn new() -> (TokioTimerService, TimerExpirations) {
        let (send, recv) = mpsc::unbounded_channel();
        let service = TokioTimerService {
            next_id: 0,
            pending: FxHashMap::default(),
            expirations: send,
        };
        (service, TimerExpirations { receiver: recv })
    }

    pub fn num_pending(&self) -> usize {
        self.pending.values()
            .filter(|task| !task.is_finished())
            .count()
    }
}

impl VirtualTimer for TokioTimerService {
    fn arm(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        // expired timers are not removed when they fire, so they are purged here
        self.pending.retain(|_, task| !task.is_finished());

        let timer = TimerHandle::from_raw(self.next_id);
        self.next_id += 1;

        let expirations = self.expirations.clone();
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            if expirations.send(Expiration { timer, event }).is_err() {
                trace!("{} expired after the receiver was dropped", timer);
            }
        });
        self.pending.insert(timer, task);
        timer
    }

    fn cancel(&mut self, timer: TimerHandle) {
        if let Some(task) = self.pending.remove(&timer) {
            task.abort();
        }
    }
}

impl Drop for TokioTimerService {
    fn drop(&mut self) {
        for task in self.pending.values() {
            task.abort();
        }
    }
}
