use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};
use crate::config::TransactionConfig;
use crate::endpoint::Endpoint;
use crate::error::TransactionError;
use crate::header::MessageType;
use crate::observe::ObserverRegistry;
use crate::pool::TransactionPool;
use crate::timer::{Expiration, TimerEvent, TimerHandle, VirtualTimer};
use crate::transaction::{Transaction, TransactionHandle};
use crate::transport::Transport;
use crate::util::random::Random;

/// The transaction layer: owns the transaction pool and drives the retransmission state machine
///  for every open transaction.
///
/// A transaction goes through the following states:
///
/// ```ascii
/// created --send--> awaiting ack (0) --timer--> awaiting ack (1) --timer--> ... awaiting ack (MAX_RETRANSMIT)
///                         |                          |                               |
///                         +------ reply / ack -------+------------+                  |
///                                                                 v                  v
///                                                              cleared         timed out, cleared
/// ```
///
/// All methods are expected to be called from a single context (see [crate::engine]), there is
///  no internal synchronization.
pub struct TransactionManager {
    config: Arc<TransactionConfig>,
    pool: TransactionPool,
    transport: Box<dyn Transport>,
    timer: Box<dyn VirtualTimer>,
    observers: Box<dyn ObserverRegistry>,
    random: Box<dyn Random>,
}

impl TransactionManager {
    pub fn new(
        config: Arc<TransactionConfig>,
        transport: Box<dyn Transport>,
        timer: Box<dyn VirtualTimer>,
        observers: Box<dyn ObserverRegistry>,
        random: Box<dyn Random>,
    ) -> anyhow::Result<TransactionManager> {
        config.validate()?;

        let pool = TransactionPool::new(config.max_open_transactions, config.max_packet_size);
        debug!("initialized transaction pool with {} slots of {} bytes", config.max_open_transactions, config.max_packet_size);

        Ok(TransactionManager {
            config,
            pool,
            transport,
            timer,
            observers,
            random,
        })
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn open_transactions(&self) -> usize {
        self.pool.len()
    }

    /// Allocates a transaction for a message with the given id, to be sent to the given
    ///  endpoint. The caller is responsible for choosing fresh message ids.
    pub fn create_transaction(&mut self, message_id: u16, endpoint: Endpoint) -> Result<TransactionHandle, TransactionError> {
        if let Some(existing) = self.pool.find_by_message_id(message_id) {
            warn!("creating transaction for message id {} while {:?} with the same message id is still open", message_id, existing);
        }

        let handle = self.pool.allocate(message_id, endpoint)
            .ok_or_else(|| {
                debug!("no free transaction slot for message id {} to {}", message_id, endpoint);
                TransactionError::PoolExhausted
            })?;
        self.pool.register(handle);

        debug!("created transaction {} for {}", message_id, endpoint);
        Ok(handle)
    }

    pub fn transaction(&self, handle: TransactionHandle) -> Option<&Transaction> {
        self.pool.get(handle)
    }

    pub fn transaction_mut(&mut self, handle: TransactionHandle) -> Option<&mut Transaction> {
        self.pool.get_mut(handle)
    }

    pub fn find_by_message_id(&self, message_id: u16) -> Option<TransactionHandle> {
        let result = self.pool.find_by_message_id(message_id);
        trace!("looking up transaction for message id {}: {:?}", message_id, result);
        result
    }

    /// Transmits the transaction's packet. A confirmable message stays open with a
    ///  retransmission timer armed; anything else is released right away.
    ///
    /// NB: This is also the entry point for retransmissions, so the backoff bookkeeping and the
    ///      check for timeout are in one place
    pub fn send(&mut self, handle: TransactionHandle) {
        let Some(transaction) = self.pool.get_mut(handle) else {
            debug!("sending {:?} which is not open (anymore)", handle);
            return;
        };

        trace!("sending transaction {} to {} (retransmission {})", transaction.message_id, transaction.endpoint, transaction.retry_count);
        self.transport.transmit(&transaction.endpoint, transaction.packet());
        //NB: there is no error handling for transmission - a packet that could not be sent is treated like a lost packet

        if transaction.message_type() != Some(MessageType::Confirmable) {
            trace!("transaction {} is not confirmable, releasing it", transaction.message_id);
            self.clear(handle);
            return;
        }

        if transaction.retry_count < self.config.max_retransmit {
            let interval = match transaction.retry_interval {
                Some(previous) if transaction.retry_count > 0 => previous.saturating_mul(2),
                _ => initial_interval(&self.config, self.random.as_mut()),
            };
            transaction.retry_interval = Some(interval);

            // there is never more than one pending timer per transaction
            if let Some(previous_timer) = transaction.timer.take() {
                self.timer.cancel(previous_timer);
            }
            transaction.timer = Some(self.timer.arm(interval, TimerEvent::Retransmit(handle)));
            debug!("keeping transaction {}, retransmission {} in {:?}", transaction.message_id, transaction.retry_count + 1, interval);
            return;
        }

        debug!("transaction {} to {} timed out after {} retransmissions", transaction.message_id, transaction.endpoint, transaction.retry_count);
        let response_handler = transaction.response_handler.take();
        let endpoint = transaction.endpoint;

        // a peer that stopped responding is no longer interested in notifications
        self.observers.remove_subscriptions_for(&endpoint);

        // the handler may allocate a new transaction, so the slot must be free before it is called
        self.clear(handle);
        if let Some(response_handler) = response_handler {
            response_handler(self, None);
        }
    }

    pub fn on_timer_expired(&mut self, expiration: Expiration) {
        match expiration.event {
            TimerEvent::Retransmit(handle) => self.on_retransmission_timer(handle, expiration.timer),
        }
    }

    fn on_retransmission_timer(&mut self, handle: TransactionHandle, timer: TimerHandle) {
        let Some(transaction) = self.pool.get_mut(handle) else {
            debug!("retransmission {} for {:?} which is not open (anymore)", timer, handle);
            return;
        };
        if transaction.timer != Some(timer) {
            debug!("ignoring stale {} for transaction {}", timer, transaction.message_id);
            return;
        }

        transaction.timer = None;
        transaction.retry_count += 1;
        debug!("retransmitting transaction {} ({})", transaction.message_id, transaction.retry_count);
        self.send(handle);
    }

    /// Cancels a pending retransmission timer, removes the transaction from the registry and
    ///  returns its slot to the pool - in that order. The response handler (if any) is dropped
    ///  without being called.
    ///
    /// Clearing a transaction that is not open (anymore) has no effect.
    pub fn clear(&mut self, handle: TransactionHandle) {
        let Some(transaction) = self.pool.get_mut(handle) else {
            trace!("clearing {:?} which is not open (anymore)", handle);
            return;
        };
        debug!("freeing transaction {}", transaction.message_id);

        if let Some(timer) = transaction.timer.take() {
            self.timer.cancel(timer);
        }
        self.pool.unregister(handle);
        self.pool.free(handle);
    }

    /// To be called by the reply layer when a transaction was acknowledged: this stops
    ///  retransmission and frees the transaction. Calling the response handler is the reply
    ///  layer's responsibility.
    pub fn clear_on_ack(&mut self, handle: TransactionHandle) {
        self.clear(handle);
    }

    /// Correlates a reply with its transaction, clears the transaction and then passes the reply
    ///  to the transaction's response handler. A reply matches a transaction by message id *and*
    ///  endpoint, so different peers may use the same message id. Returns `false` (doing nothing)
    ///  if there is no matching open transaction.
    pub fn complete_with_reply(&mut self, message_id: u16, from: &Endpoint, reply: &[u8]) -> bool {
        let Some(handle) = self.pool.find_by_message_id_and_endpoint(message_id, from) else {
            match self.pool.find_by_message_id(message_id).and_then(|h| self.pool.get(h)) {
                Some(other) => warn!("reply with message id {} from {} does not match transaction sent to {} - discarding", message_id, from, other.endpoint),
                None => debug!("no open transaction for reply with message id {} from {} - discarding", message_id, from),
            }
            return false;
        };
        let Some(transaction) = self.pool.get_mut(handle) else {
            return false;
        };

        debug!("received reply for transaction {} from {}", message_id, from);
        let response_handler = transaction.response_handler.take();
        self.clear(handle);
        if let Some(response_handler) = response_handler {
            response_handler(self, Some(reply));
        }
        true
    }

    /// Clears all open transactions without notifying anybody, e.g. on shutdown
    pub fn clear_all(&mut self) {
        for handle in self.pool.handles() {
            self.clear(handle);
        }
    }
}

/// `response_timeout` plus random jitter with millisecond granularity
fn initial_interval(config: &TransactionConfig, random: &mut dyn Random) -> Duration {
    let mask_millis = u64::try_from(config.backoff_jitter_mask.as_millis())
        .unwrap_or(u64::MAX);
    let jitter_millis = if mask_millis == 0 {
        0
    }
    else {
        random.gen_u64_inclusive(mask_millis)
    };
    config.response_timeout.saturating_add(Duration::from_millis(jitter_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use mockall::predicate::eq;
    use rstest::rstest;
    use crate::observe::MockObserverRegistry;
    use crate::timer::manual::ManualTimerService;
    use crate::transport::MockTransport;
    use crate::util::random::MockRandom;

    const CON_GET: &[u8] = &[0x40, 0x01, 0x00, 0x01];
    const NON_GET: &[u8] = &[0x50, 0x01, 0x00, 0x02];
    const ACK_CONTENT: &[u8] = &[0x60, 0x45, 0x00, 0x01, 0xff, 0x68, 0x69];

    type Outcomes = Arc<Mutex<Vec<Option<Vec<u8>>>>>;

    fn peer() -> Endpoint {
        Endpoint::localhost(5683)
    }

    fn config(capacity: usize) -> Arc<TransactionConfig> {
        Arc::new(TransactionConfig {
            max_open_transactions: capacity,
            max_retransmit: 4,
            response_timeout: Duration::from_millis(2000),
            backoff_jitter_mask: Duration::from_millis(1000),
            max_packet_size: 64,
        })
    }

    fn random(jitter_millis: u64) -> Box<MockRandom> {
        let mut random = MockRandom::new();
        random.expect_gen_u64_inclusive()
            .with(eq(1000))
            .return_const(jitter_millis);
        Box::new(random)
    }

    fn transport(num_con: usize, num_non: usize) -> Box<MockTransport> {
        let mut transport = MockTransport::new();
        transport.expect_transmit()
            .times(num_con)
            .withf(|to, packet| to == &peer() && packet == CON_GET)
            .return_const(());
        transport.expect_transmit()
            .times(num_non)
            .withf(|to, packet| to == &peer() && packet == NON_GET)
            .return_const(());
        Box::new(transport)
    }

    fn observers(num_removals: usize) -> Box<MockObserverRegistry> {
        let mut observers = MockObserverRegistry::new();
        observers.expect_remove_subscriptions_for()
            .with(eq(peer()))
            .times(num_removals)
            .return_const(());
        Box::new(observers)
    }

    fn manager(capacity: usize, transport: Box<MockTransport>, timers: &ManualTimerService, observers: Box<MockObserverRegistry>, jitter_millis: u64) -> TransactionManager {
        TransactionManager::new(
            config(capacity),
            transport,
            Box::new(timers.clone()),
            observers,
            random(jitter_millis),
        ).unwrap()
    }

    fn recording_handler(outcomes: &Outcomes) -> impl FnOnce(&mut TransactionManager, Option<&[u8]>) + Send + 'static {
        let outcomes = outcomes.clone();
        move |_, reply| outcomes.lock().unwrap().push(reply.map(|r| r.to_vec()))
    }

    fn create_and_send(manager: &mut TransactionManager, message_id: u16, packet: &[u8], outcomes: &Outcomes) -> TransactionHandle {
        let handle = manager.create_transaction(message_id, peer()).unwrap();
        let transaction = manager.transaction_mut(handle).unwrap();
        transaction.set_packet(packet).unwrap();
        transaction.set_response_handler(recording_handler(outcomes));
        manager.send(handle);
        handle
    }

    fn fire_all(manager: &mut TransactionManager, timers: &ManualTimerService) {
        while let Some(expiration) = timers.fire_next() {
            manager.on_timer_expired(expiration);
        }
    }

    #[test]
    fn test_invalid_config() {
        let result = TransactionManager::new(
            config(0),
            Box::new(MockTransport::new()),
            Box::new(ManualTimerService::new()),
            Box::new(MockObserverRegistry::new()),
            Box::new(MockRandom::new()),
        );
        assert!(result.is_err());
    }

    #[rstest]
    #[case::one(1)]
    #[case::two(2)]
    #[case::four(4)]
    fn test_pool_bound(#[case] capacity: usize) {
        let timers = ManualTimerService::new();
        let mut manager = manager(capacity, transport(0, 0), &timers, observers(0), 0);

        let handles = (0..capacity)
            .map(|i| manager.create_transaction(i as u16, peer()).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(manager.create_transaction(100, peer()), Err(TransactionError::PoolExhausted));
        assert_eq!(manager.open_transactions(), capacity);

        manager.clear(handles[capacity - 1]);
        assert!(manager.create_transaction(101, peer()).is_ok());
        assert_eq!(manager.create_transaction(102, peer()), Err(TransactionError::PoolExhausted));
    }

    #[test]
    fn test_lookup() {
        let timers = ManualTimerService::new();
        let mut manager = manager(2, transport(0, 0), &timers, observers(0), 0);

        let handle = manager.create_transaction(7, peer()).unwrap();
        assert_eq!(manager.find_by_message_id(7), Some(handle));
        assert_eq!(manager.find_by_message_id(8), None);
        assert_eq!(manager.transaction(handle).map(|t| t.endpoint()), Some(peer()));

        manager.clear_on_ack(handle);
        assert_eq!(manager.find_by_message_id(7), None);
        assert!(manager.transaction(handle).is_none());
    }

    #[test]
    fn test_non_confirmable_is_sent_once() {
        let timers = ManualTimerService::new();
        let mut manager = manager(1, transport(0, 1), &timers, observers(0), 0);
        let outcomes = Outcomes::default();

        let handle = create_and_send(&mut manager, 2, NON_GET, &outcomes);

        assert_eq!(timers.num_pending(), 0);
        assert_eq!(manager.open_transactions(), 0);
        assert!(manager.transaction(handle).is_none());
        assert!(outcomes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_packet_is_sent_once() {
        let timers = ManualTimerService::new();
        let mut transport = MockTransport::new();
        transport.expect_transmit()
            .times(1)
            .withf(|_, packet| packet.is_empty())
            .return_const(());
        let mut manager = manager(1, Box::new(transport), &timers, observers(0), 0);

        let handle = manager.create_transaction(1, peer()).unwrap();
        manager.send(handle);
        assert_eq!(timers.num_pending(), 0);
        assert_eq!(manager.open_transactions(), 0);
    }

    #[rstest]
    #[case::no_jitter(0, vec![2000, 4000, 8000, 16000])]
    #[case::some_jitter(333, vec![2333, 4666, 9332, 18664])]
    #[case::max_jitter(1000, vec![3000, 6000, 12000, 24000])]
    fn test_backoff(#[case] jitter_millis: u64, #[case] expected_intervals: Vec<u64>) {
        let timers = ManualTimerService::new();
        let mut manager = manager(1, transport(5, 0), &timers, observers(1), jitter_millis);
        let outcomes = Outcomes::default();

        let handle = create_and_send(&mut manager, 1, CON_GET, &outcomes);

        let mut actual_intervals = Vec::new();
        for expected_retry_count in 0..4u8 {
            let transaction = manager.transaction(handle).unwrap();
            assert_eq!(transaction.retry_count(), expected_retry_count);
            assert_eq!(timers.pending_delays(), vec![transaction.retry_interval().unwrap()]);
            actual_intervals.push(transaction.retry_interval().unwrap().as_millis() as u64);

            let expiration = timers.fire_next().unwrap();
            manager.on_timer_expired(expiration);
        }
        assert_eq!(actual_intervals, expected_intervals);

        assert_eq!(timers.num_pending(), 0);
        assert_eq!(*outcomes.lock().unwrap(), vec![None]);
    }

    #[test]
    fn test_timeout_scenario() {
        let timers = ManualTimerService::new();
        let mut manager = manager(1, transport(5, 0), &timers, observers(1), 500);
        let outcomes = Outcomes::default();

        let handle = create_and_send(&mut manager, 1, CON_GET, &outcomes);
        assert_eq!(timers.pending_delays(), vec![Duration::from_millis(2500)]);
        assert_eq!(manager.create_transaction(2, peer()), Err(TransactionError::PoolExhausted));

        for expected_delay in [5000, 10000, 20000] {
            manager.on_timer_expired(timers.fire_next().unwrap());
            assert_eq!(timers.pending_delays(), vec![Duration::from_millis(expected_delay)]);
            assert!(outcomes.lock().unwrap().is_empty());
        }

        manager.on_timer_expired(timers.fire_next().unwrap());
        assert_eq!(timers.now(), Duration::from_millis(2500 + 5000 + 10000 + 20000));
        assert_eq!(timers.num_pending(), 0);
        assert_eq!(*outcomes.lock().unwrap(), vec![None]);
        assert!(manager.transaction(handle).is_none());
        assert_eq!(manager.find_by_message_id(1), None);
        assert_eq!(manager.open_transactions(), 0);

        assert!(manager.create_transaction(2, peer()).is_ok());
    }

    #[test]
    fn test_reply_stops_retransmission() {
        let timers = ManualTimerService::new();
        let mut manager = manager(1, transport(2, 0), &timers, observers(0), 0);
        let outcomes = Outcomes::default();

        create_and_send(&mut manager, 1, CON_GET, &outcomes);
        manager.on_timer_expired(timers.fire_next().unwrap());
        assert_eq!(timers.num_pending(), 1);

        assert!(manager.complete_with_reply(1, &peer(), ACK_CONTENT));
        assert_eq!(timers.num_pending(), 0);
        assert_eq!(manager.open_transactions(), 0);
        assert_eq!(*outcomes.lock().unwrap(), vec![Some(ACK_CONTENT.to_vec())]);

        // a duplicate of the reply finds nothing
        assert!(!manager.complete_with_reply(1, &peer(), ACK_CONTENT));
        fire_all(&mut manager, &timers);
        assert_eq!(outcomes.lock().unwrap().len(), 1);
    }

    #[rstest]
    #[case::other_port(Endpoint::localhost(5684))]
    #[case::other_address(Endpoint::new([10, 0, 0, 1].into(), 5683))]
    fn test_reply_from_other_endpoint_is_ignored(#[case] from: Endpoint) {
        let timers = ManualTimerService::new();
        let mut manager = manager(1, transport(1, 0), &timers, observers(0), 0);
        let outcomes = Outcomes::default();

        let handle = create_and_send(&mut manager, 1, CON_GET, &outcomes);
        assert!(!manager.complete_with_reply(1, &from, ACK_CONTENT));
        assert!(manager.transaction(handle).is_some());
        assert_eq!(timers.num_pending(), 1);
        assert!(outcomes.lock().unwrap().is_empty());

        manager.clear_all();
    }

    #[test]
    fn test_reply_matches_endpoint_for_shared_message_id() {
        let timers = ManualTimerService::new();
        let first_peer = Endpoint::new([10, 0, 0, 1].into(), 5683);
        let second_peer = Endpoint::new([10, 0, 0, 2].into(), 5683);

        let mut transport = MockTransport::new();
        transport.expect_transmit()
            .times(2)
            .withf(|_, packet| packet == CON_GET)
            .return_const(());
        let mut manager = manager(2, Box::new(transport), &timers, observers(0), 0);

        let first_outcomes = Outcomes::default();
        let second_outcomes = Outcomes::default();
        let open = |manager: &mut TransactionManager, endpoint: Endpoint, outcomes: &Outcomes| {
            let handle = manager.create_transaction(7, endpoint).unwrap();
            let transaction = manager.transaction_mut(handle).unwrap();
            transaction.set_packet(CON_GET).unwrap();
            transaction.set_response_handler(recording_handler(outcomes));
            manager.send(handle);
            handle
        };
        let first = open(&mut manager, first_peer, &first_outcomes);
        let second = open(&mut manager, second_peer, &second_outcomes);

        assert!(manager.complete_with_reply(7, &second_peer, ACK_CONTENT));
        assert_eq!(*second_outcomes.lock().unwrap(), vec![Some(ACK_CONTENT.to_vec())]);
        assert!(first_outcomes.lock().unwrap().is_empty());
        assert!(manager.transaction(second).is_none());
        assert!(manager.transaction(first).is_some());
        assert_eq!(manager.open_transactions(), 1);
        assert_eq!(timers.num_pending(), 1);

        assert!(!manager.complete_with_reply(7, &second_peer, ACK_CONTENT));
        assert!(manager.complete_with_reply(7, &first_peer, ACK_CONTENT));
        assert_eq!(*first_outcomes.lock().unwrap(), vec![Some(ACK_CONTENT.to_vec())]);
        assert_eq!(manager.open_transactions(), 0);
        assert_eq!(timers.num_pending(), 0);
    }

    #[test]
    fn test_late_reply_after_timeout() {
        let timers = ManualTimerService::new();
        let mut manager = manager(1, transport(5, 0), &timers, observers(1), 0);
        let outcomes = Outcomes::default();

        create_and_send(&mut manager, 1, CON_GET, &outcomes);
        fire_all(&mut manager, &timers);
        assert_eq!(*outcomes.lock().unwrap(), vec![None]);

        assert!(!manager.complete_with_reply(1, &peer(), ACK_CONTENT));
        assert_eq!(*outcomes.lock().unwrap(), vec![None]);
    }

    #[test]
    fn test_clear_twice() {
        let timers = ManualTimerService::new();
        let mut manager = manager(2, transport(2, 0), &timers, observers(0), 0);
        let outcomes = Outcomes::default();

        let first = create_and_send(&mut manager, 1, CON_GET, &outcomes);
        let second = create_and_send(&mut manager, 3, CON_GET, &outcomes);
        assert_eq!(timers.num_pending(), 2);

        manager.clear_on_ack(first);
        manager.clear(first);
        assert_eq!(manager.open_transactions(), 1);
        assert_eq!(timers.num_pending(), 1);
        assert!(manager.transaction(second).is_some());
        assert_eq!(manager.find_by_message_id(3), Some(second));

        // the slot can be reused exactly once
        let third = manager.create_transaction(4, peer()).unwrap();
        assert_eq!(manager.create_transaction(5, peer()), Err(TransactionError::PoolExhausted));
        manager.clear(first);
        assert!(manager.transaction(third).is_some());
        assert!(outcomes.lock().unwrap().is_empty());

        manager.clear_all();
        assert_eq!(manager.open_transactions(), 0);
        assert_eq!(timers.num_pending(), 0);
    }

    #[test]
    fn test_stale_expiration_is_ignored() {
        let timers = ManualTimerService::new();
        let mut manager = manager(1, transport(2, 0), &timers, observers(0), 0);
        let outcomes = Outcomes::default();

        // the timer expires, but the ack is processed before the expiration
        let old = create_and_send(&mut manager, 1, CON_GET, &outcomes);
        let stale = timers.fire_next().unwrap();
        manager.clear_on_ack(old);
        manager.on_timer_expired(stale);
        assert_eq!(manager.open_transactions(), 0);

        // ... even if the slot was reused in the meantime
        let new = create_and_send(&mut manager, 1, CON_GET, &outcomes);
        manager.on_timer_expired(stale);
        assert_eq!(manager.transaction(new).map(|t| t.retry_count()), Some(0));
        assert_eq!(timers.num_pending(), 1);

        manager.clear(new);
        assert!(outcomes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_resend_does_not_leave_two_timers() {
        let timers = ManualTimerService::new();
        let mut manager = manager(1, transport(2, 0), &timers, observers(0), 0);
        let outcomes = Outcomes::default();

        let handle = create_and_send(&mut manager, 1, CON_GET, &outcomes);
        manager.send(handle);
        assert_eq!(timers.num_pending(), 1);

        manager.clear(handle);
        assert_eq!(timers.num_pending(), 0);
    }

    #[test]
    fn test_timeout_handler_can_reuse_slot() {
        let timers = ManualTimerService::new();
        let mut manager = manager(1, transport(5, 1), &timers, observers(1), 0);
        let outcomes = Outcomes::default();

        let handle = manager.create_transaction(1, peer()).unwrap();
        let transaction = manager.transaction_mut(handle).unwrap();
        transaction.set_packet(CON_GET).unwrap();
        let inner_outcomes = outcomes.clone();
        transaction.set_response_handler(move |manager, reply| {
            inner_outcomes.lock().unwrap().push(reply.map(|r| r.to_vec()));

            let follow_up = manager.create_transaction(2, peer())
                .expect("slot of the timed out transaction should be free");
            manager.transaction_mut(follow_up).unwrap().set_packet(NON_GET).unwrap();
            manager.send(follow_up);
        });
        manager.send(handle);

        fire_all(&mut manager, &timers);
        assert_eq!(*outcomes.lock().unwrap(), vec![None]);
        assert_eq!(manager.open_transactions(), 0);
    }

    #[test]
    fn test_reply_handler_can_reuse_slot() {
        let timers = ManualTimerService::new();
        let mut manager = manager(1, transport(2, 0), &timers, observers(0), 0);
        let outcomes = Outcomes::default();

        let handle = manager.create_transaction(1, peer()).unwrap();
        let transaction = manager.transaction_mut(handle).unwrap();
        transaction.set_packet(CON_GET).unwrap();
        let follow_up_outcomes = outcomes.clone();
        transaction.set_response_handler(move |manager, _| {
            let follow_up = manager.create_transaction(9, peer()).unwrap();
            let transaction = manager.transaction_mut(follow_up).unwrap();
            transaction.set_packet(CON_GET).unwrap();
            transaction.set_response_handler(recording_handler(&follow_up_outcomes));
            manager.send(follow_up);
        });
        manager.send(handle);

        assert!(manager.complete_with_reply(1, &peer(), ACK_CONTENT));
        assert_eq!(manager.open_transactions(), 1);
        assert!(manager.find_by_message_id(9).is_some());
        assert_eq!(timers.num_pending(), 1);

        manager.clear_all();
        assert!(outcomes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_retransmits_times_out_on_first_send() {
        let timers = ManualTimerService::new();
        let mut manager = TransactionManager::new(
            Arc::new(TransactionConfig {
                max_retransmit: 0,
                ..(*config(1)).clone()
            }),
            transport(1, 0),
            Box::new(timers.clone()),
            observers(1),
            Box::new(MockRandom::new()),
        ).unwrap();
        let outcomes = Outcomes::default();

        create_and_send(&mut manager, 1, CON_GET, &outcomes);
        assert_eq!(timers.num_pending(), 0);
        assert_eq!(*outcomes.lock().unwrap(), vec![None]);
    }

    #[rstest]
    #[case::no_mask(0, 0, 2000)]
    #[case::mask(1000, 1000, 3000)]
    fn test_initial_interval(#[case] mask_millis: u64, #[case] jitter: u64, #[case] expected_millis: u64) {
        let config = TransactionConfig {
            backoff_jitter_mask: Duration::from_millis(mask_millis),
            ..TransactionConfig::default_coap()
        };
        let mut random = MockRandom::new();
        random.expect_gen_u64_inclusive()
            .times(if mask_millis == 0 { 0 } else { 1 })
            .return_const(jitter);

        assert_eq!(initial_interval(&config, &mut random), Duration::from_millis(expected_millis));
    }
}
