use std::fmt::{Debug, Formatter};
use std::time::Duration;
use bytes::BytesMut;
use crate::endpoint::Endpoint;
use crate::error::TransactionError;
use crate::header::{self, MessageType};
use crate::manager::TransactionManager;
use crate::timer::TimerHandle;

/// Called exactly once when a transaction concludes: with the reply, or with `None` if the
///  transaction timed out. The transaction is already cleared when this is called, so the
///  handler is free to create and send new transactions.
pub type ResponseHandler = Box<dyn FnOnce(&mut TransactionManager, Option<&[u8]>) + Send>;

/// Refers to a transaction in the [TransactionManager]'s pool. Slots are reused, so the handle
///  carries the slot's generation: a handle outlives its transaction, but it can never refer to
///  a different transaction that was allocated in the same slot later.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct TransactionHandle {
    index: usize,
    generation: u32,
}

impl TransactionHandle {
    pub(crate) fn new(index: usize, generation: u32) -> TransactionHandle {
        TransactionHandle { index, generation }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }
}

/// The bookkeeping for one outgoing message
pub struct Transaction {
    pub(crate) message_id: u16,
    pub(crate) retry_count: u8,
    /// unset until the first timer is armed
    pub(crate) retry_interval: Option<Duration>,
    pub(crate) endpoint: Endpoint,
    /// preallocated with `max_packet_size` capacity, never grows
    packet: BytesMut,
    max_packet_size: usize,
    pub(crate) timer: Option<TimerHandle>,
    pub(crate) response_handler: Option<ResponseHandler>,
}

impl Debug for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("message_id", &self.message_id)
            .field("retry_count", &self.retry_count)
            .field("retry_interval", &self.retry_interval)
            .field("endpoint", &self.endpoint)
            .field("packet_len", &self.packet.len())
            .field("timer", &self.timer)
            .field("has_response_handler", &self.response_handler.is_some())
            .finish()
    }
}

impl Transaction {
    /// an unused pool slot's transaction
    pub(crate) fn with_packet_capacity(max_packet_size: usize) -> Transaction {
        Transaction {
            message_id: 0,
            retry_count: 0,
            retry_interval: None,
            endpoint: Endpoint::new([0, 0, 0, 0].into(), 0),
            packet: BytesMut::with_capacity(max_packet_size),
            max_packet_size,
            timer: None,
            response_handler: None,
        }
    }

    pub(crate) fn init(&mut self, message_id: u16, endpoint: Endpoint) {
        self.message_id = message_id;
        self.retry_count = 0;
        self.retry_interval = None;
        self.endpoint = endpoint;
        self.packet.clear();
        self.timer = None;
        self.response_handler = None;
    }

    pub(crate) fn release(&mut self) {
        debug_assert!(self.timer.is_none(), "releasing transaction with a pending timer");
        self.packet.clear();
        self.retry_interval = None;
        self.timer = None;
        self.response_handler = None;
    }

    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    pub fn retry_count(&self) -> u8 {
        self.retry_count
    }

    pub fn retry_interval(&self) -> Option<Duration> {
        self.retry_interval
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn packet(&self) -> &[u8] {
        &self.packet
    }

    pub fn is_timer_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// the type bits of the stored packet's header, `None` if no packet was stored
    pub fn message_type(&self) -> Option<MessageType> {
        header::message_type(&self.packet)
    }

    /// Stores the encoded message. This is transmitted verbatim on every (re)transmission.
    pub fn set_packet(&mut self, packet: &[u8]) -> Result<(), TransactionError> {
        if packet.len() > self.max_packet_size {
            return Err(TransactionError::PacketTooLarge { len: packet.len(), max: self.max_packet_size });
        }
        self.packet.clear();
        self.packet.extend_from_slice(packet);
        Ok(())
    }

    pub fn set_response_handler(&mut self, handler: impl FnOnce(&mut TransactionManager, Option<&[u8]>) + Send + 'static) {
        self.response_handler = Some(Box::new(handler));
    }
}
