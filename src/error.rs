use std::fmt::{Display, Formatter};

/// Failures that are reported synchronously to the caller. Note that a lookup miss is not an
///  error (lookups return `Option`), and neither is a timeout: that is reported through the
///  transaction's response handler.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TransactionError {
    /// all slots of the transaction pool are in use
    PoolExhausted,
    /// the packet does not fit into a transaction's preallocated buffer
    PacketTooLarge { len: usize, max: usize },
    /// the handle refers to a transaction that was cleared in the meantime
    StaleHandle,
    /// the transaction was sent already and is awaiting its reply
    AlreadySent,
    /// the engine task is no longer running
    EngineStopped,
}

impl Display for TransactionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionError::PoolExhausted => write!(f, "no free transaction slot"),
            TransactionError::PacketTooLarge { len, max } => write!(f, "packet of {} bytes exceeds maximum packet size of {} bytes", len, max),
            TransactionError::StaleHandle => write!(f, "transaction does not exist (anymore)"),
            TransactionError::AlreadySent => write!(f, "transaction is in flight already"),
            TransactionError::EngineStopped => write!(f, "transaction engine is not running"),
        }
    }
}

impl std::error::Error for TransactionError {}
