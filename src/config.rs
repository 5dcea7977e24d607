use std::time::Duration;
use anyhow::bail;

/// Number of transactions that can be in flight at the same time
pub const COAP_MAX_OPEN_TRANSACTIONS: usize = 4;
/// Number of retransmissions of a confirmable message before it times out (RFC 7252 MAX_RETRANSMIT)
pub const COAP_MAX_RETRANSMIT: u8 = 4;
/// Base interval before the first retransmission (RFC 7252 ACK_TIMEOUT)
pub const COAP_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);
/// Upper bound for the random part of the first interval, i.e. ACK_TIMEOUT * (ACK_RANDOM_FACTOR - 1)
pub const COAP_RESPONSE_TIMEOUT_BACKOFF_MASK: Duration = Duration::from_millis(1000);
/// Maximum size of an encoded message, including header and options
pub const COAP_MAX_PACKET_SIZE: usize = 1152;

/// Upper bound for `max_retransmit` - beyond that, the doubled intervals get absurdly long
const MAX_RETRANSMIT_LIMIT: u8 = 20;

/// Configuration of the transaction layer. This is created once at startup and shared as
///  `Arc<TransactionConfig>`, it is never modified afterwards.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// This is the capacity of the transaction pool. All slots (including their packet buffers)
    ///  are allocated up front, and creating a transaction fails when all of them are in use.
    pub max_open_transactions: usize,

    /// The number of *re*transmissions of a confirmable message. A message that is never
    ///  acknowledged is transmitted `max_retransmit + 1` times in total, and the last
    ///  transmission is not followed by a timer but by timing out the transaction.
    pub max_retransmit: u8,

    /// The fixed part of the interval before the first retransmission
    pub response_timeout: Duration,

    /// The first interval is extended by a random duration between zero and this value
    ///  (inclusive, millisecond granularity), desynchronizing retransmissions from different
    ///  devices. Subsequent intervals are doubled without adding new jitter.
    pub backoff_jitter_mask: Duration,

    /// The capacity of each transaction's packet buffer. Packets exceeding this are rejected
    ///  rather than growing the buffer.
    pub max_packet_size: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self::default_coap()
    }
}

impl TransactionConfig {
    /// RFC 7252 transmission parameters with a small pool for constrained devices
    pub fn default_coap() -> TransactionConfig {
        TransactionConfig {
            max_open_transactions: COAP_MAX_OPEN_TRANSACTIONS,
            max_retransmit: COAP_MAX_RETRANSMIT,
            response_timeout: COAP_RESPONSE_TIMEOUT,
            backoff_jitter_mask: COAP_RESPONSE_TIMEOUT_BACKOFF_MASK,
            max_packet_size: COAP_MAX_PACKET_SIZE,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_open_transactions == 0 {
            bail!("transaction pool must have room for at least one transaction");
        }
        if self.max_open_transactions > u16::MAX as usize {
            bail!("transaction pool capacity {} is too large", self.max_open_transactions);
        }
        if self.response_timeout.is_zero() {
            bail!("response timeout must not be zero");
        }
        if self.max_packet_size == 0 {
            bail!("packet size must not be zero");
        }
        if self.max_retransmit > MAX_RETRANSMIT_LIMIT {
            bail!("max_retransmit must not exceed {}, was {}", MAX_RETRANSMIT_LIMIT, self.max_retransmit);
        }
        if self.max_retransmit_span().is_none() {
            bail!("retransmission intervals overflow for response timeout {:?} and jitter mask {:?}", self.response_timeout, self.backoff_jitter_mask);
        }
        Ok(())
    }

    /// The longest interval that can be armed, i.e. the initial interval with maximum jitter,
    ///  doubled for every retransmission except the last. `None` if that overflows.
    pub fn max_retransmit_span(&self) -> Option<Duration> {
        let initial = self.response_timeout.checked_add(self.backoff_jitter_mask)?;
        let factor = 1u32.checked_shl(u32::from(self.max_retransmit.saturating_sub(1)))?;
        initial.checked_mul(factor)
    }
}
