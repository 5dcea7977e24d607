//! Reliable delivery for CoAP-style request / response messaging over an unreliable datagram
//!  transport.
//!
//! A message that demands acknowledgment ('confirmable') is tracked in a *transaction*, which is
//!  retransmitted with exponential backoff until it is either acknowledged or its retry budget is
//!  exhausted. The originating layer is notified exactly once, with either the reply or a
//!  timeout.
//!
//! ## Resources
//!
//! Transactions live in a pool of fixed capacity that is allocated once when the
//!  [manager::TransactionManager] is created. Each slot owns a packet buffer of the configured
//!  maximum packet size, so sending never allocates packet memory and a run of timeouts can
//!  never exhaust the pool: every terminal path frees the slot *before* anybody is notified.
//!
//! ## Retransmission schedule
//!
//! ```ascii
//! attempt 0: transmit, arm timer for RESPONSE_TIMEOUT + random(0..=JITTER_MASK)
//! attempt n: transmit, arm timer for 2 * previous interval      (0 < n < MAX_RETRANSMIT)
//! attempt MAX_RETRANSMIT: transmit, then time out - no further timer is armed
//! ```
//!
//! Non-confirmable messages are transmitted once and released immediately.
//!
//! ## Execution model
//!
//! The core ([manager::TransactionManager]) is a plain state machine without any locking: all
//!  operations - sending, timer expiry, acknowledgment - are expected to run on a single
//!  cooperative context. [engine] provides that context as a tokio task that serializes
//!  commands, incoming datagrams and timer expirations.
//!
//! The timer is a collaborator behind the [timer::VirtualTimer] trait: the core only arms and
//!  cancels timers, and the timer service hands back [timer::Expiration]s.

pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod header;
pub mod manager;
pub mod observe;
mod pool;
pub mod timer;
pub mod transaction;
pub mod transport;
pub mod udp;
pub mod util;
