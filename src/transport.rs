#[cfg(test)] use mockall::automock;
use crate::endpoint::Endpoint;

/// This is an abstraction for putting a packet on the wire, introduced to decouple the
///  transaction layer from the actual datagram transport (and to facilitate mocking the I/O
///  part away for testing).
///
/// Transmission is best effort and must not block: a packet that can not be sent is treated
///  exactly like a packet that got lost on the network, i.e. it is handled by retransmission.
#[cfg_attr(test, automock)]
pub trait Transport: Send {
    fn transmit(&self, to: &Endpoint, packet: &[u8]);
}
