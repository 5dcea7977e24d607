//! Read-only access to the fixed part of an encoded CoAP header. Encoding and decoding of
//!  messages is done elsewhere - the transaction layer only needs to know the message type (to
//!  decide whether a packet is retransmitted) and the message id (to correlate replies).
//!
//! ```ascii
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const COAP_HEADER_TYPE_MASK: u8 = 0x30;
pub const COAP_HEADER_TYPE_POSITION: u8 = 4;
pub const COAP_HEADER_LEN: usize = 4;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum MessageType {
    /// requires acknowledgment, retransmitted until acknowledged or timed out
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

/// `None` for an empty packet
pub fn message_type(packet: &[u8]) -> Option<MessageType> {
    let first = *packet.first()?;
    MessageType::try_from((first & COAP_HEADER_TYPE_MASK) >> COAP_HEADER_TYPE_POSITION).ok()
}

/// `None` if the packet is shorter than the fixed header
pub fn message_id(packet: &[u8]) -> Option<u16> {
    if packet.len() < COAP_HEADER_LEN {
        return None;
    }
    Some(u16::from_be_bytes([packet[2], packet[3]]))
}
