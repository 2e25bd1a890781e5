//! Session key derivation
//!
//! A session is always keyed from the initiator's point of view. The egress
//! path sees the initiator as the packet source; the ingress path sees it as
//! the packet destination and swaps the tuple before deriving. Both call
//! sites must produce the same bits for the same flow.

use crate::headers::ParsedHeaders;

/// Canonical key of one TCP session.
///
/// Slots are fixed: initiator address and port first, responder second.
/// The fields do not overlap, so distinct 4-tuples never collide.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub initiator_addr: u32,
    pub responder_addr: u32,
    pub initiator_port: u16,
    pub responder_port: u16,
}

/// Pack a 4-tuple into a [`SessionKey`]. `ip1`/`port1` is the initiator.
#[inline(always)]
pub fn derive_key(ip1: u32, port1: u16, ip2: u32, port2: u16) -> SessionKey {
    SessionKey {
        initiator_addr: ip1,
        responder_addr: ip2,
        initiator_port: port1,
        responder_port: port2,
    }
}

/// Key of a single remote endpoint (address and port), used by the combined
/// path where only the peer's identity matters.
#[inline(always)]
pub fn derive_endpoint_key(ip: u32, port: u16) -> u64 {
    ((ip as u64) << 16) | port as u64
}

impl SessionKey {
    /// Key for a packet leaving the protected host: the source initiated.
    #[inline(always)]
    pub fn egress(headers: &ParsedHeaders) -> Self {
        derive_key(
            headers.src_addr,
            headers.src_port,
            headers.dst_addr,
            headers.dst_port,
        )
    }

    /// Key for a packet entering the protected host: the destination
    /// initiated.
    #[inline(always)]
    pub fn ingress(headers: &ParsedHeaders) -> Self {
        derive_key(
            headers.dst_addr,
            headers.dst_port,
            headers.src_addr,
            headers.src_port,
        )
    }
}
