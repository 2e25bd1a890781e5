//! Ethernet / IPv4 / TCP / UDP header parsing
//!
//! Every header is bounds-checked as a whole (`offset + size <= end`) before
//! any of its fields is read. A failed parse is not an error condition for
//! the caller: the dispatcher passes such frames untouched.

use crate::protocol;

pub const ETH_HDR_LEN: usize = 14;
pub const IPV4_MIN_HDR_LEN: usize = 20;
pub const TCP_HDR_LEN: usize = 20;
pub const UDP_HDR_LEN: usize = 8;

pub const ETH_P_IPV4: u16 = 0x0800;

const ETH_TYPE_OFFSET: usize = 12;
const IPV4_PROTO_OFFSET: usize = 9;
const IPV4_SADDR_OFFSET: usize = 12;
const IPV4_DADDR_OFFSET: usize = 16;
const TCP_FLAGS_OFFSET: usize = 13;

/// Read-only, bounds-checked view over one frame.
///
/// Implemented for byte slices here and for the XDP/TC packet pointers in
/// the probes crate.
pub trait PacketView {
    /// Offset one past the last readable byte.
    fn end(&self) -> usize;

    /// Copy `N` bytes starting at `offset`, or `None` if they are not all
    /// inside the frame.
    fn bytes<const N: usize>(&self, offset: usize) -> Option<[u8; N]>;
}

impl PacketView for [u8] {
    fn end(&self) -> usize {
        self.len()
    }

    fn bytes<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let end = offset.checked_add(N)?;
        self.get(offset..end)?.try_into().ok()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// A header does not fit between its offset and the frame end
    Truncated,
    /// EtherType is not IPv4
    NotIpv4(u16),
    /// IPv4 version or IHL field is invalid
    BadIpv4Header,
    /// IP protocol is neither TCP nor UDP
    UnsupportedProtocol(u8),
}

/// TCP control flags (byte 13 of the TCP header)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;

    pub fn fin(self) -> bool {
        self.0 & Self::FIN != 0
    }

    pub fn syn(self) -> bool {
        self.0 & Self::SYN != 0
    }

    pub fn rst(self) -> bool {
        self.0 & Self::RST != 0
    }

    pub fn ack(self) -> bool {
        self.0 & Self::ACK != 0
    }

    /// SYN without ACK: the first packet of an active open.
    pub fn opens_session(self) -> bool {
        self.syn() && !self.ack()
    }

    /// FIN, or RST together with ACK.
    pub fn closes_session(self) -> bool {
        self.fin() || (self.rst() && self.ack())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Tcp(TcpFlags),
    Udp,
}

impl Transport {
    pub fn protocol(&self) -> u8 {
        match self {
            Transport::Tcp(_) => protocol::TCP,
            Transport::Udp => protocol::UDP,
        }
    }
}

/// Headers of one successfully parsed frame. Addresses and ports are in host
/// byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParsedHeaders {
    pub ether_type: u16,
    pub src_addr: u32,
    pub dst_addr: u32,
    pub transport: Transport,
    pub src_port: u16,
    pub dst_port: u16,
}

impl ParsedHeaders {
    pub fn tcp_flags(&self) -> Option<TcpFlags> {
        match self.transport {
            Transport::Tcp(flags) => Some(flags),
            Transport::Udp => None,
        }
    }
}

#[inline(always)]
fn ensure<V: PacketView + ?Sized>(view: &V, offset: usize, len: usize) -> Result<(), ParseError> {
    match offset.checked_add(len) {
        Some(end) if end <= view.end() => Ok(()),
        _ => Err(ParseError::Truncated),
    }
}

#[inline(always)]
fn read<V: PacketView + ?Sized, const N: usize>(
    view: &V,
    offset: usize,
) -> Result<[u8; N], ParseError> {
    view.bytes::<N>(offset).ok_or(ParseError::Truncated)
}

/// Parse Ethernet, IPv4 and the TCP or UDP header of a frame.
pub fn parse_frame<V: PacketView + ?Sized>(view: &V) -> Result<ParsedHeaders, ParseError> {
    ensure(view, 0, ETH_HDR_LEN)?;
    let ether_type = u16::from_be_bytes(read(view, ETH_TYPE_OFFSET)?);
    if ether_type != ETH_P_IPV4 {
        return Err(ParseError::NotIpv4(ether_type));
    }

    let ip = ETH_HDR_LEN;
    ensure(view, ip, IPV4_MIN_HDR_LEN)?;
    let [version_ihl] = read::<V, 1>(view, ip)?;
    let ihl = (version_ihl & 0x0f) as usize;
    if version_ihl >> 4 != 4 || ihl < 5 {
        return Err(ParseError::BadIpv4Header);
    }
    let ip_len = ihl * 4;
    ensure(view, ip, ip_len)?;

    let [proto] = read::<V, 1>(view, ip + IPV4_PROTO_OFFSET)?;
    let src_addr = u32::from_be_bytes(read(view, ip + IPV4_SADDR_OFFSET)?);
    let dst_addr = u32::from_be_bytes(read(view, ip + IPV4_DADDR_OFFSET)?);

    let l4 = ip + ip_len;
    let transport = match proto {
        protocol::TCP => {
            ensure(view, l4, TCP_HDR_LEN)?;
            let [flags] = read::<V, 1>(view, l4 + TCP_FLAGS_OFFSET)?;
            Transport::Tcp(TcpFlags(flags))
        }
        protocol::UDP => {
            ensure(view, l4, UDP_HDR_LEN)?;
            Transport::Udp
        }
        other => return Err(ParseError::UnsupportedProtocol(other)),
    };

    // source and destination ports share the same offsets in TCP and UDP
    let src_port = u16::from_be_bytes(read(view, l4)?);
    let dst_port = u16::from_be_bytes(read(view, l4 + 2)?);

    Ok(ParsedHeaders {
        ether_type,
        src_addr,
        dst_addr,
        transport,
        src_port,
        dst_port,
    })
}

/// Frame builders shared by the unit tests of this crate.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn frame(
        proto: u8,
        src: [u8; 4],
        sport: u16,
        dst: [u8; 4],
        dport: u16,
        flags: u8,
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0xaa; 6]);
        buf.extend_from_slice(&[0xbb; 6]);
        buf.extend_from_slice(&ETH_P_IPV4.to_be_bytes());

        let mut ip = [0u8; IPV4_MIN_HDR_LEN];
        ip[0] = 0x45;
        ip[8] = 64;
        ip[IPV4_PROTO_OFFSET] = proto;
        ip[IPV4_SADDR_OFFSET..IPV4_SADDR_OFFSET + 4].copy_from_slice(&src);
        ip[IPV4_DADDR_OFFSET..IPV4_DADDR_OFFSET + 4].copy_from_slice(&dst);
        buf.extend_from_slice(&ip);

        buf.extend_from_slice(&sport.to_be_bytes());
        buf.extend_from_slice(&dport.to_be_bytes());
        if proto == protocol::TCP {
            let mut rest = [0u8; TCP_HDR_LEN - 4];
            rest[8] = 0x50;
            rest[TCP_FLAGS_OFFSET - 4] = flags;
            buf.extend_from_slice(&rest);
        } else {
            buf.extend_from_slice(&[0u8; UDP_HDR_LEN - 4]);
        }
        buf
    }

    pub fn tcp(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, flags: u8) -> Vec<u8> {
        frame(protocol::TCP, src, sport, dst, dport, flags)
    }

    pub fn udp(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16) -> Vec<u8> {
        frame(protocol::UDP, src, sport, dst, dport, 0)
    }
}
