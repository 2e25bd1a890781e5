//! Decision core shared between the eBPF programs and userspace
//!
//! Everything on the per-packet path lives here so the kernel programs and
//! the userspace tests run the same code:
//! - header parsing over any bounds-checked [`headers::PacketView`]
//! - session key derivation
//! - the table contracts the host environment has to provide
//! - the policy engine and the three dispatch paths
//!
//! Records crossing the kernel/userspace boundary are `#[repr(C)]` and
//! `no_std` compatible.

#![cfg_attr(not(feature = "userspace"), no_std)]

pub mod dispatch;
pub mod headers;
pub mod key;
pub mod policy;
pub mod tables;

pub use dispatch::{Decision, Dispatcher, Reason, Verdict};
pub use headers::{parse_frame, PacketView, ParseError, ParsedHeaders, TcpFlags, Transport};
pub use key::{derive_endpoint_key, derive_key, SessionKey};
pub use tables::{AttemptLedger, EventSink, LocalAddrs, PolicySource, SessionTable, TableFull};

/// Maximum number of tracked TCP sessions
pub const MAX_SESSIONS: u32 = 1024;

/// Maximum number of remote endpoints tracked by the combined path
pub const MAX_OUTGOING: u32 = 1024;

/// Maximum number of source addresses in the unauthorized-attempt ledger
pub const MAX_UNAUTHORIZED: u32 = 256;

/// Maximum number of allow-listed destination ports
pub const MAX_ALLOWED_PORTS: u32 = 256;

/// Maximum number of protected-host addresses
pub const MAX_LOCAL_ADDRS: u32 = 16;

/// Flow event exported for accepted inbound traffic
///
/// Layout (16 bytes, 4-byte aligned):
/// - src_addr / dst_addr: IPv4 addresses in host byte order (`Ipv4Addr::from`)
/// - src_port / dst_port: host byte order
/// - protocol: IP protocol (6=TCP, 17=UDP)
/// - reason: [`Reason`] code of the accepting decision
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "userspace", derive(PartialEq, Eq))]
pub struct FlowEvent {
    pub src_addr: u32,
    pub dst_addr: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub reason: u8,
    pub _padding: [u8; 2],
}

impl FlowEvent {
    pub fn new(headers: &ParsedHeaders, reason: Reason) -> Self {
        Self {
            src_addr: headers.src_addr,
            dst_addr: headers.dst_addr,
            src_port: headers.src_port,
            dst_port: headers.dst_port,
            protocol: headers.transport.protocol(),
            reason: reason as u8,
            _padding: [0; 2],
        }
    }
}

/// Unauthorized-attempt record, keyed by source address
///
/// In the kernel the ledger is a per-CPU map, so each CPU holds its own
/// partial count. Use [`UnauthorizedEntry::merge`] before showing a total.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "userspace", derive(PartialEq, Eq))]
pub struct UnauthorizedEntry {
    pub src_addr: u32,
    pub dst_addr: u32,
    pub count: u32,
}

impl UnauthorizedEntry {
    pub fn first(src_addr: u32, dst_addr: u32) -> Self {
        Self {
            src_addr,
            dst_addr,
            count: 1,
        }
    }

    /// Fold per-CPU shards into one entry.
    ///
    /// Counts are summed. The descriptive fields come from the first shard
    /// (in CPU order) that saw an attempt. Returns `None` if no shard has a
    /// non-zero count.
    pub fn merge<'a, I>(shards: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a UnauthorizedEntry>,
    {
        shards
            .into_iter()
            .filter(|shard| shard.count > 0)
            .fold(None, |merged: Option<Self>, shard| match merged {
                Some(mut total) => {
                    total.count = total.count.saturating_add(shard.count);
                    Some(total)
                }
                None => Some(*shard),
            })
    }
}

/// IP protocol constants
pub mod protocol {
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// Indices into the per-CPU `COUNTERS` array
pub mod counters {
    pub const PASSED: u32 = 0;
    pub const DROPPED: u32 = 1;
    pub const MALFORMED: u32 = 2;
    pub const SESSIONS_FULL: u32 = 3;
    pub const OUTGOING_FULL: u32 = 4;
    pub const LEDGER_FULL: u32 = 5;
    pub const EVENTS_DROPPED: u32 = 6;

    pub const COUNT: u32 = 7;

    pub const NAMES: [&str; COUNT as usize] = [
        "passed",
        "dropped",
        "malformed",
        "sessions_full",
        "outgoing_full",
        "ledger_full",
        "events_dropped",
    ];
}

#[cfg(all(feature = "userspace", target_os = "linux"))]
mod user_impls {
    use super::{FlowEvent, SessionKey, UnauthorizedEntry};
    use aya::Pod;

    unsafe impl Pod for FlowEvent {}
    unsafe impl Pod for SessionKey {}
    unsafe impl Pod for UnauthorizedEntry {}
}

#[cfg(feature = "userspace")]
const _: () = {
    assert!(
        core::mem::size_of::<FlowEvent>() == 16,
        "FlowEvent must be exactly 16 bytes"
    );
    assert!(
        core::mem::size_of::<UnauthorizedEntry>() == 12,
        "UnauthorizedEntry must be exactly 12 bytes"
    );
    assert!(
        core::mem::size_of::<SessionKey>() == 12,
        "SessionKey must be exactly 12 bytes with no padding"
    );
};
