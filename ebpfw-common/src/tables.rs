//! Contracts for the stores the host environment provides
//!
//! The kernel programs back these with eBPF maps, userspace with concurrent
//! in-process maps. Every method is one table operation: implementations
//! must not block, and must not hold a lock past the call.

use crate::{key::SessionKey, FlowEvent};

/// Returned when a new key does not fit in a capacity-bounded table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableFull;

/// Presence store for session keys (`SESSIONS`, `OUTGOING`).
///
/// `K` is [`SessionKey`] for the TCP session table and the `u64` endpoint
/// key for the combined path.
pub trait SessionTable<K = SessionKey> {
    /// Insert or refresh `key`. A key that is already present is always
    /// accepted; a new key past capacity is rejected.
    fn insert(&self, key: &K) -> Result<(), TableFull>;

    /// Remove `key`. Removing an absent key is a no-op.
    fn remove(&self, key: &K);

    fn contains(&self, key: &K) -> bool;
}

/// Per-source unauthorized-attempt counter.
pub trait AttemptLedger {
    /// Count one attempt from `src_addr`. The first attempt also records
    /// `dst_addr`; later attempts only increment. A new source past capacity
    /// is rejected.
    fn record_attempt(&self, src_addr: u32, dst_addr: u32) -> Result<(), TableFull>;
}

/// Read side of the externally owned policy. Each call is an independent
/// snapshot; nothing is cached between calls.
pub trait PolicySource {
    fn deny_mode(&self) -> bool;

    fn port_allowed(&self, port: u16) -> bool;
}

/// Best-effort event channel. Failures are the sink's business; the
/// verdict is already final when `emit` is called.
pub trait EventSink {
    fn emit(&self, event: &FlowEvent);
}

/// Addresses owned by the protected host, used by the combined path to tell
/// outgoing from incoming traffic.
pub trait LocalAddrs {
    fn is_local(&self, addr: u32) -> bool;
}

impl LocalAddrs for [u32] {
    fn is_local(&self, addr: u32) -> bool {
        self.contains(&addr)
    }
}

impl<T: LocalAddrs + ?Sized> LocalAddrs for &T {
    fn is_local(&self, addr: u32) -> bool {
        (**self).is_local(addr)
    }
}

impl<K, T: SessionTable<K> + ?Sized> SessionTable<K> for &T {
    fn insert(&self, key: &K) -> Result<(), TableFull> {
        (**self).insert(key)
    }

    fn remove(&self, key: &K) {
        (**self).remove(key)
    }

    fn contains(&self, key: &K) -> bool {
        (**self).contains(key)
    }
}

impl<T: AttemptLedger + ?Sized> AttemptLedger for &T {
    fn record_attempt(&self, src_addr: u32, dst_addr: u32) -> Result<(), TableFull> {
        (**self).record_attempt(src_addr, dst_addr)
    }
}

impl<T: PolicySource + ?Sized> PolicySource for &T {
    fn deny_mode(&self) -> bool {
        (**self).deny_mode()
    }

    fn port_allowed(&self, port: u16) -> bool {
        (**self).port_allowed(port)
    }
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn emit(&self, event: &FlowEvent) {
        (**self).emit(event)
    }
}
