//! Maps shared by the tc and XDP programs, and the table handles the
//! dispatcher runs against.
//!
//! Map names are the contract with the userspace control plane.

use core::{
    ptr,
    sync::atomic::{AtomicU32, Ordering},
};

use aya_ebpf::{
    macros::map,
    maps::{Array, HashMap, PerCpuArray, PerCpuHashMap, RingBuf},
};
use ebpfw_common::{
    counters, AttemptLedger, Decision, EventSink, FlowEvent, LocalAddrs, PolicySource, Reason,
    SessionKey, SessionTable, TableFull, UnauthorizedEntry, Verdict, MAX_ALLOWED_PORTS,
    MAX_LOCAL_ADDRS, MAX_OUTGOING, MAX_SESSIONS, MAX_UNAUTHORIZED,
};

/// Ring buffer size in bytes. 256KB holds ~16K flow events before dropping.
const RING_BUF_SIZE: u32 = 256 * 1024;

const BPF_ANY: u64 = 0;

#[map]
pub static SESSIONS: HashMap<SessionKey, u8> = HashMap::with_max_entries(MAX_SESSIONS, 0);

#[map]
pub static OUTGOING: HashMap<u64, u8> = HashMap::with_max_entries(MAX_OUTGOING, 0);

#[map]
pub static UNAUTHORIZED_ATTEMPTS: PerCpuHashMap<u32, UnauthorizedEntry> =
    PerCpuHashMap::with_max_entries(MAX_UNAUTHORIZED, 0);

/// Default-deny toggle (single element, 0 = allow all, 1 = deny by default)
#[map]
pub static DENY_POLICY: Array<u8> = Array::with_max_entries(1, 0);

#[map]
pub static ALLOWED_PORTS: HashMap<u16, u8> = HashMap::with_max_entries(MAX_ALLOWED_PORTS, 0);

/// Addresses of the protected host (combined program only)
#[map]
pub static LOCAL_ADDRS: HashMap<u32, u8> = HashMap::with_max_entries(MAX_LOCAL_ADDRS, 0);

#[map]
pub static EVENTS: RingBuf = RingBuf::with_byte_size(RING_BUF_SIZE, 0);

#[map]
pub static COUNTERS: PerCpuArray<u64> = PerCpuArray::with_max_entries(counters::COUNT, 0);

#[inline(always)]
pub fn count(index: u32) {
    if let Some(slot) = COUNTERS.get_ptr_mut(index) {
        // SAFETY: per-CPU slot, no other program touches it concurrently
        unsafe { *slot += 1 };
    }
}

/// Account the verdict of one invocation.
#[inline(always)]
pub fn record(decision: &Decision) {
    match decision.verdict {
        Verdict::Pass => count(counters::PASSED),
        Verdict::Drop => count(counters::DROPPED),
    }
    if decision.reason == Reason::Malformed {
        count(counters::MALFORMED);
    }
}

/// `SESSIONS` map handle
pub struct Sessions;

impl SessionTable<SessionKey> for Sessions {
    #[inline(always)]
    fn insert(&self, key: &SessionKey) -> Result<(), TableFull> {
        SESSIONS.insert(key, &1, BPF_ANY).map_err(|_| {
            count(counters::SESSIONS_FULL);
            TableFull
        })
    }

    #[inline(always)]
    fn remove(&self, key: &SessionKey) {
        // ENOENT on a duplicate FIN is expected
        let _ = SESSIONS.remove(key);
    }

    #[inline(always)]
    fn contains(&self, key: &SessionKey) -> bool {
        SESSIONS.get_ptr(key).is_some()
    }
}

/// `OUTGOING` map handle
pub struct Outgoing;

impl SessionTable<u64> for Outgoing {
    #[inline(always)]
    fn insert(&self, key: &u64) -> Result<(), TableFull> {
        OUTGOING.insert(key, &1, BPF_ANY).map_err(|_| {
            count(counters::OUTGOING_FULL);
            TableFull
        })
    }

    #[inline(always)]
    fn remove(&self, key: &u64) {
        let _ = OUTGOING.remove(key);
    }

    #[inline(always)]
    fn contains(&self, key: &u64) -> bool {
        OUTGOING.get_ptr(key).is_some()
    }
}

/// `UNAUTHORIZED_ATTEMPTS` map handle
///
/// Each CPU updates its own shard of the entry. A shard that another CPU
/// created starts zeroed, so the descriptive fields are filled on its first
/// increment.
pub struct Ledger;

impl AttemptLedger for Ledger {
    #[inline(always)]
    fn record_attempt(&self, src_addr: u32, dst_addr: u32) -> Result<(), TableFull> {
        if let Some(entry) = UNAUTHORIZED_ATTEMPTS.get_ptr_mut(&src_addr) {
            // SAFETY: the pointer is valid for the lifetime of this invocation
            unsafe {
                if (*entry).count == 0 {
                    (*entry).src_addr = src_addr;
                    (*entry).dst_addr = dst_addr;
                }
                AtomicU32::from_ptr(ptr::addr_of_mut!((*entry).count))
                    .fetch_add(1, Ordering::Relaxed);
            }
            return Ok(());
        }

        let entry = UnauthorizedEntry::first(src_addr, dst_addr);
        UNAUTHORIZED_ATTEMPTS
            .insert(&src_addr, &entry, BPF_ANY)
            .map_err(|_| {
                count(counters::LEDGER_FULL);
                TableFull
            })
    }
}

/// `DENY_POLICY` / `ALLOWED_PORTS` reader
pub struct Policy;

impl PolicySource for Policy {
    #[inline(always)]
    fn deny_mode(&self) -> bool {
        matches!(DENY_POLICY.get(0), Some(mode) if *mode != 0)
    }

    #[inline(always)]
    fn port_allowed(&self, port: u16) -> bool {
        ALLOWED_PORTS.get_ptr(&port).is_some()
    }
}

/// `EVENTS` ring buffer writer
pub struct Events;

impl EventSink for Events {
    #[inline(always)]
    fn emit(&self, event: &FlowEvent) {
        if let Some(mut entry) = EVENTS.reserve::<FlowEvent>(0) {
            entry.write(*event);
            entry.submit(0);
        } else {
            count(counters::EVENTS_DROPPED);
        }
    }
}

/// `LOCAL_ADDRS` reader
pub struct Local;

impl LocalAddrs for Local {
    #[inline(always)]
    fn is_local(&self, addr: u32) -> bool {
        LOCAL_ADDRS.get_ptr(&addr).is_some()
    }
}
