//! In-process tables
//!
//! Concurrent userspace implementations of the table contracts, used to run
//! the dispatcher outside the kernel (tests, benchmarks, dry runs). They
//! follow the same rules as the eBPF maps: fixed capacity, new keys past
//! capacity are rejected, existing keys are always refreshed.

use crate::policy::PolicyStore;
use crate::{EbpfwError, Result};
use dashmap::{mapref::entry::Entry, DashMap};
use ebpfw_common::{
    AttemptLedger, EventSink, FlowEvent, PolicySource, SessionKey, SessionTable, TableFull,
    UnauthorizedEntry, MAX_ALLOWED_PORTS, MAX_SESSIONS, MAX_UNAUTHORIZED,
};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Take one slot out of `len` unless `capacity` is reached.
fn reserve(len: &AtomicUsize, capacity: usize) -> bool {
    len.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
        (n < capacity).then_some(n + 1)
    })
    .is_ok()
}

/// Bounded presence set, the userspace `SESSIONS` / `OUTGOING`.
#[derive(Clone)]
pub struct HostSessions<K: Eq + Hash = SessionKey> {
    inner: Arc<DashMap<K, ()>>,
    len: Arc<AtomicUsize>,
    capacity: usize,
}

impl<K: Eq + Hash> HostSessions<K> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::with_capacity(capacity)),
            len: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for HostSessions<SessionKey> {
    fn default() -> Self {
        Self::with_capacity(MAX_SESSIONS as usize)
    }
}

impl<K: Eq + Hash + Copy> SessionTable<K> for HostSessions<K> {
    fn insert(&self, key: &K) -> std::result::Result<(), TableFull> {
        match self.inner.entry(*key) {
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                if !reserve(&self.len, self.capacity) {
                    return Err(TableFull);
                }
                slot.insert(());
                Ok(())
            }
        }
    }

    fn remove(&self, key: &K) {
        if self.inner.remove(key).is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn contains(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }
}

struct LedgerSlot {
    dst_addr: u32,
    count: AtomicU32,
}

/// Unauthorized-attempt ledger with one atomic counter per source.
#[derive(Clone)]
pub struct HostLedger {
    inner: Arc<DashMap<u32, LedgerSlot>>,
    len: Arc<AtomicUsize>,
    capacity: usize,
}

impl HostLedger {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::with_capacity(capacity)),
            len: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    pub fn get(&self, src_addr: u32) -> Option<UnauthorizedEntry> {
        self.inner.get(&src_addr).map(|slot| UnauthorizedEntry {
            src_addr,
            dst_addr: slot.dst_addr,
            count: slot.count.load(Ordering::Relaxed),
        })
    }

    /// All entries, ordered by source address.
    pub fn entries(&self) -> Vec<UnauthorizedEntry> {
        let mut entries: Vec<_> = self
            .inner
            .iter()
            .map(|slot| UnauthorizedEntry {
                src_addr: *slot.key(),
                dst_addr: slot.dst_addr,
                count: slot.count.load(Ordering::Relaxed),
            })
            .collect();
        entries.sort_by_key(|e| e.src_addr);
        entries
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for HostLedger {
    fn default() -> Self {
        Self::with_capacity(MAX_UNAUTHORIZED as usize)
    }
}

impl AttemptLedger for HostLedger {
    fn record_attempt(&self, src_addr: u32, dst_addr: u32) -> std::result::Result<(), TableFull> {
        // read lock only on the common path
        if let Some(slot) = self.inner.get(&src_addr) {
            slot.count.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        match self.inner.entry(src_addr) {
            Entry::Occupied(slot) => {
                slot.get().count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Entry::Vacant(slot) => {
                if !reserve(&self.len, self.capacity) {
                    return Err(TableFull);
                }
                slot.insert(LedgerSlot {
                    dst_addr,
                    count: AtomicU32::new(1),
                });
                Ok(())
            }
        }
    }
}

/// Deny toggle and port allow-list.
#[derive(Clone, Default)]
pub struct HostPolicy {
    deny: Arc<AtomicBool>,
    ports: Arc<DashMap<u16, ()>>,
}

impl HostPolicy {
    pub fn new(deny: bool, ports: &[u16]) -> Result<Self> {
        let policy = Self::default();
        policy.deny.store(deny, Ordering::Release);
        for port in ports {
            policy.allow(*port)?;
        }
        Ok(policy)
    }

    pub fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::Release);
    }

    pub fn allow(&self, port: u16) -> Result<()> {
        if self.ports.contains_key(&port) {
            return Ok(());
        }
        if self.ports.len() >= MAX_ALLOWED_PORTS as usize {
            return Err(EbpfwError::CapacityExceeded {
                table: "ALLOWED_PORTS",
                capacity: MAX_ALLOWED_PORTS,
            });
        }
        self.ports.insert(port, ());
        Ok(())
    }

    pub fn revoke(&self, port: u16) {
        self.ports.remove(&port);
    }
}

impl PolicySource for HostPolicy {
    fn deny_mode(&self) -> bool {
        self.deny.load(Ordering::Acquire)
    }

    fn port_allowed(&self, port: u16) -> bool {
        self.ports.contains_key(&port)
    }
}

impl PolicyStore for HostPolicy {
    fn set_deny_mode(&mut self, deny: bool) -> Result<()> {
        self.set_deny(deny);
        Ok(())
    }

    fn allowed_ports(&self) -> Result<Vec<u16>> {
        let mut ports: Vec<u16> = self.ports.iter().map(|p| *p.key()).collect();
        ports.sort_unstable();
        Ok(ports)
    }

    fn allow_port(&mut self, port: u16) -> Result<()> {
        self.allow(port)
    }

    fn revoke_port(&mut self, port: u16) -> Result<()> {
        self.revoke(port);
        Ok(())
    }
}

/// Bounded event channel. A full channel drops the event and counts it.
#[derive(Clone)]
pub struct HostEvents {
    tx: mpsc::Sender<FlowEvent>,
    dropped: Arc<AtomicU64>,
}

impl HostEvents {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FlowEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for HostEvents {
    fn emit(&self, event: &FlowEvent) {
        if self.tx.try_send(*event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
