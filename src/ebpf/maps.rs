//! Userspace access to the firewall maps
//!
//! The control plane writes `DENY_POLICY`, `ALLOWED_PORTS` and `LOCAL_ADDRS`
//! and reads `UNAUTHORIZED_ATTEMPTS` and `COUNTERS`. Per-CPU values are
//! folded here before anything is reported.

use ebpfw_common::{counters, UnauthorizedEntry};

pub const DENY_POLICY: &str = "DENY_POLICY";
pub const ALLOWED_PORTS: &str = "ALLOWED_PORTS";
pub const LOCAL_ADDRS: &str = "LOCAL_ADDRS";
pub const UNAUTHORIZED_ATTEMPTS: &str = "UNAUTHORIZED_ATTEMPTS";
pub const COUNTERS: &str = "COUNTERS";
pub const EVENTS: &str = "EVENTS";

/// Merge per-CPU ledger rows into one entry per source, ordered by source.
/// Rows whose shards are all empty are skipped.
pub fn merge_ledger<I, S>(rows: I) -> Vec<UnauthorizedEntry>
where
    I: IntoIterator<Item = (u32, S)>,
    S: AsRef<[UnauthorizedEntry]>,
{
    let mut merged: Vec<UnauthorizedEntry> = rows
        .into_iter()
        .filter_map(|(src_addr, shards)| {
            UnauthorizedEntry::merge(shards.as_ref()).map(|mut entry| {
                // a shard filled by a racing first insert may lack the key
                entry.src_addr = src_addr;
                entry
            })
        })
        .collect();
    merged.sort_by_key(|e| e.src_addr);
    merged
}

pub fn sum_per_cpu(values: &[u64]) -> u64 {
    values.iter().fold(0u64, |acc, v| acc.saturating_add(*v))
}

#[cfg(target_os = "linux")]
pub use kernel::{read_counters, read_ledger, write_local_addrs, KernelPolicy};

#[cfg(target_os = "linux")]
mod kernel {
    use super::*;
    use crate::policy::PolicyStore;
    use crate::{EbpfwError, Result};
    use aya::maps::{Array, HashMap, MapData, MapError, PerCpuArray, PerCpuHashMap};
    use std::collections::BTreeSet;

    fn map_error(name: &str) -> impl Fn(MapError) -> EbpfwError + '_ {
        move |e| EbpfwError::MapError {
            name: name.to_string(),
            reason: e.to_string(),
        }
    }

    /// `DENY_POLICY` and `ALLOWED_PORTS` handles.
    pub struct KernelPolicy {
        deny: Array<MapData, u8>,
        ports: HashMap<MapData, u16, u8>,
    }

    impl KernelPolicy {
        pub fn new(deny: Array<MapData, u8>, ports: HashMap<MapData, u16, u8>) -> Self {
            Self { deny, ports }
        }
    }

    impl PolicyStore for KernelPolicy {
        fn set_deny_mode(&mut self, deny: bool) -> Result<()> {
            self.deny
                .set(0, u8::from(deny), 0)
                .map_err(map_error(DENY_POLICY))
        }

        fn allowed_ports(&self) -> Result<Vec<u16>> {
            self.ports
                .keys()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(map_error(ALLOWED_PORTS))
        }

        fn allow_port(&mut self, port: u16) -> Result<()> {
            self.ports
                .insert(port, 1, 0)
                .map_err(map_error(ALLOWED_PORTS))
        }

        fn revoke_port(&mut self, port: u16) -> Result<()> {
            match self.ports.remove(&port) {
                Ok(()) | Err(MapError::KeyNotFound) => Ok(()),
                Err(e) => Err(map_error(ALLOWED_PORTS)(e)),
            }
        }
    }

    /// Replace the contents of `LOCAL_ADDRS` with `addrs`.
    pub fn write_local_addrs(map: &mut HashMap<MapData, u32, u8>, addrs: &[u32]) -> Result<()> {
        let wanted: BTreeSet<u32> = addrs.iter().copied().collect();
        let current = map
            .keys()
            .collect::<std::result::Result<BTreeSet<_>, _>>()
            .map_err(map_error(LOCAL_ADDRS))?;

        for addr in wanted.difference(&current) {
            map.insert(*addr, 1, 0).map_err(map_error(LOCAL_ADDRS))?;
        }
        for addr in current.difference(&wanted) {
            match map.remove(addr) {
                Ok(()) | Err(MapError::KeyNotFound) => {}
                Err(e) => return Err(map_error(LOCAL_ADDRS)(e)),
            }
        }
        Ok(())
    }

    /// Snapshot of the ledger with per-CPU shards merged.
    pub fn read_ledger(
        map: &PerCpuHashMap<MapData, u32, UnauthorizedEntry>,
    ) -> Result<Vec<UnauthorizedEntry>> {
        let rows = map
            .iter()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_error(UNAUTHORIZED_ATTEMPTS))?;
        Ok(merge_ledger(
            rows.iter().map(|(src, shards)| (*src, &shards[..])),
        ))
    }

    /// Sum every `COUNTERS` slot across CPUs.
    pub fn read_counters(
        map: &PerCpuArray<MapData, u64>,
    ) -> Result<[u64; counters::COUNT as usize]> {
        let mut totals = [0u64; counters::COUNT as usize];
        for (index, total) in totals.iter_mut().enumerate() {
            let values = map
                .get(&(index as u32), 0)
                .map_err(map_error(COUNTERS))?;
            *total = sum_per_cpu(&values);
        }
        Ok(totals)
    }
}
