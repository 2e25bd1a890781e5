//! Control-plane side of the firewall policy
//!
//! The datapath only reads the policy. This module writes it: the deny
//! toggle and the allow-list are brought in line with the configuration.

use crate::config::FirewallConfig;
use crate::Result;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Writable policy storage (`DENY_POLICY` + `ALLOWED_PORTS`).
pub trait PolicyStore {
    fn set_deny_mode(&mut self, deny: bool) -> Result<()>;

    fn allowed_ports(&self) -> Result<Vec<u16>>;

    fn allow_port(&mut self, port: u16) -> Result<()>;

    fn revoke_port(&mut self, port: u16) -> Result<()>;
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PolicySync {
    pub added: Vec<u16>,
    pub removed: Vec<u16>,
}

/// Make `store` hold exactly the configured policy.
///
/// New ports are allowed before deny mode is switched on and stale ports are
/// revoked last, so a port that stays allowed is never dropped mid-sync.
pub fn sync_policy<S: PolicyStore + ?Sized>(
    store: &mut S,
    firewall: &FirewallConfig,
) -> Result<PolicySync> {
    let wanted: BTreeSet<u16> = firewall.allowed_ports.iter().copied().collect();
    let current: BTreeSet<u16> = store.allowed_ports()?.into_iter().collect();

    let mut sync = PolicySync::default();
    for port in wanted.difference(&current) {
        store.allow_port(*port)?;
        sync.added.push(*port);
    }

    store.set_deny_mode(firewall.default_deny)?;

    for port in current.difference(&wanted) {
        store.revoke_port(*port)?;
        sync.removed.push(*port);
    }

    debug!(added = ?sync.added, removed = ?sync.removed, "allow-list synced");
    info!(
        default_deny = firewall.default_deny,
        allowed_ports = wanted.len(),
        "Policy applied"
    );
    Ok(sync)
}

/// One-line summary for `ebpfw check`.
pub fn describe(firewall: &FirewallConfig) -> String {
    if !firewall.default_deny {
        return "default allow: all inbound traffic passes".to_string();
    }
    if firewall.allowed_ports.is_empty() {
        return "default deny: only return traffic of tracked sessions passes".to_string();
    }
    let ports: Vec<String> = firewall
        .allowed_ports
        .iter()
        .map(|p| p.to_string())
        .collect();
    format!(
        "default deny: return traffic and ports {} pass",
        ports.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostPolicy;
    use ebpfw_common::PolicySource;

    fn firewall(deny: bool, ports: &[u16]) -> FirewallConfig {
        FirewallConfig {
            default_deny: deny,
            allowed_ports: ports.to_vec(),
        }
    }

    #[test]
    fn test_sync_adds_and_removes() {
        let mut store = HostPolicy::new(false, &[22, 8080]).unwrap();

        let sync = sync_policy(&mut store, &firewall(true, &[22, 443])).unwrap();
        assert_eq!(sync.added, vec![443]);
        assert_eq!(sync.removed, vec![8080]);
        assert!(store.deny_mode());
        assert_eq!(store.allowed_ports().unwrap(), vec![22, 443]);
    }

    #[test]
    fn test_sync_is_idempotent() {
        let mut store = HostPolicy::default();
        sync_policy(&mut store, &firewall(true, &[443])).unwrap();
        let again = sync_policy(&mut store, &firewall(true, &[443])).unwrap();
        assert_eq!(again, PolicySync::default());
    }

    #[test]
    fn test_describe() {
        assert!(describe(&firewall(false, &[22])).starts_with("default allow"));
        assert_eq!(
            describe(&firewall(true, &[22, 443])),
            "default deny: return traffic and ports 22, 443 pass"
        );
    }
}
