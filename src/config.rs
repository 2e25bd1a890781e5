//! YAML configuration
//!
//! Loaded once at startup. Interface and attach mode can be overridden from
//! the command line; everything else lives in the file.

use crate::{EbpfwError, Result};
use ebpfw_common::{MAX_ALLOWED_PORTS, MAX_LOCAL_ADDRS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ebpfw/config.yaml";

/// Which programs get attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// tc egress + ingress classifiers with full TCP session tracking
    #[default]
    Tc,
    /// Single XDP program, direction split on `local_addresses`
    Xdp,
}

impl Mode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Mode::Tc => "tc",
            Mode::Xdp => "xdp",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `info` or `ebpfw=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirewallConfig {
    pub default_deny: bool,
    pub allowed_ports: Vec<u16>,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            default_deny: true,
            allowed_ports: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub ledger_interval_secs: u64,
    pub event_poll_interval_ms: u64,
    /// Prometheus text exposition is written here on every ledger tick
    pub metrics_textfile: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ledger_interval_secs: 10,
            event_poll_interval_ms: 100,
            metrics_textfile: None,
        }
    }
}

impl MonitorConfig {
    pub fn ledger_interval(&self) -> Duration {
        Duration::from_secs(self.ledger_interval_secs)
    }

    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(self.event_poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub interface: String,
    pub mode: Mode,
    pub local_addresses: Vec<Ipv4Addr>,
    pub log: LogConfig,
    pub firewall: FirewallConfig,
    pub monitor: MonitorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            mode: Mode::Tc,
            local_addresses: Vec::new(),
            log: LogConfig::default(),
            firewall: FirewallConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl Config {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::read(path)?.validated()
    }

    /// Parse a configuration file without validating it.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EbpfwError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Parse `path` if given, otherwise the default location. A missing
    /// default file yields the built-in defaults. Not validated: command
    /// line overrides are applied first.
    pub fn read_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::read(default)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    /// Check limits and normalize the port list (sorted, deduplicated).
    pub fn validated(mut self) -> Result<Self> {
        if self.interface.is_empty() {
            return Err(EbpfwError::ConfigError("interface must not be empty".into()));
        }

        let ports: BTreeSet<u16> = self.firewall.allowed_ports.iter().copied().collect();
        if ports.len() > MAX_ALLOWED_PORTS as usize {
            return Err(EbpfwError::ConfigError(format!(
                "{} allowed ports configured, at most {} supported",
                ports.len(),
                MAX_ALLOWED_PORTS
            )));
        }
        self.firewall.allowed_ports = ports.into_iter().collect();

        let addrs: BTreeSet<Ipv4Addr> = self.local_addresses.iter().copied().collect();
        if addrs.len() > MAX_LOCAL_ADDRS as usize {
            return Err(EbpfwError::ConfigError(format!(
                "{} local addresses configured, at most {} supported",
                addrs.len(),
                MAX_LOCAL_ADDRS
            )));
        }
        self.local_addresses = addrs.into_iter().collect();

        if self.mode == Mode::Xdp && self.local_addresses.is_empty() {
            return Err(EbpfwError::ConfigError(
                "xdp mode needs at least one entry in local_addresses".into(),
            ));
        }
        if self.monitor.ledger_interval_secs == 0 || self.monitor.event_poll_interval_ms == 0 {
            return Err(EbpfwError::ConfigError(
                "monitor intervals must be greater than zero".into(),
            ));
        }

        Ok(self)
    }

    /// Protected-host addresses as host-order integers, the form the
    /// programs compare against.
    pub fn local_addrs(&self) -> Vec<u32> {
        self.local_addresses.iter().map(|a| u32::from(*a)).collect()
    }
}
