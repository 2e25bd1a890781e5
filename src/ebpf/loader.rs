//! eBPF program loading and lifecycle management

use crate::config::{Config, Mode};
use crate::ebpf::maps::{self, KernelPolicy};
use crate::policy::sync_policy;
use crate::{EbpfwError, Result};
use aya::{
    maps::{Array, HashMap, Map, MapData, PerCpuArray, PerCpuHashMap, RingBuf},
    programs::{tc, SchedClassifier, TcAttachType, Xdp, XdpFlags},
    Ebpf,
};
use ebpfw_common::UnauthorizedEntry;
use std::path::Path;
use tracing::{debug, info, warn};

const EGRESS_PROGRAM: &str = "ebpfw_egress";
const INGRESS_PROGRAM: &str = "ebpfw_ingress";
const XDP_PROGRAM: &str = "ebpfw_xdp";

/// Loaded firewall programs. Dropping it detaches everything.
pub struct Firewall {
    bpf: Ebpf,
    mode: Mode,
}

impl Firewall {
    /// Run pre-flight checks and load the object for `mode`.
    pub fn load(mode: Mode) -> Result<Self> {
        run_preflight_checks()?;

        info!("Loading {} programs...", mode);
        let bytes: &[u8] = match mode {
            Mode::Tc => aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/ebpfw_tc")),
            Mode::Xdp => aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/ebpfw_xdp")),
        };
        let bpf = Ebpf::load(bytes).map_err(|e| EbpfwError::ProgramLoadFailed(e.to_string()))?;

        Ok(Self { bpf, mode })
    }

    /// Get mutable reference to the Ebpf object for initializing the EbpfLogger.
    pub fn bpf_mut(&mut self) -> &mut Ebpf {
        &mut self.bpf
    }

    /// Write the configured policy and protected-host addresses. Must run
    /// before [`Firewall::attach`] so the first packet already sees them.
    pub fn apply_config(&mut self, config: &Config) -> Result<()> {
        let deny = Array::<MapData, u8>::try_from(self.take_map(maps::DENY_POLICY)?)
            .map_err(|e| map_type_error(maps::DENY_POLICY, e))?;
        let ports = HashMap::<MapData, u16, u8>::try_from(self.take_map(maps::ALLOWED_PORTS)?)
            .map_err(|e| map_type_error(maps::ALLOWED_PORTS, e))?;
        let mut policy = KernelPolicy::new(deny, ports);
        sync_policy(&mut policy, &config.firewall)?;

        if self.mode == Mode::Xdp {
            let mut local =
                HashMap::<MapData, u32, u8>::try_from(self.take_map(maps::LOCAL_ADDRS)?)
                    .map_err(|e| map_type_error(maps::LOCAL_ADDRS, e))?;
            maps::write_local_addrs(&mut local, &config.local_addrs())?;
            info!(addresses = ?config.local_addresses, "Protected-host addresses written");
        }

        Ok(())
    }

    /// Attach the loaded programs to `interface`.
    pub fn attach(&mut self, interface: &str) -> Result<()> {
        match self.mode {
            Mode::Tc => {
                // clsact qdisc is required for tc attachment
                if let Err(e) = tc::qdisc_add_clsact(interface) {
                    warn!("Failed to add clsact qdisc (may already exist): {}", e);
                }
                self.attach_classifier(EGRESS_PROGRAM, interface, TcAttachType::Egress)?;
                self.attach_classifier(INGRESS_PROGRAM, interface, TcAttachType::Ingress)?;
            }
            Mode::Xdp => {
                let program: &mut Xdp = self
                    .bpf
                    .program_mut(XDP_PROGRAM)
                    .ok_or_else(|| program_missing(XDP_PROGRAM))?
                    .try_into()
                    .map_err(|e: aya::programs::ProgramError| {
                        attach_error(XDP_PROGRAM, interface, e)
                    })?;
                program
                    .load()
                    .map_err(|e| attach_error(XDP_PROGRAM, interface, e))?;
                program
                    .attach(interface, XdpFlags::default())
                    .map_err(|e| attach_error(XDP_PROGRAM, interface, e))?;
            }
        }

        info!("Firewall attached to {} ({} mode)", interface, self.mode);
        Ok(())
    }

    fn attach_classifier(
        &mut self,
        name: &str,
        interface: &str,
        attach_type: TcAttachType,
    ) -> Result<()> {
        let program: &mut SchedClassifier = self
            .bpf
            .program_mut(name)
            .ok_or_else(|| program_missing(name))?
            .try_into()
            .map_err(|e: aya::programs::ProgramError| attach_error(name, interface, e))?;

        program
            .load()
            .map_err(|e| attach_error(name, interface, e))?;
        program
            .attach(interface, attach_type)
            .map_err(|e| attach_error(name, interface, e))?;

        debug!("{} attached to {} {:?}", name, interface, attach_type);
        Ok(())
    }

    pub fn take_ledger(&mut self) -> Result<PerCpuHashMap<MapData, u32, UnauthorizedEntry>> {
        PerCpuHashMap::try_from(self.take_map(maps::UNAUTHORIZED_ATTEMPTS)?)
            .map_err(|e| map_type_error(maps::UNAUTHORIZED_ATTEMPTS, e))
    }

    pub fn take_counters(&mut self) -> Result<PerCpuArray<MapData, u64>> {
        PerCpuArray::try_from(self.take_map(maps::COUNTERS)?)
            .map_err(|e| map_type_error(maps::COUNTERS, e))
    }

    pub fn take_events(&mut self) -> Result<RingBuf<MapData>> {
        RingBuf::try_from(self.take_map(maps::EVENTS)?)
            .map_err(|e| map_type_error(maps::EVENTS, e))
    }

    fn take_map(&mut self, name: &str) -> Result<Map> {
        self.bpf.take_map(name).ok_or_else(|| {
            // Collect map names for the error message
            let available: Vec<_> = self.bpf.maps().map(|(n, _)| n.to_string()).collect();
            EbpfwError::MapNotFound(format!("{} (available: {:?})", name, available))
        })
    }

    /// Detach and unload all programs
    pub fn unload(self) {
        info!("Detaching firewall programs...");
        drop(self.bpf);
        info!("Programs detached");
    }
}

fn program_missing(name: &str) -> EbpfwError {
    EbpfwError::ProgramLoadFailed(format!("{} program not found in eBPF object", name))
}

fn attach_error(program: &str, interface: &str, e: impl std::fmt::Display) -> EbpfwError {
    EbpfwError::AttachFailed {
        program: program.to_string(),
        interface: interface.to_string(),
        reason: e.to_string(),
    }
}

fn map_type_error(name: &str, e: aya::maps::MapError) -> EbpfwError {
    EbpfwError::MapError {
        name: name.to_string(),
        reason: e.to_string(),
    }
}

/// Run pre-flight checks to validate the system can run eBPF programs
fn run_preflight_checks() -> Result<()> {
    info!("Running pre-flight checks...");

    check_kernel_version()?;
    check_btf();
    check_capabilities();

    info!("Pre-flight checks passed");
    Ok(())
}

/// Ring buffers need kernel 5.8+
fn check_kernel_version() -> Result<()> {
    let release = std::fs::read_to_string("/proc/sys/kernel/osrelease")?;
    let (major, minor) = parse_kernel_release(&release).ok_or_else(|| {
        EbpfwError::UnsupportedFeature(format!(
            "could not parse kernel version: {}",
            release.trim()
        ))
    })?;

    if (major, minor) < (5, 8) {
        return Err(EbpfwError::KernelVersionTooOld {
            version: release.trim().to_string(),
            min_version: "5.8".to_string(),
        });
    }

    info!("Kernel version: {} (supported)", release.trim());
    Ok(())
}

pub(crate) fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()?;
    Some((major, minor))
}

fn check_btf() {
    if !Path::new("/sys/kernel/btf/vmlinux").exists() {
        warn!("BTF not found at /sys/kernel/btf/vmlinux");
        warn!("Consider rebuilding kernel with CONFIG_DEBUG_INFO_BTF=y");
        return;
    }
    info!("BTF available");
}

fn check_capabilities() {
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        warn!(
            "Not running as root (euid={}). Ensure CAP_BPF and CAP_NET_ADMIN are granted.",
            euid
        );
    } else {
        info!("Running with root privileges");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernel_release() {
        assert_eq!(parse_kernel_release("6.18.44-fc-v139\n"), Some((6, 18)));
        assert_eq!(parse_kernel_release("5.4.0-150-generic"), Some((5, 4)));
        assert_eq!(parse_kernel_release("5.15"), Some((5, 15)));
        assert_eq!(parse_kernel_release("garbage"), None);
    }
}
