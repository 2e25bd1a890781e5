//! eBPF programs for ebpfw
//!
//! - `ebpfw_tc`: tc egress classifier (session bookkeeping) and tc ingress
//!   classifier (session lookup, then policy)
//! - `ebpfw_xdp`: single XDP program splitting directions by source address
//!
//! Both run the decision core from `ebpfw-common` against the maps declared
//! in [`maps`]. Program binaries are in src/bin/.

#![cfg_attr(not(test), no_std)]

pub mod frame;
pub mod maps;

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
