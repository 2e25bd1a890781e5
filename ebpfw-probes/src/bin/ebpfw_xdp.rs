//! Combined XDP program for ebpfw
//!
//! Tells outgoing from incoming traffic by comparing the source address with
//! the protected host's addresses in `LOCAL_ADDRS`. Outgoing packets
//! remember their destination endpoint; incoming packets from a remembered
//! endpoint pass, the rest go through the deny policy and allow-list.

#![no_std]
#![no_main]

use aya_ebpf::{bindings::xdp_action, macros::xdp, programs::XdpContext};
use aya_log_ebpf::debug;
use ebpfw_common::{Dispatcher, Verdict};
use ebpfw_probes::{
    frame::RawFrame,
    maps::{self, Events, Ledger, Local, Outgoing, Policy},
};

#[xdp]
pub fn ebpfw_xdp(ctx: XdpContext) -> u32 {
    let frame = RawFrame::new(ctx.data(), ctx.data_end());
    let decision = Dispatcher::new(Outgoing, Ledger, Policy, Events).combined(&frame, &Local);
    maps::record(&decision);

    match decision.verdict {
        Verdict::Pass => xdp_action::XDP_PASS,
        Verdict::Drop => {
            debug!(&ctx, "xdp drop: unknown peer, port not allowed");
            xdp_action::XDP_DROP
        }
    }
}
