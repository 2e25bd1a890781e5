//! tc classifiers for ebpfw
//!
//! - `ebpfw_egress`: records outbound SYNs and tears sessions down on
//!   FIN / RST+ACK. Always lets the packet through.
//! - `ebpfw_ingress`: passes return traffic of tracked sessions; everything
//!   else goes through the deny policy and allow-list.
//!
//! Note: This binary must be built for the bpfel-unknown-none target.
//! The root crate's build.rs handles cross-compilation.

#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::{TC_ACT_OK, TC_ACT_SHOT},
    macros::classifier,
    programs::TcContext,
};
use aya_log_ebpf::debug;
use ebpfw_common::{Dispatcher, Verdict};
use ebpfw_probes::{
    frame::RawFrame,
    maps::{self, Events, Ledger, Policy, Sessions},
};

#[classifier]
pub fn ebpfw_egress(ctx: TcContext) -> i32 {
    let frame = RawFrame::new(ctx.data(), ctx.data_end());
    let decision = Dispatcher::new(Sessions, Ledger, Policy, Events).egress(&frame);
    maps::record(&decision);

    TC_ACT_OK
}

#[classifier]
pub fn ebpfw_ingress(ctx: TcContext) -> i32 {
    let frame = RawFrame::new(ctx.data(), ctx.data_end());
    let decision = Dispatcher::new(Sessions, Ledger, Policy, Events).ingress(&frame);
    maps::record(&decision);

    match decision.verdict {
        Verdict::Pass => TC_ACT_OK,
        Verdict::Drop => {
            debug!(&ctx, "ingress drop: no session, port not allowed");
            TC_ACT_SHOT
        }
    }
}
