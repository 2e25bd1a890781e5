//! Flow event decoding and reporting

use crate::metrics::MetricsCollector;
use bytes::Buf;
use ebpfw_common::{protocol, FlowEvent, Reason};
use std::mem;
use std::net::Ipv4Addr;
use tracing::{info, warn};

pub const FLOW_EVENT_SIZE: usize = mem::size_of::<FlowEvent>();

/// Decode one ring-buffer record. Records of the wrong size are rejected.
pub fn decode_event(mut raw: &[u8]) -> Option<FlowEvent> {
    if raw.len() != FLOW_EVENT_SIZE {
        warn!(
            "Malformed event: expected {} bytes, got {} bytes - skipping",
            FLOW_EVENT_SIZE,
            raw.len()
        );
        return None;
    }

    // written by the kernel in native byte order
    Some(FlowEvent {
        src_addr: raw.get_u32_ne(),
        dst_addr: raw.get_u32_ne(),
        src_port: raw.get_u16_ne(),
        dst_port: raw.get_u16_ne(),
        protocol: raw.get_u8(),
        reason: raw.get_u8(),
        _padding: [0; 2],
    })
}

pub fn format_protocol(protocol: u8) -> &'static str {
    match protocol {
        protocol::TCP => "TCP",
        protocol::UDP => "UDP",
        _ => "OTHER",
    }
}

/// Log an accepted flow and count it.
pub fn report_event(event: &FlowEvent, metrics: &MetricsCollector) {
    let reason = Reason::from_u8(event.reason)
        .map(|r| r.as_str())
        .unwrap_or("unknown");
    info!(
        src = %Ipv4Addr::from(event.src_addr),
        src_port = event.src_port,
        dst = %Ipv4Addr::from(event.dst_addr),
        dst_port = event.dst_port,
        protocol = format_protocol(event.protocol),
        reason,
        "Accepted flow"
    );
    metrics.observe_event(event);
}
