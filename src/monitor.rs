//! Periodic readers of the datapath state
//!
//! - ledger monitor: merged unauthorized-attempt counts and datapath
//!   counters, every `ledger_interval_secs`
//! - event consumer: drains the flow event ring buffer

use crate::metrics::{MetricsCollector, TextfileExporter};
use ebpfw_common::UnauthorizedEntry;
use std::net::Ipv4Addr;
use tracing::{info, warn};

/// Log one line per source and update the ledger gauges.
pub fn report_ledger(entries: &[UnauthorizedEntry], metrics: &MetricsCollector) {
    for entry in entries {
        info!(
            src = %Ipv4Addr::from(entry.src_addr),
            dst = %Ipv4Addr::from(entry.dst_addr),
            attempts = entry.count,
            "Unauthorized access attempts"
        );
    }
    metrics.observe_ledger(entries);
}

pub fn export(exporter: Option<&TextfileExporter>) {
    if let Some(exporter) = exporter {
        if let Err(e) = exporter.write() {
            warn!("Failed to write metrics textfile: {}", e);
        }
    }
}

#[cfg(target_os = "linux")]
pub use kernel::{run_event_consumer, run_ledger_monitor};

#[cfg(target_os = "linux")]
mod kernel {
    use super::*;
    use crate::ebpf::events::{decode_event, report_event};
    use crate::ebpf::maps::{read_counters, read_ledger};
    use aya::maps::{MapData, PerCpuArray, PerCpuHashMap, RingBuf};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tracing::debug;

    const MAX_BATCH_SIZE: usize = 1024;

    pub async fn run_ledger_monitor(
        ledger: PerCpuHashMap<MapData, u32, UnauthorizedEntry>,
        counters: PerCpuArray<MapData, u64>,
        metrics: MetricsCollector,
        exporter: Option<TextfileExporter>,
        interval: Duration,
        token: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match read_ledger(&ledger) {
                        Ok(entries) => report_ledger(&entries, &metrics),
                        Err(e) => warn!("Failed to read ledger: {}", e),
                    }
                    match read_counters(&counters) {
                        Ok(totals) => metrics.observe_counters(&totals),
                        Err(e) => warn!("Failed to read counters: {}", e),
                    }
                    export(exporter.as_ref());
                }
            }
        }
        debug!("Ledger monitor stopped");
    }

    pub async fn run_event_consumer(
        mut ring_buf: RingBuf<MapData>,
        metrics: MetricsCollector,
        interval: Duration,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    let mut drained = 0;
                    while let Some(item) = ring_buf.next() {
                        if let Some(event) = decode_event(&item) {
                            report_event(&event, &metrics);
                        }
                        drained += 1;
                        if drained >= MAX_BATCH_SIZE {
                            warn!("Hit maximum batch size ({}), stopping poll", MAX_BATCH_SIZE);
                            break;
                        }
                    }
                }
            }
        }
        debug!("Event consumer stopped");
    }
}
