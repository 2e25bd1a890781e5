use crate::Result;
use ebpfw_common::{counters, FlowEvent, Reason, UnauthorizedEntry};
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

/// Prometheus view of the datapath.
///
/// Kernel counters are cumulative per-CPU sums, so each observation only
/// adds the difference to what was already exported.
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Registry,
    datapath: IntCounterVec,
    flow_events: IntCounterVec,
    ledger_sources: IntGauge,
    ledger_attempts: IntGauge,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("ebpfw".to_string()), None)?;

        let datapath = IntCounterVec::new(
            Opts::new(
                "datapath_total",
                "Packets and table events counted by the eBPF programs",
            ),
            &["outcome"],
        )?;
        let flow_events = IntCounterVec::new(
            Opts::new("flow_events_total", "Accepted inbound flows reported"),
            &["reason"],
        )?;
        let ledger_sources = IntGauge::new(
            "ledger_sources",
            "Source addresses in the unauthorized-attempt ledger",
        )?;
        let ledger_attempts = IntGauge::new(
            "ledger_attempts",
            "Unauthorized attempts recorded across all sources",
        )?;

        registry.register(Box::new(datapath.clone()))?;
        registry.register(Box::new(flow_events.clone()))?;
        registry.register(Box::new(ledger_sources.clone()))?;
        registry.register(Box::new(ledger_attempts.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            datapath,
            flow_events,
            ledger_sources,
            ledger_attempts,
        })
    }

    /// Record the current totals of the `COUNTERS` array.
    pub fn observe_counters(&self, totals: &[u64; counters::COUNT as usize]) {
        for (name, total) in counters::NAMES.iter().zip(totals) {
            let counter = self.datapath.with_label_values(&[*name]);
            let delta = total.saturating_sub(counter.get());
            if delta > 0 {
                counter.inc_by(delta);
            }
        }
    }

    pub fn observe_ledger(&self, entries: &[UnauthorizedEntry]) {
        let attempts: u64 = entries.iter().map(|e| e.count as u64).sum();
        self.ledger_sources.set(entries.len() as i64);
        self.ledger_attempts.set(attempts as i64);
    }

    pub fn observe_event(&self, event: &FlowEvent) {
        let reason = Reason::from_u8(event.reason)
            .map(|r| r.as_str())
            .unwrap_or("unknown");
        self.flow_events.with_label_values(&[reason]).inc();
    }

    pub fn datapath_total(&self, outcome: &str) -> u64 {
        self.datapath.with_label_values(&[outcome]).get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_only_grow_by_delta() {
        let metrics = MetricsCollector::new().unwrap();
        let mut totals = [0u64; counters::COUNT as usize];

        totals[counters::PASSED as usize] = 10;
        metrics.observe_counters(&totals);
        totals[counters::PASSED as usize] = 15;
        totals[counters::DROPPED as usize] = 2;
        metrics.observe_counters(&totals);

        assert_eq!(metrics.datapath_total("passed"), 15);
        assert_eq!(metrics.datapath_total("dropped"), 2);
        assert_eq!(metrics.datapath_total("malformed"), 0);
    }

    #[test]
    fn test_ledger_gauges() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.observe_ledger(&[
            UnauthorizedEntry::first(1, 2),
            UnauthorizedEntry {
                src_addr: 3,
                dst_addr: 2,
                count: 4,
            },
        ]);
        assert_eq!(metrics.ledger_sources.get(), 2);
        assert_eq!(metrics.ledger_attempts.get(), 5);
    }
}
