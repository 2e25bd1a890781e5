use crate::metrics::collector::MetricsCollector;
use crate::Result;
use prometheus::{Encoder, TextEncoder};
use std::path::PathBuf;
use tracing::debug;

/// Writes the text exposition to a file for a node-exporter textfile
/// collector.
pub struct TextfileExporter {
    collector: MetricsCollector,
    path: PathBuf,
}

impl TextfileExporter {
    pub fn new(collector: MetricsCollector, path: PathBuf) -> Self {
        Self { collector, path }
    }

    pub fn format_current_metrics(&self) -> Result<String> {
        format_metrics(&self.collector)
    }

    /// Replace the file atomically so scrapers never see a partial write.
    pub fn write(&self) -> Result<()> {
        let text = self.format_current_metrics()?;
        let tmp = self.path.with_extension("prom.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Metrics written to {}", self.path.display());
        Ok(())
    }
}

pub fn format_metrics(collector: &MetricsCollector) -> Result<String> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&collector.registry().gather(), &mut buf)?;
    String::from_utf8(buf).map_err(|e| crate::EbpfwError::MetricsError(e.to_string()))
}
