pub mod collector;
pub mod exporter;

pub use collector::MetricsCollector;
pub use exporter::TextfileExporter;
