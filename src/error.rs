use thiserror::Error;

#[derive(Error, Debug)]
pub enum EbpfwError {
    #[error("eBPF error: {0}")]
    EbpfError(String),

    #[error("Failed to load eBPF program: {0}")]
    ProgramLoadFailed(String),

    #[error("Failed to attach eBPF program {program} to {interface}: {reason}")]
    AttachFailed {
        program: String,
        interface: String,
        reason: String,
    },

    #[error("Map {0} not found in eBPF object")]
    MapNotFound(String),

    #[error("Map {name} error: {reason}")]
    MapError { name: String, reason: String },

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to parse configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Kernel version {version} is too old. Minimum required: {min_version}")]
    KernelVersionTooOld {
        version: String,
        min_version: String,
    },

    #[error("{table} is full ({capacity} entries)")]
    CapacityExceeded { table: &'static str, capacity: u32 },

    #[error("Unsupported feature on this system: {0}")]
    UnsupportedFeature(String),
}

impl From<prometheus::Error> for EbpfwError {
    fn from(e: prometheus::Error) -> Self {
        EbpfwError::MetricsError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EbpfwError>;
