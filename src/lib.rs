//! Userspace control plane for the ebpfw packet filter
//!
//! Loads the tc or XDP programs, writes the policy maps from configuration
//! and reports what the datapath records. The per-packet logic itself lives
//! in `ebpfw-common` and is re-exported here.

pub mod cli;
pub mod config;
pub mod ebpf;
pub mod error;
pub mod host;
pub mod metrics;
pub mod monitor;
pub mod policy;

pub use ebpfw_common as common;
pub use error::{EbpfwError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
