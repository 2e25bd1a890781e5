pub mod commands;

use crate::config::{Config, Mode};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ebpfw")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stateful eBPF packet filter with a default-deny port allow-list", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Load the firewall, attach it and report until Ctrl-C")]
    Run {
        #[arg(short, long, help = "Configuration file (default: /etc/ebpfw/config.yaml)")]
        config: Option<PathBuf>,

        #[arg(short, long, help = "Network interface, overrides the configuration")]
        interface: Option<String>,

        #[arg(short, long, value_enum, help = "Attach mode, overrides the configuration")]
        mode: Option<Mode>,
    },
    #[command(about = "Validate the configuration and print the effective policy")]
    Check {
        #[arg(short, long, help = "Configuration file (default: /etc/ebpfw/config.yaml)")]
        config: Option<PathBuf>,
    },
}

impl Commands {
    pub fn config_path(&self) -> Option<&std::path::Path> {
        match self {
            Commands::Run { config, .. } | Commands::Check { config } => config.as_deref(),
        }
    }

    /// Apply `run` overrides to a parsed configuration. Validation happens
    /// afterwards, on the effective values.
    pub fn apply_overrides(&self, mut config: Config) -> Config {
        if let Commands::Run {
            interface, mode, ..
        } = self
        {
            if let Some(interface) = interface {
                config.interface = interface.clone();
            }
            if let Some(mode) = mode {
                config.mode = *mode;
            }
        }
        config
    }
}
