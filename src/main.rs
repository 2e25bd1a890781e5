use clap::Parser;
use ebpfw::cli::{commands, Cli};
use ebpfw::config::{Config, LogFormat};
use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config, verbose: bool) {
    // RUST_LOG wins over the configured level; -v forces debug
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level))
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.log.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let command = match cli.command {
        Some(command) => command,
        None => {
            eprintln!("No command specified. Use --help for usage information.");
            process::exit(1);
        }
    };

    let config = match Config::read_or_default(command.config_path())
        .map(|config| command.apply_overrides(config))
        .and_then(Config::validated)
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    init_tracing(&config, cli.verbose);
    info!("Starting ebpfw v{}", ebpfw::VERSION);

    if let Err(e) = commands::handle_command(command, config).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
