use crate::cli::Commands;
use crate::config::Config;
use crate::Result;
use tracing::info;

/// Dispatch a command. `config` is validated with overrides applied.
pub async fn handle_command(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Run { .. } => handle_run(config).await,
        Commands::Check { .. } => handle_check(&config),
    }
}

fn handle_check(config: &Config) -> Result<()> {
    info!("Configuration is valid");
    println!("interface: {}", config.interface);
    println!("mode:      {}", config.mode);
    if !config.local_addresses.is_empty() {
        let addrs: Vec<String> = config.local_addresses.iter().map(|a| a.to_string()).collect();
        println!("local:     {}", addrs.join(", "));
    }
    println!("policy:    {}", crate::policy::describe(&config.firewall));
    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn handle_run(_config: Config) -> Result<()> {
    Err(crate::EbpfwError::UnsupportedFeature(
        "ebpfw requires Linux to run eBPF programs".to_string(),
    ))
}

#[cfg(target_os = "linux")]
async fn handle_run(config: Config) -> Result<()> {
    use crate::ebpf::Firewall;
    use crate::metrics::{MetricsCollector, TextfileExporter};
    use crate::monitor::{run_event_consumer, run_ledger_monitor};
    use aya_log::EbpfLogger;
    use tokio::signal;
    use tokio_util::sync::CancellationToken;
    use tracing::warn;

    let mut firewall = Firewall::load(config.mode)?;

    if let Err(e) = EbpfLogger::init(firewall.bpf_mut()) {
        warn!(
            "Failed to initialize EbpfLogger: {}. eBPF program logs will not be visible.",
            e
        );
    }

    firewall.apply_config(&config)?;
    firewall.attach(&config.interface)?;

    let metrics = MetricsCollector::new()?;
    let exporter = config
        .monitor
        .metrics_textfile
        .clone()
        .map(|path| TextfileExporter::new(metrics.clone(), path));

    let token = CancellationToken::new();
    let ledger = run_ledger_monitor(
        firewall.take_ledger()?,
        firewall.take_counters()?,
        metrics.clone(),
        exporter,
        config.monitor.ledger_interval(),
        token.clone(),
    );
    let events = run_event_consumer(
        firewall.take_events()?,
        metrics,
        config.monitor.event_poll_interval(),
        token.clone(),
    );
    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        token.cancel();
    };

    info!("ebpfw running on {}. Press Ctrl+C to exit.", config.interface);
    tokio::join!(ledger, events, shutdown);

    firewall.unload();
    info!("ebpfw stopped");
    Ok(())
}
