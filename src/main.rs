use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use trackwatch::config::Config;
use trackwatch::monitor::Monitor;

#[derive(Parser, Debug)]
#[command(name = "trackwatch", about = "Telemetry collection and threshold alerting service")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/trackwatch/config.toml")]
    config: String,

    /// Validate config and exit
    #[arg(long)]
    check: bool,

    /// Run a single collection cycle, print the snapshot as JSON and exit
    #[arg(long)]
    once: bool,

    /// Print version and exit
    #[arg(short, long)]
    version: bool,
}

#[tokio::main(worker_threads = 2)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("trackwatch {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration
    let config = Config::load(&cli.config)?;

    if cli.check {
        println!(
            "Configuration is valid ({} custom rules).",
            config.rules.len()
        );
        return Ok(());
    }

    // Initialize logging
    init_logging(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        hostname = %config.agent.hostname,
        "Starting TrackWatch"
    );

    if let Err(e) = run(config, cli.once).await {
        error!(error = %e, "TrackWatch terminated with error");
        return Err(e);
    }

    Ok(())
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.agent.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

async fn run(config: Config, once: bool) -> Result<()> {
    let monitor = Monitor::from_config(&config)?;

    if once {
        let snapshot = monitor.run_cycle().await;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    if !config.monitoring.enabled {
        info!("Monitoring disabled in configuration, nothing to do");
        return Ok(());
    }

    monitor.start().await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, exiting");
    monitor.stop();

    Ok(())
}
