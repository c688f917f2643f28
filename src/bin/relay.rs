use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use monitord_relay::relay_modules::config::{load_config, LoadedConfig};
use monitord_relay::relay_modules::connection::{ConnectionManager, ReconnectPolicy};
use monitord_relay::relay_modules::dedup::Deduplicator;
use monitord_relay::relay_modules::dispatcher::HttpAlertDispatcher;
use monitord_relay::relay_modules::logging::init_logging;
use monitord_relay::relay_modules::pipeline::AlertPipeline;
use monitord_relay::relay_modules::reporting::{LogConnectionErrorReporter, ZabbixMetricsReporter};
use monitord_relay::relay_modules::shutdown::{escalate_signals, shutdown_signal, FORCED_EXIT_CODE};
use monitord_relay::relay_modules::side_effects::ShellLocalActions;
use monitord_relay::relay_modules::workers::{WorkerPool, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_COUNT};
use monitord_relay::version::VERSION;

#[derive(Parser, Debug)]
#[command(name = "monitord-relay", about = "Relays monitord alerts to an alarm API")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "relay_config.toml")]
    config: PathBuf,
    /// Print the version and exit.
    #[arg(long)]
    version: bool,
    /// Validate the configuration and exit.
    #[arg(long)]
    health_check: bool,
}

async fn run(loaded: LoadedConfig) -> Result<(), Box<dyn Error>> {
    let LoadedConfig { config, triggers } = loaded;

    let dispatcher = HttpAlertDispatcher::from_config(&config)?;
    let pipeline = Arc::new(AlertPipeline::new(
        Arc::new(triggers),
        Arc::new(Deduplicator::new()),
        Arc::new(dispatcher),
        Arc::new(ShellLocalActions::default()),
        Arc::new(ZabbixMetricsReporter::default()),
    ));

    let pool = WorkerPool::spawn(pipeline, DEFAULT_WORKER_COUNT, DEFAULT_QUEUE_CAPACITY);
    let manager = ConnectionManager::new(
        config.address(),
        ReconnectPolicy::default(),
        Arc::new(LogConnectionErrorReporter),
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        escalate_signals(shutdown_signal, signal_cancel).await;
        error!("Forced exit.");
        std::process::exit(FORCED_EXIT_CODE);
    });

    manager.run(pool.sender(), cancel).await;

    info!("Waiting for in-flight alerts to finish.");
    pool.shutdown().await;
    info!("Shutdown complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if cli.version {
        println!("monitord-relay version: {}", VERSION);
        return Ok(());
    }

    // Logging is configured from the file, so load errors go to stderr.
    let loaded = match load_config(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Critical error loading configuration from {:?}: {}", cli.config, e);
            return Err(e.into());
        }
    };

    if cli.health_check {
        println!(
            "Health check successful: {} trigger(s) configured.",
            loaded.triggers.len()
        );
        return Ok(());
    }

    if let Err(e) = init_logging(loaded.config.log_directive()?, &loaded.config.logpath) {
        eprintln!("Critical error setting up logging: {}", e);
        return Err(e.into());
    }
    info!(
        version = VERSION,
        address = %loaded.config.address(),
        triggers = loaded.triggers.len(),
        "Starting monitord relay..."
    );

    run(loaded).await
}
