//! lifecycle-dns binary entry point.

use clap::Parser;
use lifecycle_dns::compute::NovaComputeClient;
use lifecycle_dns::plan::ZoneLayout;
use lifecycle_dns::update::{NsupdateTransport, UpdateExecutor};
use lifecycle_dns::{telemetry, Config, Dispatcher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// DNS zone synchronizer for cloud instance lifecycle events.
#[derive(Parser, Debug)]
#[command(name = "lifecycle-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "lifecycle-dns.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("LIFECYCLE_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        nameserver = %config.dns.nameserver,
        internal_domain = %config.dns.internal_domain,
        external_domain = %config.dns.external_domain,
        "Starting lifecycle-dns"
    );

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    // Authenticate with the control plane; failure here is fatal.
    let compute = NovaComputeClient::connect(config.cloud.clone()).await?;

    let transport = Arc::new(NsupdateTransport::new(&config.dns.nsupdate_path));
    let executor = UpdateExecutor::new(config.dns.nameserver.clone(), transport);
    let dispatcher = Dispatcher::new(Arc::new(compute), executor, ZoneLayout::from(&config.dns));

    if let Err(e) = dispatcher.run(&config.bus, shutdown).await {
        error!("dispatcher error: {e}");
        return Err(e.into());
    }

    info!("lifecycle-dns shutdown complete");
    Ok(())
}

/// Cancel the token on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(signal) => signal,
                Err(e) => {
                    error!("failed to install SIGTERM handler: {e}");
                    return;
                }
            };

            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        info!("shutdown signal received");
        shutdown.cancel();
    });
}
