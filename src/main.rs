use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use upstream_sync::config::DEFAULT_CONFIG_PATH;
use upstream_sync::registry::NacosRegistry;
use upstream_sync::sync::Orchestrator;
use upstream_sync::{Config, Result, SyncError};

/// Keeps nginx upstream configuration in sync with the service registry.
#[derive(Parser, Debug)]
#[command(name = "upstream-sync", about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(&args.config)?;
    info!(
        "Loaded {} with {} subscriptions, writing to {}",
        args.config.display(),
        config.registry.discovery.subscribe_services.len(),
        config.nginx.conf_path.display()
    );

    let registry = NacosRegistry::new(&config.registry.discovery)?;
    let orchestrator = Orchestrator::from_config(&config)?;

    tokio::select! {
        res = orchestrator.run(&registry) => res,

        signal = shutdown_signal() => match signal {
            Ok(name) => {
                info!("Received {}, exiting", name);
                std::process::exit(0);
            }
            Err(e) => Err(SyncError::IOError(e)),
        },
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
        _ = term.recv() => Ok("SIGTERM"),
        _ = hup.recv() => Ok("SIGHUP"),
        _ = quit.recv() => Ok("SIGQUIT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}
