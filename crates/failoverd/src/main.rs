//! failoverd entry point.
//!
//! Loads the configuration, installs the primary path, starts the fault
//! injection endpoint and runs event ingress until SIGINT.

use anyhow::Context;
use clap::Parser;
use failoverd::{
    event_channels, replay, spawn_fault_api, EventIngress, EventSinks, FailoverConfig,
    FailoverController, FailoverMetrics, DEFAULT_CONFIG_PATH, DEFAULT_EVENT_QUEUE,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Primary/backup path failover controller
#[derive(Parser, Debug)]
#[command(name = "failoverd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Override the fault injection listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Replay a JSON-lines event script instead of a live switch transport
    #[arg(short = 'e', long)]
    events: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    dump_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = effective_config(&args)?;
    if args.dump_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    info!("failoverd: Starting failover controller");
    run_daemon(config, args.events).await?;
    info!("failoverd: Graceful shutdown complete");
    Ok(())
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{}'", level))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set logger")?;
    Ok(())
}

/// Config file plus command line overrides, validated.
fn effective_config(args: &Args) -> anyhow::Result<FailoverConfig> {
    let mut config = match &args.config {
        Some(path) => FailoverConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FailoverConfig::load_or_default(DEFAULT_CONFIG_PATH)?,
    };
    if let Some(listen) = args.listen {
        config.fault_api.listen = listen;
    }
    config.validate()?;
    Ok(config)
}

async fn run_daemon(config: FailoverConfig, events: Option<PathBuf>) -> anyhow::Result<()> {
    let metrics = FailoverMetrics::new().context("failed to register metrics")?;
    let controller = Arc::new(FailoverController::new(&config, metrics)?);
    controller.start();

    let api = if config.fault_api.enabled {
        let handle = spawn_fault_api(controller.clone(), config.fault_api.listen)
            .with_context(|| format!("binding fault API on {}", config.fault_api.listen))?;
        Some(handle)
    } else {
        info!("failoverd: Fault injection endpoint disabled");
        None
    };

    let (mut sinks, openflow_rx, discovery) = event_channels(DEFAULT_EVENT_QUEUE);
    let ingress = EventIngress::new(controller.clone(), config.ready_timeout());
    let ingress_task = tokio::spawn(ingress.run(openflow_rx, discovery));

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    let interrupted = match events {
        Some(path) => tokio::select! {
            replayed = replay_file(&path, &mut sinks) => {
                replayed?;
                false
            }
            _ = &mut shutdown => true,
        },
        None => {
            sinks.signal_discovery_ready();
            warn!("failoverd: No switch transport attached; serving fault injection only");
            false
        }
    };

    if !interrupted {
        if let Err(e) = (&mut shutdown).await {
            warn!(error = %e, "failoverd: Failed to listen for SIGINT");
        }
    }
    info!("failoverd: Received SIGINT, shutting down");

    drop(sinks);
    match ingress_task.await {
        Ok(stats) => info!(
            dispatched = stats.dispatched,
            installs = stats.installs,
            "failoverd: Ingress drained"
        ),
        Err(e) => warn!(error = %e, "failoverd: Ingress task failed"),
    }
    if let Some(api) = api {
        api.shutdown();
    }
    Ok(())
}

async fn replay_file(path: &Path, sinks: &mut EventSinks) -> anyhow::Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening event script {}", path.display()))?;
    info!(path = %path.display(), "failoverd: Replaying event script");
    replay(BufReader::new(file), sinks).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["failoverd"]).unwrap();
        assert!(args.config.is_none());
        assert_eq!(args.log_level, "info");
        assert!(!args.dump_config);
    }

    #[test]
    fn test_listen_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[fault_api]\nlisten = \"127.0.0.1:9000\"").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args =
            Args::try_parse_from(["failoverd", "-c", &path, "--listen", "127.0.0.1:8123"]).unwrap();
        let config = effective_config(&args).unwrap();
        assert_eq!(config.fault_api.listen.port(), 8123);
    }

    #[test]
    fn test_explicit_missing_config_is_error() {
        let args = Args::try_parse_from(["failoverd", "-c", "/nonexistent/failoverd.toml"]).unwrap();
        assert!(effective_config(&args).is_err());
    }

    #[test]
    fn test_invalid_listen_rejected_by_clap() {
        assert!(Args::try_parse_from(["failoverd", "--listen", "not-an-addr"]).is_err());
    }
}
