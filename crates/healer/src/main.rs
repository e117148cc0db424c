//! k8s-healer
//!
//! Watches the selected namespaces for pods stuck in CrashLoopBackOff and
//! deletes them so their owning controller recreates a fresh replica.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use healer::config::parse_duration;
use healer::pod::DEFAULT_EXCLUDE_LABEL;
use healer::{
    parse_patterns, resolve_watch_set, EngineConfig, FileConfig, KubeCluster, RemediationEngine,
    ShutdownCoordinator,
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Watches Kubernetes namespaces for persistently unhealthy pods and heals them
#[derive(Parser)]
#[command(name = "k8s-healer")]
#[command(about = "Watches Kubernetes namespaces for persistently unhealthy pods and heals them")]
#[command(long_about = "k8s-healer monitors the selected namespaces for pods stuck in \
CrashLoopBackOff and heals them by deleting the pod, forcing its controller to recreate it.

The -n/--namespaces flag takes comma-separated values and supports * and ? wildcards.
If the wildcards match no existing namespace, k8s-healer exits with an error
instead of falling back to all namespaces.

Examples:
  k8s-healer -n prod,staging              # Watch specific namespaces
  k8s-healer -n 'app-*-dev,kube-*'        # Watch namespaces matching wildcards
  k8s-healer                              # Watch all namespaces
  k8s-healer -k /path/to/my/kubeconfig    # Use a specific kubeconfig")]
#[command(version)]
struct Cli {
    /// Path to the kubeconfig file (defaults to standard locations)
    #[arg(short, long)]
    kubeconfig: Option<PathBuf>,

    /// Comma-separated namespaces to watch, wildcards allowed. Defaults to all namespaces.
    /// Startup fails if the wildcards match no existing namespace
    #[arg(short, long, env = "HEALER_NAMESPACES")]
    namespaces: Option<String>,

    /// Minimum time between healing the same pod (e.g. 10m, 30s)
    #[arg(long, env = "HEALER_HEAL_COOLDOWN", value_parser = parse_duration)]
    heal_cooldown: Option<Duration>,

    /// CrashLoopBackOff restarts before a pod is healed
    #[arg(long, env = "HEALER_RESTART_THRESHOLD")]
    restart_threshold: Option<u32>,

    /// Interval at which every cached pod is re-checked
    #[arg(long, env = "HEALER_RESYNC_PERIOD", value_parser = parse_duration)]
    resync_period: Option<Duration>,

    /// Upper bound for a single pod delete call
    #[arg(long, env = "HEALER_DELETE_TIMEOUT", value_parser = parse_duration)]
    delete_timeout: Option<Duration>,

    /// Pods with this label set to "true" are never healed
    #[arg(long, env = "HEALER_EXCLUDE_LABEL")]
    exclude_label: Option<String>,

    /// Optional YAML config file; flags take precedence over its values
    #[arg(short, long, env = "HEALER_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "HEALER_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Cli {
    /// Flags over file values over built-in defaults
    fn engine_config(&self, file: &FileConfig) -> EngineConfig {
        let mut config = file.engine_config();
        if let Some(cooldown) = self.heal_cooldown {
            config.cooldown_window = cooldown;
        }
        if let Some(threshold) = self.restart_threshold {
            config.restart_threshold = threshold;
        }
        if let Some(resync) = self.resync_period {
            config.resync_period = resync;
        }
        if let Some(timeout) = self.delete_timeout {
            config.delete_timeout = timeout;
        }
        config
    }

    fn namespace_patterns(&self, file: &FileConfig) -> Vec<String> {
        match &self.namespaces {
            Some(raw) => parse_patterns(raw),
            None => file.namespaces.clone(),
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting k8s-healer v{}", env!("CARGO_PKG_VERSION"));

    let file = match &cli.config {
        Some(path) => FileConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => FileConfig::default(),
    };
    let config = cli.engine_config(&file);
    config.validate().context("Invalid configuration")?;

    let client = KubeCluster::connect(cli.kubeconfig.as_deref())
        .await
        .context("Failed to set up Kubernetes client")?;
    let version = client
        .apiserver_version()
        .await
        .context("Failed to reach the Kubernetes API server")?;
    info!(
        "Connected to Kubernetes cluster (v{}.{})",
        version.major, version.minor
    );

    let exclude_label = cli
        .exclude_label
        .clone()
        .or_else(|| file.exclude_label.clone())
        .unwrap_or_else(|| DEFAULT_EXCLUDE_LABEL.to_string());
    let cluster = KubeCluster::new(client).with_exclude_label(&exclude_label);

    let patterns = cli.namespace_patterns(&file);
    let watch_set = resolve_watch_set(&patterns, &cluster)
        .await
        .context("Error resolving namespaces")?;

    let engine = RemediationEngine::new(config, watch_set, Arc::new(cluster))
        .context("Failed to build remediation engine")?;

    spawn_signal_handler(engine.shutdown_handle()).context("Failed to install signal handlers")?;

    engine.run().await;
    Ok(())
}

/// Trigger shutdown on SIGINT or SIGTERM
fn spawn_signal_handler(shutdown: ShutdownCoordinator) -> Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            terminate.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        wait_for_signal(signal::ctrl_c(), terminate).await;
        shutdown.trigger();
    });

    Ok(())
}

/// Resolve on whichever signal arrives first. A failed Ctrl+C listener
/// leaves SIGTERM as the only way out.
async fn wait_for_signal<C, T>(ctrl_c: C, terminate: T)
where
    C: Future<Output = std::io::Result<()>>,
    T: Future<Output = ()>,
{
    tokio::pin!(terminate);
    tokio::select! {
        result = ctrl_c => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for Ctrl+C, waiting for SIGTERM only");
                terminate.await;
            }
        }
        () = &mut terminate => {}
    }
}
