//! Text Mesh Server
//!
//! Runs either the gateway or the preprocessing service. It loads
//! configuration, sets up logging and metrics, and serves until Ctrl-C.
//! SIGHUP reloads the configuration file; the cache switch and log level
//! change in place, everything else needs a restart.

use anyhow::{bail, Context};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use text_mesh::config::LoggingConfig;
use text_mesh::server::serve;
use text_mesh::{
    CacheSwitch, Dispatcher, Gateway, MeshConfig, MeshMetrics, PreprocessingService, RedisStore,
    ServiceRegistry, SharedStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

const DEFAULT_CONFIG_PATH: &str = "text_mesh.yaml";

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Main entry point for the Text Mesh server
///
/// # Usage
/// ```bash
/// # Gateway with default config (text_mesh.yaml, or built-in defaults)
/// text-mesh gateway
///
/// # Preprocessing service with custom config
/// text-mesh preprocessing /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);
    let role = args.next().unwrap_or_default();
    let config_arg = args.next().map(PathBuf::from);

    if role != "gateway" && role != "preprocessing" {
        bail!("usage: text-mesh <gateway|preprocessing> [config.yaml]");
    }

    let (config, config_path) = load_config(config_arg)?;
    let filter_handle = init_logging(&config.logging)?;

    info!("Starting Text Mesh {} ({})", role, env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Configuration loaded from: {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }

    let switch = CacheSwitch::new(config.cache.enabled);
    let shutdown = CancellationToken::new();

    spawn_signal_handlers(
        config.clone(),
        config_path,
        switch.clone(),
        filter_handle,
        shutdown.clone(),
    );

    let metrics = MeshMetrics::new().context("Failed to register metrics")?;

    if role == "gateway" {
        run_gateway(&config, metrics, shutdown).await
    } else {
        run_preprocessing(&config, switch, metrics, shutdown).await
    }
}

fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<(MeshConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        let config = MeshConfig::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        return Ok((config, Some(path)));
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        let config = MeshConfig::from_file(default_path)
            .with_context(|| format!("Failed to load configuration from {}", DEFAULT_CONFIG_PATH))?;
        return Ok((config, Some(default_path.to_path_buf())));
    }

    Ok((MeshConfig::default(), None))
}

/// Install the global subscriber; `RUST_LOG` overrides the configured level
fn init_logging(logging: &LoggingConfig) -> anyhow::Result<FilterHandle> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;
    let (filter, handle) = reload::Layer::new(filter);

    let json = logging.format == "json";
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_current_span(false)))
        .with((!json).then(|| {
            fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_line_number(true)
        }))
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(handle)
}

fn spawn_signal_handlers(
    mut config: MeshConfig,
    config_path: Option<PathBuf>,
    switch: CacheSwitch,
    filter_handle: FilterHandle,
    shutdown: CancellationToken,
) {
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Shutdown requested");
        ctrl_c_shutdown.cancel();
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!("SIGHUP reload unavailable: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                received = hangup.recv() => if received.is_none() { return },
            }

            let path = match &config_path {
                Some(path) => path,
                None => {
                    warn!("SIGHUP received but no configuration file is in use");
                    continue;
                }
            };

            match config.reload_from_file(path) {
                Ok(changes) if !changes.has_changes() => info!("Configuration unchanged"),
                Ok(changes) => {
                    info!("Configuration reloaded, changed: {:?}", changes.summary());
                    if changes.cache_enabled_changed {
                        switch.set_enabled(config.cache.enabled);
                        info!("Cache {}", if config.cache.enabled { "enabled" } else { "disabled" });
                    }
                    if changes.logging_changed {
                        match EnvFilter::try_new(&config.logging.level) {
                            Ok(filter) => {
                                if let Err(e) = filter_handle.reload(filter) {
                                    warn!("Failed to apply log level: {}", e);
                                }
                            }
                            Err(e) => warn!("Invalid log level '{}': {}", config.logging.level, e),
                        }
                    }
                    if changes.requires_restart() {
                        warn!("Some changes only take effect after a restart");
                    }
                }
                Err(e) => error!("Failed to reload configuration: {}", e),
            }
        }
    });

    #[cfg(not(unix))]
    {
        let _ = (config, config_path, switch, filter_handle, shutdown);
    }
}

async fn run_gateway(
    config: &MeshConfig,
    metrics: MeshMetrics,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let registry = ServiceRegistry::from_config(config)?;
    for endpoint in registry.iter() {
        info!(
            "  - {} at {} (read timeout {:?}, {} retries)",
            endpoint.name(),
            endpoint.base_address(),
            endpoint.read_timeout(),
            endpoint.max_retries()
        );
    }

    let dispatcher = Dispatcher::new(registry)?.with_metrics(metrics.clone());
    let gateway = Arc::new(
        Gateway::new(dispatcher, metrics).with_max_body_bytes(config.gateway.max_body_bytes),
    );

    let addr: SocketAddr = config
        .gateway
        .listen_address
        .parse()
        .with_context(|| format!("Invalid gateway address '{}'", config.gateway.listen_address))?;

    serve("Gateway", addr, gateway, shutdown).await?;
    Ok(())
}

async fn run_preprocessing(
    config: &MeshConfig,
    switch: CacheSwitch,
    metrics: MeshMetrics,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let shared: Option<Arc<dyn SharedStore>> = match &config.cache.l2_url {
        Some(url) => {
            let timeout = std::time::Duration::from_millis(config.cache.l2_timeout_ms);
            match RedisStore::connect(url, timeout) {
                Ok(store) => Some(Arc::new(store) as Arc<dyn SharedStore>),
                Err(e) => {
                    warn!("Shared cache tier disabled: {}", e);
                    None
                }
            }
        }
        None => {
            info!("No shared cache tier configured, using in-process cache only");
            None
        }
    };

    info!(
        "Cache: enabled={}, l1_capacity={}, l2_ttl={}s",
        config.cache.enabled, config.cache.l1_capacity, config.cache.l2_ttl_secs
    );

    let service = Arc::new(PreprocessingService::from_config(config, shared, switch, metrics));

    if config.cache.l2_url.is_some() {
        if service.executor().ping_l2().await {
            info!("Shared cache tier reachable");
        } else {
            warn!("Shared cache tier not reachable, continuing with L1 only");
        }
    }

    let addr: SocketAddr = config
        .preprocessing
        .listen_address
        .parse()
        .with_context(|| {
            format!(
                "Invalid preprocessing address '{}'",
                config.preprocessing.listen_address
            )
        })?;

    serve("Preprocessing service", addr, service, shutdown).await?;
    Ok(())
}
