use std::future::Future;
use std::sync::Arc;

use filerelay_config::RelayConfig;
use filerelay_core::ObjectStore;
use filerelay_storage::{LocalDirManager, OpenDalStore};
use filerelay_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics, build_sha};
use tokio::signal;
use tracing::{error, info};

use crate::error::{AppError, AppResult};
use crate::relay::{RelaySettings, ShutdownReport, start_relay};

/// Dependencies required to bootstrap the relay.
pub(crate) struct BootstrapDependencies {
    config: RelayConfig,
    store: Arc<dyn ObjectStore>,
    metrics: Metrics,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the binary entrypoint.
    pub(crate) fn from_env() -> AppResult<Self> {
        let config = filerelay_config::load().map_err(|err| AppError::config("config.load", err))?;
        let store = OpenDalStore::from_config(&config.store)
            .map_err(|err| AppError::store("store.build", err))?;
        let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        Ok(Self {
            config,
            store: Arc::new(store),
            metrics,
        })
    }
}

/// Entry point for the relay boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, logging, or relay startup fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    run_app_with(dependencies, shutdown_signal()).await?;
    Ok(())
}

/// Boot sequence that relies entirely on injected dependencies to simplify testing.
pub(crate) async fn run_app_with<S>(
    dependencies: BootstrapDependencies,
    shutdown: S,
) -> AppResult<ShutdownReport>
where
    S: Future<Output = ()>,
{
    let BootstrapDependencies {
        config,
        store,
        metrics,
    } = dependencies;

    let logging = LoggingConfig {
        level: &config.logging.level,
        format: LogFormat::from_setting(config.logging.format.as_deref()),
        build_sha: build_sha(),
    };
    filerelay_telemetry::init_logging(&logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("relay");

    info!(
        source_root = %config.source.root.display(),
        store = config.store.scheme.as_str(),
        bucket = config.store.bucket.as_deref().unwrap_or_default(),
        "filerelay bootstrap starting"
    );

    let manager = LocalDirManager::new(config.source.root.clone());
    let relay = start_relay(
        manager,
        store,
        RelaySettings::from_config(&config),
        metrics,
    )
    .await?;

    shutdown.await;
    info!("shutdown signal received");
    relay.shutdown().await
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
