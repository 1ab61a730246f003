mod adapters;
mod application;
mod config;
mod domain;
mod error;
mod interface;
mod ports;
#[cfg(test)]
mod testing;

use std::process::ExitCode;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adapters::{probe, PersistenceManager, ProcfsAdapter, ProcfsConfig, TokioLauncher, WebhookNotifier};
use application::{preflight, ProcessSupervisor, ResourceMonitor, SupervisorDeps};
use config::SupervisorConfig;
use interface::http::create_router;
use ports::{HealthCheck, Notifier};

const EXIT_FATAL: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_PREFLIGHT: u8 = 3;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("vigil={},tower_http=info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match SupervisorConfig::load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            error!("invalid configuration: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    init_tracing(&config.log_level);

    info!("🚀 Starting vigil v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {:?}", config);

    let procfs_adapter = ProcfsAdapter::new(ProcfsConfig::new(config.proc_path.clone()));
    let system_source = Arc::new(procfs_adapter.system_source());

    if let Err(e) = preflight::run(&config, system_source.as_ref()).await {
        error!("preflight check failed: {}", e);
        return ExitCode::from(EXIT_PREFLIGHT);
    }

    match run(config, procfs_adapter, system_source).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(
    config: SupervisorConfig,
    procfs_adapter: ProcfsAdapter,
    system_source: Arc<adapters::procfs::ProcfsSystemSource>,
) -> Result<(), BoxError> {
    let process_source = Arc::new(procfs_adapter.process_source());

    let notifier = match &config.webhook_url {
        Some(url) => {
            let notifier = WebhookNotifier::new(url.clone(), config.webhook_timeout())?;
            info!("✓ Webhook delivery to {}", url);
            Some(Arc::new(notifier) as Arc<dyn Notifier>)
        }
        None => None,
    };

    let mut probes: Vec<Option<Arc<dyn HealthCheck>>> = Vec::with_capacity(config.processes.len());
    for spec in &config.processes {
        let check = match &spec.health_check {
            Some(check) => Some(probe::from_spec(check, config.health_check_timeout())?),
            None => None,
        };
        probes.push(check);
    }

    let monitor = ResourceMonitor::new(&config, system_source, process_source.clone());
    let status_port = config.status_port;
    let processes = config.processes.clone();
    let supervisor = Arc::new(ProcessSupervisor::new(
        config.clone(),
        SupervisorDeps {
            launcher: Arc::new(TokioLauncher::new()),
            process_source,
            store: Arc::new(PersistenceManager::new(config.state_dir.clone())),
            monitor,
            notifier,
        },
    ));

    let report = supervisor.recover().await;
    info!(
        source = %report.source,
        orphans = report.orphans_terminated.len(),
        "✓ Previous state recovered"
    );

    for (spec, check) in processes.into_iter().zip(probes) {
        let name = spec.name.clone();
        match supervisor.start(spec, check).await {
            Ok(status) => info!(process = %name, pid = ?status.pid, "✓ Process started"),
            Err(e) => warn!(process = %name, "⚠ {}", e),
        }
    }
    supervisor.start_sampling();

    let server = match status_port {
        Some(port) => {
            let addr = format!("0.0.0.0:{}", port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("✓ Status API listening on {}", addr);

            let mut done = supervisor.shutdown_complete();
            let app = create_router(supervisor.clone());
            Some(tokio::spawn(async move {
                let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = done.wait_for(|done| *done).await;
                });
                if let Err(e) = serve.await {
                    error!("status API failed: {}", e);
                }
            }))
        }
        None => None,
    };

    shutdown_signal().await;
    supervisor.graceful_shutdown().await;

    if let Some(server) = server {
        if let Err(e) = server.await {
            warn!("status API task ended abnormally: {}", e);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
