//! Query Frontend Service
//!
//! Long-lived dispatcher between a stateless edge and a fleet of remote
//! schedulers.
//!
//! ## Architecture
//!
//! ```text
//! Caller (RoundTrip RPC)
//!   ↓
//! Dispatcher (query id, retry loop)
//!   ↓ (round-robin)
//! WorkerPool → persistent bidi streams → schedulers
//!                                           ↓ (dispatch)
//!                                        worker processes
//!   ↑ (QueryResult RPC)                     ↓
//! ResultSink ←-------------------------------
//! ```
//!
//! ## Features
//!
//! - Fixed number of streams per scheduler address, membership driven by
//!   discovery events
//! - Bounded retry on draining schedulers
//! - Best-effort cancellation fan-out on caller cancel or deadline
//! - Prometheus metrics whose label set follows pool membership
//! - Health and metrics endpoints for Kubernetes probes
//! - Graceful shutdown on SIGINT/SIGTERM

mod admin;

use std::sync::Arc;

use admin::{admin_router, AdminState};
use eyre::{Result, WrapErr};
use query_frontend::{
    Dispatcher, DiscoveryMode, FrontendConfig, FrontendService, ResultSink, WorkerResultService,
};
use rpc::dispatch::frontend_for_worker_server::FrontendForWorkerServer;
use rpc::dispatch::frontend_server::FrontendServer;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Run the query frontend
///
/// This is the main entry point for the service. It:
/// 1. Sets up structured logging (`RUST_LOG`-driven filtering)
/// 2. Loads and validates the frontend configuration from the environment
/// 3. Seeds the worker pool with the static scheduler address (dns mode)
/// 4. Serves the caller- and worker-facing gRPC services plus the admin
///    HTTP endpoints until a shutdown signal arrives
pub async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = FrontendConfig::from_env().wrap_err("Failed to load frontend configuration")?;
    config
        .validate()
        .wrap_err("Invalid frontend configuration")?;

    info!(
        frontend_address = %config.frontend_address(),
        scheduler_address = %config.scheduler_address,
        worker_concurrency = %config.worker_concurrency,
        discovery_mode = config.discovery_mode.as_str(),
        "Starting query frontend"
    );

    let dispatcher = Arc::new(Dispatcher::new(&config));

    // Membership is discovery-driven; in dns mode the static address is the
    // single discovery event this process will ever see.
    match config.discovery_mode {
        DiscoveryMode::Dns if !config.scheduler_address.is_empty() => {
            let pool = Arc::clone(dispatcher.pool());
            let address = config.scheduler_address.clone();
            tokio::spawn(async move {
                pool.add_address(&address).await;
            });
        }
        DiscoveryMode::Dns => {
            warn!("No scheduler address configured, all round trips will fail");
        }
        DiscoveryMode::Ring => {
            info!("Ring discovery enabled, waiting for scheduler addresses");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    // Admin server (health + metrics)
    let admin_port: u16 = std::env::var("ADMIN_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);
    let admin_state = AdminState {
        metrics: Arc::clone(dispatcher.metrics()),
        pool: Arc::clone(dispatcher.pool()),
    };
    tokio::spawn(async move {
        if let Err(e) = serve_admin(admin_state, admin_port).await {
            error!(error = %e, "Admin server failed");
        }
    });

    // gRPC server: the caller-facing round trip and the worker-facing
    // result push share one socket.
    let grpc_port: u16 = std::env::var("GRPC_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(config.advertised_port);
    let grpc_addr: std::net::SocketAddr = format!("0.0.0.0:{grpc_port}")
        .parse()
        .wrap_err("Invalid gRPC listen address")?;

    let frontend_service = FrontendService::new(Arc::clone(&dispatcher));
    let result_service =
        WorkerResultService::new(ResultSink::new(Arc::clone(dispatcher.registry())));

    info!(addr = %grpc_addr, "Frontend gRPC server listening");
    tonic::transport::Server::builder()
        .add_service(FrontendServer::new(frontend_service))
        .add_service(FrontendForWorkerServer::new(result_service))
        .serve_with_shutdown(grpc_addr, wait_for_shutdown(shutdown_rx))
        .await
        .wrap_err("gRPC server failed")?;

    info!("Draining worker pool...");
    dispatcher.shutdown().await;
    info!("Query frontend stopped");
    Ok(())
}

async fn serve_admin(state: AdminState, port: u16) -> Result<()> {
    let app = admin_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind admin server to {addr}"))?;

    info!(port = %port, "Admin server listening");
    axum::serve(listener, app).await.wrap_err("Admin server failed")?;
    Ok(())
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
