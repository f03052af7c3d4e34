use color_eyre::eyre::WrapErr;
use tokio::net::TcpListener;
use tracing::info;

use idx_login::{
    config::ServerSettings,
    routes::routes,
    setup::{setup_sentry, setup_tracing},
    AppState,
};

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    // Initialize Sentry for error tracking
    let _sentry_guard = setup_sentry();

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()?
        .block_on(async { run_application().await })
}

async fn run_application() -> color_eyre::Result<()> {
    setup_tracing("idx_login")?;

    let settings = ServerSettings::from_env()?;
    let app_state = AppState::from_env(&settings)?;

    let listener = TcpListener::bind(settings.bind_addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", settings.bind_addr))?;
    info!(
        addr = %settings.bind_addr,
        version = env!("CARGO_PKG_VERSION"),
        "Running sign-in widget backend"
    );

    axum::serve(listener, routes(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("Server stopped unexpectedly")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
