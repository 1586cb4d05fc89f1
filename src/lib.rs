pub mod accounts; // Registration, sign-in, doctor/patient provisioning
pub mod analytics; // Medication adherence + spreadsheet export
pub mod api; // HTTP + WebSocket surface
pub mod auth;
pub mod catalog; // Video folders, videos, folder assignment
pub mod chat;
pub mod config;
pub mod core_state; // Backend bundle + shared state
pub mod db;
pub mod directory; // Rosters, user tables, dashboard counts
pub mod models;
pub mod registry; // National patient registry lookup
pub mod session; // Role-based routing
pub mod storage;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

/// Startup failures reported by `run()`.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Backend error: {0}")]
    Core(#[from] core_state::CoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serve the API until Ctrl-C.
pub fn run() -> Result<(), StartupError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let app_config = config::AppConfig::from_env()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let backend = core_state::Backend::from_config(&app_config)?;
        let bind = app_config.bind;
        let core = Arc::new(core_state::CoreState::new(backend, app_config));

        let mut server = api::start_api_server(core, bind).await?;
        tracing::info!(addr = %server.addr(), "Listening");

        tokio::signal::ctrl_c().await?;
        server.shutdown();
        server.stopped().await;
        Ok::<(), StartupError>(())
    })
}
