use axum::{Router, routing::get};
use configuration::Settings;
use database::{Lifecycle, LivenessProbe, SessionManager, log_migration_status};
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

pub mod error;
pub mod handlers;
pub mod health;

/// The shared application state that all handlers can access.
pub struct AppState {
    pub sessions: SessionManager,
    pub probe: LivenessProbe,
    pub version: String,
    pub started_at: Instant,
}

impl AppState {
    /// Seconds since `started_at`, rounded to two decimals.
    pub fn uptime_seconds(&self) -> f64 {
        (self.started_at.elapsed().as_secs_f64() * 100.0).round() / 100.0
    }
}

/// Installs the global `tracing` subscriber. `RUST_LOG` wins when set;
/// otherwise `debug` turns on debug output for everything.
pub fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Builds the application router over an already started pool.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(Any)
        .allow_headers(AllowHeaders::any());

    Router::new()
        .route("/", get(handlers::root))
        .nest("/v1", health::routes())
        .fallback(error::not_found)
        .with_state(state)
        .layer(cors)
        // Logs every incoming request.
        .layer(TraceLayer::new_for_http())
}

/// The main function to configure and run the web server.
///
/// The pool is created before the listener is bound and disposed after the
/// server has drained, whether serving ended cleanly or with an error.
pub async fn run_server(settings: Settings) -> anyhow::Result<()> {
    let started_at = Instant::now();

    let lifecycle = Lifecycle::from_settings(&settings.database)?;
    let pool = lifecycle.on_start().await?;

    let sessions = SessionManager::new(pool.clone());
    if settings.app.debug {
        log_migration_status(&sessions).await;
    }

    let state = Arc::new(AppState {
        sessions,
        probe: LivenessProbe::with_timeout(pool, settings.database.probe_timeout()),
        version: settings.app.version.clone(),
        started_at,
    });
    let app = create_router(state);

    let served = serve(app, &settings).await;
    lifecycle.on_stop().await;
    served
}

async fn serve(app: Router, settings: &Settings) -> anyhow::Result<()> {
    let addr = format!("{}:{}", settings.app.host, settings.app.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(version = %settings.app.version, "Web server started and listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Web server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections");
}
