pub mod error;
pub mod routes;
pub mod state;
pub mod workers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use coach_core::config::Config;
use coach_core::Engine;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve_on()` and available for integration testing.
pub fn build_router(app_state: state::AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health::health))
        // Inbound gateway webhook
        .route("/api/inbound/{channel}", post(routes::inbound::receive))
        // Participants
        .route(
            "/api/participants/monitoring",
            post(routes::participants::switch_monitoring),
        )
        .route(
            "/api/participants/{id}/messages",
            get(routes::participants::list_messages).post(routes::participants::send_message),
        )
        .route(
            "/api/participants/{id}/status",
            get(routes::participants::get_status),
        )
        .route(
            "/api/participants/{id}/variables",
            put(routes::participants::put_variable),
        )
        // Messages
        .route("/api/messages/{id}/solve", post(routes::messages::solve))
        .route("/api/statistics", get(routes::statistics::get_statistics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Open the engine under `root`, recover from an unclean stop, start the
/// worker loops and serve the API on `port` until ctrl-c.
pub async fn serve(root: PathBuf, config: Config, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    serve_on(root, config, listener).await
}

/// Like [`serve`], on a pre-bound listener.
pub async fn serve_on(
    root: PathBuf,
    config: Config,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();

    let engine = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || -> coach_core::Result<Engine> {
            let engine = Engine::open(&root, &config)?;
            engine.startup_recovery()?;
            Ok(engine)
        })
        .await??
    };
    let engine = Arc::new(engine);
    let app_state = state::AppState::new(engine.clone());
    let workers = workers::spawn(
        engine.clone(),
        &config.workers,
        app_state.inbound_wake.clone(),
    );

    tracing::info!("coach server listening on http://localhost:{actual_port}");

    let served = axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    tracing::info!("stopping workers");
    workers
        .shutdown(Duration::from_secs(config.workers.shutdown_grace_secs))
        .await;
    // A webhook transport owns a blocking HTTP client, which must not be
    // dropped on a runtime thread.
    tokio::task::spawn_blocking(move || drop(engine)).await?;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
