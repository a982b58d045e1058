//! # live-transcribe server
//!
//! Serves the credential endpoint and the connection-control API on top of
//! one shared [`TranscriptionProvider`].
//!
//! ## Startup:
//! 1. Load `.env`, initialize tracing
//! 2. Load and validate configuration
//! 3. Build shared state (HTTP client, provider)
//! 4. Serve until SIGINT/SIGTERM, then stop gracefully and release the live session

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use live_transcribe::config::AppConfig;
use live_transcribe::middleware::{ProvideTranscription, RequestLogging};
use live_transcribe::state::AppState;
use live_transcribe::{handlers, health};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting live-transcribe v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        credential_url = %config.credential_url(),
        minting = config.deepgram.project_id().is_some(),
        "Configuration loaded"
    );
    if config.deepgram.api_key().is_none() {
        warn!("No speech service API key configured; /api/authenticate will fail");
    }

    let app_state = AppState::new(config.clone())?;
    let provider = app_state.provider.clone();
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(RequestLogging)
            .wrap(ProvideTranscription::new(app_state.provider.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api")
                    .route("/authenticate", web::get().to(handlers::authenticate))
                    .route("/connection", web::get().to(handlers::connection_status))
                    .route("/connection", web::post().to(handlers::connect))
                    .route("/connection", web::delete().to(handlers::disconnect))
                    .route("/connection/audio", web::post().to(handlers::send_audio))
                    .route("/v1/health", web::get().to(health::health_check)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    if let Err(e) = provider.disconnect().await {
        warn!("Failed to finish live session during shutdown: {}", e);
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls filtering; defaults to `live_transcribe=debug,actix_web=info`.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_transcribe=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => {}
    }
}
