//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{Argon2Hasher, DbAdapter, InMemoryDb},
    config::{Config, StorageBackend},
    error::ApiError,
    sweeper::SessionSweeper,
    web::{router, ApiDoc, AppState},
};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::Router;
use chat_core::{BrokerConfig, ChatBroker, DatabaseService, FanoutRouter};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Select the Store ---
    let db: Arc<dyn DatabaseService> = match &config.storage {
        StorageBackend::Postgres(url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        StorageBackend::Memory => {
            warn!("Using the in-memory store; all data is lost on restart.");
            Arc::new(InMemoryDb::new())
        }
    };

    // --- 3. Build the Broker & Shared AppState ---
    let broker = Arc::new(ChatBroker::new(
        db,
        Arc::new(Argon2Hasher::new()),
        Arc::new(FanoutRouter::new()),
        BrokerConfig {
            session_lifetime: config.session_lifetime,
            message_page_limit: config.message_page_limit,
        },
    ));
    let app_state = Arc::new(AppState::new(broker.clone(), config.clone()));

    // --- 4. Start Background Work ---
    let shutdown = CancellationToken::new();
    let sweeper = SessionSweeper::new(broker, config.session_sweep_interval)
        .spawn(shutdown.clone());

    // --- 5. Create the Web Router ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS origin '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received.");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("Session sweeper did not stop cleanly: {}", e);
    }
    info!("Server stopped.");
    Ok(())
}
