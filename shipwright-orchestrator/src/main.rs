use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod repository;
pub mod service;
pub mod store;
pub mod transport;
pub mod workflow;

use config::Config;
use dispatcher::{Dispatcher, WorkflowRunner};
use service::log_service::JobBroadcast;
use store::{EnvCredentialProvider, PgStore};
use transport::{ChannelRegistry, LivenessChecker};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shipwright_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Shipwright Orchestrator...");

    let config = Config::from_env();
    config.validate().expect("Invalid configuration");

    if config.git_token.is_none() {
        tracing::warn!("GIT_TOKEN is not set; jobs will fail at credential retrieval");
    }

    tracing::info!("Connecting to database...");

    // Create database connection pool
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    tracing::info!("Database connection pool created");

    // Run migrations
    db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let store = Arc::new(PgStore::new(pool.clone()));
    let registry = Arc::new(ChannelRegistry::new());
    let broadcast = Arc::new(JobBroadcast::new());
    let credentials = Arc::new(EnvCredentialProvider::from_config(&config));

    // Dispatch queued jobs (and resume interrupted ones) in the background
    let liveness = LivenessChecker::new(
        registry.clone(),
        store.clone(),
        config.liveness_wait,
        config.liveness_freshness,
    );
    let runner = WorkflowRunner::new(store.clone(), credentials, broadcast.clone(), &config);
    let dispatcher = Dispatcher::new(pool.clone(), &config, liveness, runner);
    tokio::spawn(async move { dispatcher.run().await });

    // Build router with all API endpoints
    let app = api::create_router(api::AppState {
        pool,
        registry,
        agents: store,
        broadcast,
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
