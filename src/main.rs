//! IdeaHub Guard
//!
//! This is the main entry point for the IdeaHub guard service.
//! It initializes the application components and starts the web server.

use std::sync::Arc;
use actix_web::middleware::from_fn;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::{error, info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;
use ideahub_guard::api::{self, middleware::guard, ApiState};
use ideahub_guard::config;
use ideahub_guard::core::{Clock, Maintenance, SessionManager, SystemClock};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting IdeaHub guard...");

    // Load configuration
    let config = config::load_config().context("Failed to load configuration")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let mut state = ApiState::new(config.clone(), clock.clone());
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => state = state.with_prometheus(handle),
        Err(e) => warn!("Prometheus recorder unavailable: {}", e),
    }

    let sessions = SessionManager::from_config(config.session.clone(), &config.redis, clock)
        .await
        .context("Failed to initialize session store")?;
    let sessions = Arc::new(sessions);
    let state = state.with_sessions(sessions.clone());

    // Background sweeps
    let maintenance = Arc::new(Maintenance::new(
        state.pipeline.clone(),
        Some(sessions),
        config.maintenance.clone(),
    ));
    actix_rt::spawn(async move {
        if let Err(e) = maintenance.start().await {
            error!("Periodic maintenance stopped: {}", e);
        }
    });

    let state = web::Data::new(state);

    info!("Listening on {}:{}", config.server.host, config.server.port);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(from_fn(guard))
            .configure(api::config)
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}
