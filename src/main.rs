// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::time::Duration;

use actix_web::{App, HttpServer};
use tracing::{error, info, warn};

use wardgate::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use wardgate::{logging, Gateway, GatewayConfig};

fn load_config() -> std::io::Result<GatewayConfig> {
    let explicit = std::env::var(CONFIG_PATH_ENV).ok();
    let path = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_owned());

    if explicit.is_none() && !Path::new(&path).exists() {
        let mut config = GatewayConfig::default();
        config.apply_env(|key| std::env::var(key).ok());
        config.validate().map_err(std::io::Error::other)?;
        return Ok(config);
    }

    GatewayConfig::load(&path).map_err(std::io::Error::other)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = load_config().inspect_err(|e| eprintln!("wardgate: {e}"))?;
    logging::init("wardgate", config.logging.format, config.logging.filter.as_deref())
        .map_err(std::io::Error::other)?;

    if config.routes.is_empty() {
        warn!("Starting without routes; only the management API will answer");
    }

    let gateway = Gateway::from_config(&config).map_err(|e| {
        error!(error = %e, "Invalid gateway configuration");
        std::io::Error::other(e)
    })?;

    // Expired and ended sessions are dropped in the background.
    let sessions = gateway.sessions();
    let prune_every = Duration::from_secs(config.session.prune_interval_secs.max(1));
    actix_web::rt::spawn(async move {
        let mut interval = actix_web::rt::time::interval(prune_every);
        loop {
            interval.tick().await;
            match sessions.prune_expired().await {
                Ok(0) => {}
                Ok(pruned) => info!(pruned, "Pruned sessions"),
                Err(e) => warn!(error = %e, "Session pruning failed"),
            }
        }
    });

    info!(
        bind = %config.server.bind,
        workers = config.server.workers,
        management_prefix = %config.server.management_prefix,
        "Starting wardgate"
    );

    let app_gateway = gateway.clone();
    HttpServer::new(move || {
        let gateway = app_gateway.clone();
        App::new().configure(move |cfg| gateway.configure(cfg))
    })
    .bind(&config.server.bind)?
    .client_request_timeout(Duration::from_secs(config.server.client_request_timeout_secs))
    .shutdown_timeout(config.server.shutdown_timeout_secs)
    .workers(config.server.workers)
    .run()
    .await
}
