/**
 * BACKWATCH KERNEL - Point d'entrée du service de santé des sauvegardes
 *
 * RÔLE : Orchestration : config, moteur de corrélation, relecture périodique
 * des entrées, sweep des caches, API HTTP.
 *
 * ARCHITECTURE : fichier d'entrées JSON → CorrelationEngine → vues REST.
 */

mod config;
mod health;
mod http;
mod source;
mod state;

use crate::config::load_config;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::source::{spawn_refresh_loop, InputSource};

use anyhow::{Context, Result};
use backwatch_core::CorrelationEngine;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("backwatch=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = load_config().await;

    // moteur + filtres par défaut
    let engine = Arc::new(CorrelationEngine::new(cfg.engine.clone()).context("invalid engine config")?);
    engine.set_filters(cfg.default_filters.clone());

    let health_tracker = HealthTracker::new();
    let source = InputSource::new(&cfg.inputs_path);

    // premier chargement, l'API répond "loading" tant qu'il manque
    match source.refresh(&engine, true).await {
        Ok(_) => health_tracker.mark_refreshed(),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "initial input load failed");
            health_tracker.mark_failed(format!("{e:#}"));
        }
    }

    spawn_refresh_loop(source.clone(), engine.clone(), health_tracker.clone(), cfg.refresh_interval());
    engine.spawn_cache_sweeper();

    let api_key = std::env::var("BACKWATCH_API_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        warn!("BACKWATCH_API_KEY not set - only /health will answer");
    }

    let app_state = AppState { engine, source, health_tracker, api_key: api_key.map(Arc::from) };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(cfg.listen.as_str())
        .await
        .with_context(|| format!("binding {}", cfg.listen))?;
    info!(addr = %cfg.listen, "listening");
    axum::serve(listener, app).await.context("http server stopped")?;
    Ok(())
}
