use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kartex_alerting::ai::{AiAnalyzer, HttpAnalyzer, NullAnalyzer};
use kartex_alerting::api;
use kartex_alerting::notifications::DeliveryTransport;
use kartex_alerting::{AlertingEngine, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    info!("Starting Kartex alerting engine...");

    // Load configuration
    let config = Config::load("config.toml")?;
    info!("Configuration loaded");

    let analyzer: Arc<dyn AiAnalyzer> = if config.ai.enabled {
        let analyzer = HttpAnalyzer::new(config.ai.endpoint.clone(), config.ai.timeout_secs)?
            .with_api_key(config.ai.api_key.clone())
            .with_model(config.ai.model.clone());
        info!("AI analyzer enabled at {}", config.ai.endpoint);
        Arc::new(analyzer)
    } else {
        info!("AI analyzer disabled, alerts will not be enriched");
        Arc::new(NullAnalyzer)
    };
    let transport = Arc::new(DeliveryTransport::new(Duration::from_secs(10))?);

    let engine = AlertingEngine::new(&config, analyzer, transport)?;
    engine.start().await;

    // Start HTTP API server
    let api_router = api::create_router(engine.clone());
    let addr = format!("0.0.0.0:{}", config.server.http_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP API server listening on {}", addr);

    let api_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, api_router).await {
            error!("API server error: {}", e);
        }
    });

    tokio::select! {
        _ = api_handle => {
            error!("API server stopped unexpectedly");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        }
    }

    engine.shutdown().await;
    Ok(())
}
