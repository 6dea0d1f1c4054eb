pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::AlertingEngine;
use handlers::{
    acknowledge_alert, create_channel, create_rule, delete_channel, delete_rule, get_active_alerts,
    get_alert_history, get_channel, get_channels, get_rule, get_rules, health_check, ingest_metrics,
    resolve_alert, update_channel, update_rule, ws_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AlertingEngine>,
}

pub fn create_router(engine: Arc<AlertingEngine>) -> Router {
    let state = AppState { engine };

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/rules", get(get_rules).post(create_rule))
        .route("/rules/:id", get(get_rule).put(update_rule).delete(delete_rule))
        .route("/channels", get(get_channels).post(create_channel))
        .route(
            "/channels/:id",
            get(get_channel).put(update_channel).delete(delete_channel),
        )
        .route("/alerts", get(get_active_alerts))
        .route("/alerts/history", get(get_alert_history))
        .route("/alerts/:id/acknowledge", post(acknowledge_alert))
        .route("/alerts/:id/resolve", post(resolve_alert))
        .route("/metrics/:source", post(ingest_metrics));

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler));

    Router::new()
        .nest("/api", api_routes)
        .merge(public_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
