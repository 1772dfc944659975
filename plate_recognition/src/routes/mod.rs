mod health;
mod recognize;

use crate::server::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health_check", get(health::healthcheck))
        .route("/api/parking/process", post(recognize::process_parking))
}
