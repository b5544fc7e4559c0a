// Route table for the Gauntlet API
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/challenges", post(handlers::create_challenge))
        .route("/challenges/validate", post(handlers::validate))
        .route(
            "/challenges/:id",
            get(handlers::get_challenge).put(handlers::update_challenge),
        )
        .route("/challenges/:id/stats", get(handlers::challenge_stats))
        .route("/submissions", post(handlers::submit))
        .route("/submissions/:id", get(handlers::get_submission))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
}
