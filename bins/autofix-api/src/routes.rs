use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/autofix", post(handlers::submit_autofix))
        .route("/execute", post(handlers::execute))
        .route("/languages", get(handlers::list_languages))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
}
