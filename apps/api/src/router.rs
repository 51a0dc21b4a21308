use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use booking_cell::handlers::AppState;
use booking_cell::router::booking_routes;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "MediBook booking API is running!" }))
        .merge(booking_routes(state))
}
