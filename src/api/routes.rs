use axum::{
    routing::{get, post},
    Router,
};

use crate::api::handlers::{self, AppState};

pub fn create_router() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Category edit form
        .route("/categories/:id/edit", get(handlers::edit_category))
        .route("/categories/:id", post(handlers::update_category))
}
