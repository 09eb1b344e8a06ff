use crate::{application::LedgerService, web::handlers::*};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn create_router(service: Arc<LedgerService>) -> Router {
    Router::new()
        .route(
            "/account",
            get(get_accounts).post(create_account).delete(delete_account),
        )
        .route("/account/{id}", get(get_account).put(update_account))
        .route("/account/{id}/transfer", post(transfer))
        .route("/account/{id}/debit", post(debit))
        .route("/account/{id}/credit", post(credit))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
