//! JSON-over-HTTP transport for the billing engine.

pub mod handlers;
pub mod types;

use axum::{
    routing::{delete, get, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::billing::BillingEngine;

/// Application state shared with every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: BillingEngine,
}

/// Creates the main application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/db", get(handlers::db_health_check))
        // Clients
        .route(
            "/api/clients",
            get(handlers::list_clients).post(handlers::create_client),
        )
        .route(
            "/api/clients/:client_id",
            get(handlers::get_client)
                .patch(handlers::update_client)
                .delete(handlers::deactivate_client),
        )
        .route(
            "/api/clients/:client_id/weeks/:week_start",
            get(handlers::client_week).put(handlers::save_week),
        )
        .route("/api/clients/:client_id/unbilled", get(handlers::unbilled))
        // Time ledger
        .route("/api/entries", put(handlers::upsert_entry))
        .route("/api/entries/:entry_id", delete(handlers::delete_entry))
        .route("/api/weeks/:week_start", get(handlers::week_summary))
        // Invoices
        .route(
            "/api/invoices",
            get(handlers::list_invoices).post(handlers::create_invoice),
        )
        .route(
            "/api/invoices/:invoice_id",
            get(handlers::get_invoice).delete(handlers::delete_invoice),
        )
        .route("/api/invoices/:invoice_id/status", put(handlers::update_status))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
