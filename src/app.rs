//! Shared application state and HTTP router.

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use chrono::FixedOffset;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::gateway::PaymentGateway;
use crate::gateway::signature::SignatureVerifier;
use crate::handlers;
use crate::middleware;
use crate::repository::PaymentRepository;
use crate::services::notification_service::Notifier;

/// Engine tunables derived from `Config`.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Lifetime of an opened charge at the gateway
    pub charge_expiry_minutes: i64,

    /// Time zone invoice date parts and periods are read in
    pub invoice_offset: FixedOffset,

    /// Age after which an `initiating` intent is resolved by the sweeper
    pub stale_intent_minutes: i64,
}

/// Dependencies shared by every handler and background task.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn PaymentRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: EngineSettings,
}

/// Build the full router: public routes, authenticated `/api/v1` routes and
/// the internal reconciliation surface.
pub fn build_router(state: AppState) -> Router {
    let authenticated_routes = Router::new()
        .route(
            "/api/v1/transactions",
            post(handlers::transactions::create_transaction),
        )
        .route(
            "/api/v1/transactions/{order_id}",
            get(handlers::transactions::get_transaction),
        )
        .route(
            "/api/v1/donations",
            post(handlers::transactions::create_donation),
        )
        .route(
            "/api/v1/schools/{school_id}/invoice-format",
            get(handlers::invoice_formats::get_invoice_format)
                .put(handlers::invoice_formats::put_invoice_format),
        )
        .route(
            "/api/v1/internal/transactions/{order_id}/reconcile",
            post(handlers::reconciliation::reconcile_transaction),
        )
        .route(
            "/api/v1/internal/transactions/{order_id}/cancel",
            post(handlers::reconciliation::cancel_transaction),
        )
        .route(
            "/api/v1/internal/transactions/{order_id}/refund",
            post(handlers::reconciliation::refund_transaction),
        )
        .route(
            "/api/v1/internal/reconciliation/sweep",
            post(handlers::reconciliation::run_sweep),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api/v1/payments/notification",
            post(handlers::webhooks::receive_notification),
        )
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
