//! Internal operator endpoints: reconcile, cancel, refund and sweep.
//!
//! All require the `ReconcilePayments` capability.

use axum::{
    Extension, Json,
    extract::{Path, State},
};

use crate::{
    app::AppState,
    error::AppError,
    models::principal::Principal,
    models::transaction::{RefundRequest, RefundResponse, TransactionSummary},
    services::reconciliation_service::{self, SweepReport},
};

/// Pull the gateway's status for one order and apply it.
pub async fn reconcile_transaction(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(order_id): Path<String>,
) -> Result<Json<TransactionSummary>, AppError> {
    let summary =
        reconciliation_service::reconcile_transaction(&state, &principal, &order_id).await?;

    Ok(Json(summary))
}

pub async fn cancel_transaction(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(order_id): Path<String>,
) -> Result<Json<TransactionSummary>, AppError> {
    let summary = reconciliation_service::cancel_transaction(&state, &principal, &order_id).await?;

    Ok(Json(summary))
}

/// # Request Body
///
/// ```json
/// { "amount": 84000, "reason": "duplicate payment" }
/// ```
pub async fn refund_transaction(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(order_id): Path<String>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<RefundResponse>, AppError> {
    let receipt =
        reconciliation_service::refund_transaction(&state, &principal, &order_id, request).await?;

    Ok(Json(receipt))
}

/// Run one reconciliation sweep now. Platform operators only.
pub async fn run_sweep(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<SweepReport>, AppError> {
    let report = reconciliation_service::sweep_now(&state, &principal).await?;

    Ok(Json(report))
}
