//! Transaction HTTP handlers.
//!
//! This module implements payment-attempt API endpoints:
//! - POST /api/v1/transactions - Pay selected billing-student lines
//! - POST /api/v1/donations - Make a donation
//! - GET /api/v1/transactions/{order_id} - Attempt with detail and history

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    app::AppState,
    error::AppError,
    models::principal::Principal,
    models::transaction::{
        CreateDonationRequest, CreateTransactionRequest, TransactionView,
    },
    services::transaction_service,
};

/// Open a payment for a set of billing-student lines.
///
/// # Request Body
///
/// ```json
/// {
///   "studentId": "550e8400-...",
///   "billingStudentIds": ["660e8400-...", "660e8400-..."],
///   "paymentMethodId": "770e8400-...",
///   "amount": 80000,
///   "orderId": "ORD-20240309-0001"
/// }
/// ```
///
/// # Response (201)
///
/// ```json
/// {
///   "orderId": "ORD-20240309-0001",
///   "invoiceNumber": "INV032400001",
///   "redirectUrl": "https://app.sandbox.midtrans.com/snap/v2/vtweb/...",
///   "token": "66e4fa55-...",
///   "grossAmount": 80000,
///   "adminFee": 4000,
///   "totalAmount": 84000,
///   "status": "pending"
/// }
/// ```
///
/// Retrying with a known `orderId` returns the same attempt.
pub async fn create_transaction(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<CreateTransactionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let summary = transaction_service::create_transaction(&state, &principal, request).await?;

    Ok((StatusCode::CREATED, Json(summary)))
}

/// Open a donation payment against a donation billing.
///
/// # Request Body
///
/// ```json
/// {
///   "studentId": "550e8400-...",
///   "billingId": "880e8400-...",
///   "amount": 150000,
///   "paymentMethodId": "770e8400-..."
/// }
/// ```
pub async fn create_donation(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<CreateDonationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let summary = transaction_service::create_donation(&state, &principal, request).await?;

    Ok((StatusCode::CREATED, Json(summary)))
}

/// Get one attempt by order id.
pub async fn get_transaction(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(order_id): Path<String>,
) -> Result<Json<TransactionView>, AppError> {
    let view = transaction_service::get_transaction(&state, &principal, &order_id).await?;

    Ok(Json(view))
}
