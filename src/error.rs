//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::gateway::GatewayError;
use crate::models::invoice::MalformedSequence;

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Validation**: bad input, unknown billing-student lines, unsupported payment methods
/// - **Authentication / authorization**: missing token, missing capability
/// - **Gateway**: rejected charges, unsupported channels, unavailability (retryable)
/// - **Webhook authenticity**: signature mismatch
/// - **Numbering**: invoice configuration and sequence corruption
/// - **Storage**: any sqlx::Error
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Bearer token is missing, unknown, or inactive.
    #[error("Invalid or missing access token")]
    InvalidToken,

    /// The principal lacks the capability for this school.
    #[error("Not permitted to {0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Request body or parameters are invalid.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// Selected billing-student lines are unknown, foreign, deleted, or already paid.
    #[error("Invalid billing selection: {0}")]
    InvalidBillingSelection(String),

    #[error("Unsupported payment method: {0}")]
    UnsupportedPaymentMethod(String),

    /// Fee settings cannot be used to compute a charge; never defaulted.
    #[error("Invalid fee configuration: {0}")]
    InvalidFeeConfiguration(String),

    #[error("Invoice format is not configured for this school")]
    InvoiceFormatNotConfigured,

    /// The last issued invoice number cannot be continued.
    #[error(transparent)]
    SequenceParse(#[from] MalformedSequence),

    /// Another request claimed the same invoice number; allocation may be retried.
    #[error("Invoice number {0} is already taken")]
    InvoiceNumberConflict(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Invalid notification signature")]
    InvalidSignature,

    /// A gateway report names an order this service never created.
    #[error("Unknown transaction {0}")]
    UnknownTransaction(String),

    /// Not every billing-student line of a settled transaction could be marked paid.
    #[error("Settlement cascade incomplete: {0}")]
    CascadeIncomplete(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": "Human-readable error message",
///   "code": "error_type"
/// }
/// ```
///
/// Storage and internal failures hide their details from the client.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::InvalidBillingSelection(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_billing_selection",
            ),
            AppError::UnsupportedPaymentMethod(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "unsupported_payment_method",
            ),
            AppError::InvalidFeeConfiguration(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "invalid_fee_configuration",
            ),
            AppError::InvoiceFormatNotConfigured => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invoice_format_not_configured",
            ),
            AppError::SequenceParse(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "sequence_parse_error")
            }
            AppError::InvoiceNumberConflict(_) => (StatusCode::CONFLICT, "invoice_number_conflict"),
            AppError::Gateway(GatewayError::UnsupportedChannel(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unsupported_channel")
            }
            AppError::Gateway(GatewayError::Rejected { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "gateway_rejected")
            }
            AppError::Gateway(GatewayError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "gateway_unavailable")
            }
            AppError::Gateway(GatewayError::InvalidResponse(_)) => {
                (StatusCode::BAD_GATEWAY, "gateway_invalid_response")
            }
            AppError::Gateway(GatewayError::DuplicateOrder(_)) => {
                (StatusCode::CONFLICT, "gateway_duplicate_order")
            }
            AppError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            AppError::UnknownTransaction(_) => (StatusCode::NOT_FOUND, "unknown_transaction"),
            AppError::CascadeIncomplete(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "cascade_incomplete")
            }
            AppError::Database(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let message = match &self {
            AppError::InvalidRequest(msg) => msg.clone(),
            AppError::Database(_) | AppError::Internal(_) | AppError::CascadeIncomplete(_) => {
                tracing::error!(error = %self, "request failed");
                "An internal error occurred".to_string()
            }
            AppError::SequenceParse(_) => {
                tracing::error!(error = %self, "invoice numbering halted");
                "Invoice numbering could not continue; contact support".to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "code": code
        }));

        (status, body).into_response()
    }
}
