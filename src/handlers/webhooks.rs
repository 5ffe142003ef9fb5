//! Gateway notification endpoint.
//!
//! Public route: authenticity comes from the payload signature, not a bearer
//! token. The gateway retries anything that is not a 2xx, so every recognized
//! notification is acknowledged, including ones for unknown orders.

use axum::{Json, body::Bytes, extract::State};
use serde_json::{Value, json};

use crate::app::AppState;
use crate::error::AppError;
use crate::models::webhook::MidtransNotification;
use crate::services::webhook_service::{self, NotificationOutcome};

/// Receive a payment status notification.
///
/// # Responses
///
/// - 200 `{"status": "ok"}`: applied, replayed, recorded as anomaly or unknown order
/// - 400: body is not a notification
/// - 401: signature mismatch
/// - 500: storage failure; the gateway will retry
pub async fn receive_notification(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidRequest(format!("malformed notification: {}", e)))?;
    let notification: MidtransNotification = serde_json::from_value(raw.clone())
        .map_err(|e| AppError::InvalidRequest(format!("malformed notification: {}", e)))?;

    let outcome = webhook_service::handle_notification(&state, notification, raw).await?;

    let result = match outcome {
        NotificationOutcome::Processed(outcome) => outcome.label(),
        NotificationOutcome::UnknownOrder(_) => "unknown_order",
    };

    Ok(Json(json!({ "status": "ok", "result": result })))
}
