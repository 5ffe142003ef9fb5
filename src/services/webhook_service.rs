//! Webhook reconciler - applies gateway status notifications.
//!
//! This module handles signature verification, the status state machine
//! (through `PaymentRepository::apply_status`) and the settlement cascade
//! that marks billing-student lines paid.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::app::AppState;
use crate::error::AppError;
use crate::gateway::signature::SignatureFields;
use crate::models::gateway_log::NewGatewayLog;
use crate::models::transaction::{
    ApplyOutcome, CascadeStatus, StatusUpdate, TransactionBilling, TransactionStatus,
    UpdateSource,
};
use crate::models::webhook::MidtransNotification;
use crate::services::notification_service::{Notifier, SettlementNotice};

/// How an authenticated notification was handled.
#[derive(Debug)]
pub enum NotificationOutcome {
    Processed(ApplyOutcome),
    /// The order is not ours; acknowledged so the gateway stops retrying
    UnknownOrder(String),
}

/// Handle one gateway notification.
///
/// # Process
///
/// 1. Verify `SHA-512(order_id + status_code + gross_amount + server_key)`
///    and that the unsigned status agrees with the signed `status_code`
/// 2. Record the raw payload in the gateway log
/// 3. Apply the status under the per-order row lock
/// 4. On a fresh settlement, run the cascade and spawn the payer notice
///
/// # Errors
///
/// - `InvalidSignature`: bad signature or a status the signed code does not
///   vouch for; nothing is read or written
/// - `InvalidRequest`: authenticated but malformed fields
/// - `Database`: storage failure; the gateway will retry
pub async fn handle_notification(
    state: &AppState,
    notification: MidtransNotification,
    raw: Value,
) -> Result<NotificationOutcome, AppError> {
    let fields = SignatureFields {
        order_id: &notification.order_id,
        status_code: &notification.status_code,
        gross_amount: &notification.gross_amount,
    };
    if !state.verifier.verify(&fields, &notification.signature_key) {
        tracing::warn!(
            order_id = %notification.order_id,
            transaction_status = %notification.transaction_status,
            "notification signature mismatch"
        );
        return Err(AppError::InvalidSignature);
    }
    if !notification.status_matches_code() {
        tracing::warn!(
            order_id = %notification.order_id,
            status_code = %notification.status_code,
            transaction_status = %notification.transaction_status,
            "notification status does not match its signed status code"
        );
        return Err(AppError::InvalidSignature);
    }

    let update = notification
        .to_status_update(UpdateSource::Webhook)
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    let entry = NewGatewayLog {
        order_id: update.order_id.clone(),
        operation: "notification",
        request: raw,
        response: None,
        http_status: None,
    };
    if let Err(e) = state.repo.record_exchange(entry).await {
        tracing::warn!(order_id = %update.order_id, error = %e, "failed to record notification");
    }

    match apply_update(state, &update).await {
        Ok(outcome) => Ok(NotificationOutcome::Processed(outcome)),
        Err(AppError::UnknownTransaction(order_id)) => {
            tracing::warn!(order_id = %order_id, "notification for unknown order");
            Ok(NotificationOutcome::UnknownOrder(order_id))
        }
        Err(e) => Err(e),
    }
}

/// Apply a status report from any source and follow up on settlement.
///
/// Shared by the webhook path and reconciliation so both go through the same
/// state machine and cascade.
pub async fn apply_update(state: &AppState, update: &StatusUpdate) -> Result<ApplyOutcome, AppError> {
    let outcome = state.repo.apply_status(update).await?;
    let transaction = outcome.transaction();

    tracing::info!(
        order_id = %transaction.order_id,
        gateway_status = %update.gateway_status,
        status = %transaction.transaction_status,
        source = update.source.as_str(),
        outcome = outcome.label(),
        "status report handled"
    );

    if let Some(reported) = update.gross_amount {
        if reported != transaction.total_amount {
            tracing::warn!(
                order_id = %transaction.order_id,
                reported,
                expected = transaction.total_amount,
                "gateway amount differs from charged total"
            );
        }
    }

    if let ApplyOutcome::Applied {
        transaction,
        previous,
    } = &outcome
    {
        if transaction.transaction_status == TransactionStatus::Settled {
            let paid_at = update.settlement_time.unwrap_or_else(Utc::now);
            tracing::info!(
                order_id = %transaction.order_id,
                previous = %previous,
                "payment settled"
            );

            if transaction.cascade_status == CascadeStatus::Pending {
                run_cascade(state, transaction, paid_at).await;
            }
            spawn_settlement_notice(state.notifier.clone(), transaction, paid_at);
        }
    }

    Ok(outcome)
}

/// Mark the transaction's lines paid, or flag the transaction for follow-up.
///
/// Never fails the caller: a settled status is not rolled back because the
/// cascade could not complete.
pub async fn run_cascade(
    state: &AppState,
    transaction: &TransactionBilling,
    paid_at: DateTime<Utc>,
) -> bool {
    match state.repo.settle_billing_students(transaction, paid_at).await {
        Ok(()) => {
            tracing::info!(
                order_id = %transaction.order_id,
                lines = transaction.billing_student_ids.0.len(),
                "billing lines marked paid"
            );
            true
        }
        Err(e) => {
            tracing::error!(
                order_id = %transaction.order_id,
                error = %e,
                "settlement cascade failed"
            );
            if let Err(flag_err) = state
                .repo
                .flag_cascade_failure(transaction, &e.to_string())
                .await
            {
                tracing::error!(
                    order_id = %transaction.order_id,
                    error = %flag_err,
                    "failed to flag cascade failure"
                );
            }
            false
        }
    }
}

fn spawn_settlement_notice(
    notifier: Arc<dyn Notifier>,
    transaction: &TransactionBilling,
    paid_at: DateTime<Utc>,
) {
    let notice = SettlementNotice::new(transaction, paid_at);
    tokio::spawn(async move {
        if let Err(e) = notifier.payment_settled(&notice).await {
            tracing::warn!(order_id = %notice.order_id, error = %e, "settlement notice not delivered");
        }
    });
}
