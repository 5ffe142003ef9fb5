//! Reconciliation against the gateway's own view of each order.
//!
//! Webhooks can be lost and gateway calls can time out. This service closes
//! those gaps by querying the gateway directly, on demand through the internal
//! endpoints and periodically through the sweeper task.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::app::AppState;
use crate::error::AppError;
use crate::middleware::auth::{authorize, authorize_platform};
use crate::models::principal::{Capability, Principal};
use crate::models::transaction::{
    ApplyOutcome, CascadeStatus, NewHistoryEntry, RefundRequest, RefundResponse, StatusUpdate,
    TransactionBilling, TransactionStatus, TransactionSummary, UpdateSource,
};
use crate::services::webhook_service::{apply_update, run_cascade};

/// Rows examined per sweep for each kind of follow-up.
const SWEEP_BATCH: i64 = 100;

/// What a single sweep did.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub examined: usize,
    pub applied: usize,
    pub abandoned: usize,
    pub deferred: usize,
    pub cascades_retried: usize,
    pub cascades_completed: usize,
    pub errors: usize,
}

/// Result of resolving one order against the gateway.
#[derive(Debug)]
enum Resolution {
    Reported(ApplyOutcome),
    /// The gateway never saw the charge; the intent was closed locally
    Abandoned,
    /// Unknown to the gateway but still payable; left for a later pass
    Deferred,
}

/// Query the gateway for one order and apply what it reports.
///
/// A settled transaction whose cascade is unfinished has the cascade retried
/// instead; its gateway status can no longer change.
pub async fn reconcile_transaction(
    state: &AppState,
    principal: &Principal,
    order_id: &str,
) -> Result<TransactionSummary, AppError> {
    let transaction = guard(state, principal, order_id).await?;

    if transaction.transaction_status == TransactionStatus::Settled {
        if matches!(
            transaction.cascade_status,
            CascadeStatus::Pending | CascadeStatus::Failed
        ) {
            retry_cascade(state, &transaction).await?;
        }
    } else if let Resolution::Deferred = resolve(state, &transaction, Utc::now()).await? {
        tracing::info!(order_id = %order_id, "gateway has no record yet; intent kept");
    }

    summary(state, order_id).await
}

/// Cancel an open charge at the gateway and apply the resulting status.
pub async fn cancel_transaction(
    state: &AppState,
    principal: &Principal,
    order_id: &str,
) -> Result<TransactionSummary, AppError> {
    let transaction = guard(state, principal, order_id).await?;

    if transaction.transaction_status.is_terminal() {
        return Err(AppError::InvalidRequest(format!(
            "transaction is already {}",
            transaction.transaction_status
        )));
    }

    match state.gateway.cancel_charge(order_id).await {
        Ok(update) => {
            apply_update(state, &update).await?;
        }
        // The gateway never saw a payment channel chosen: close locally
        Err(e) if e.is_not_found() => {
            if transaction.transaction_status == TransactionStatus::Initiating {
                abandon(state, &transaction, "cancelled before the gateway saw the charge").await?;
            } else {
                let update = local_status(&transaction, "cancel", TransactionStatus::Cancelled);
                apply_update(state, &update).await?;
            }
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(order_id = %order_id, user_id = %principal.user_id, "transaction cancelled");
    summary(state, order_id).await
}

/// Request a full or partial refund of a settled transaction.
///
/// The refund is recorded as a history row; the transaction stays `settled`
/// and its billing lines stay paid.
pub async fn refund_transaction(
    state: &AppState,
    principal: &Principal,
    order_id: &str,
    request: RefundRequest,
) -> Result<RefundResponse, AppError> {
    let transaction = guard(state, principal, order_id).await?;

    if transaction.transaction_status != TransactionStatus::Settled {
        return Err(AppError::InvalidRequest(
            "only settled transactions can be refunded".to_string(),
        ));
    }
    if request.amount <= 0 || request.amount > transaction.total_amount {
        return Err(AppError::InvalidRequest(format!(
            "refund amount must be between 1 and {}",
            transaction.total_amount
        )));
    }
    let reason = request.reason.trim();
    if reason.is_empty() {
        return Err(AppError::InvalidRequest(
            "refund reason is required".to_string(),
        ));
    }

    let receipt = state
        .gateway
        .refund_charge(order_id, request.amount, reason)
        .await?;

    state
        .repo
        .append_history(&NewHistoryEntry {
            transaction_billing_id: transaction.id,
            reference_number: Some(receipt.refund_key.clone()),
            order_id: transaction.order_id.clone(),
            invoice_number: transaction.invoice_number.clone(),
            transaction_status: "refund_requested".to_string(),
            is_anomaly: false,
            note: Some(format!("{} refunded by {}: {}", request.amount, principal.user_id, reason)),
        })
        .await?;

    tracing::info!(
        order_id = %order_id,
        amount = request.amount,
        refund_key = %receipt.refund_key,
        "refund requested"
    );

    Ok(RefundResponse {
        order_id: transaction.order_id,
        refund_key: receipt.refund_key,
        amount: request.amount,
        message: receipt.message,
    })
}

/// Run one sweep on behalf of an operator.
pub async fn sweep_now(state: &AppState, principal: &Principal) -> Result<SweepReport, AppError> {
    authorize_platform(principal, Capability::ReconcilePayments)?;
    run_sweep(state).await
}

/// Resolve stale intents, expired pending charges and unfinished cascades.
///
/// Per-order failures are logged and counted; only listing failures abort.
pub async fn run_sweep(state: &AppState) -> Result<SweepReport, AppError> {
    let now = Utc::now();
    let stale_before = now - Duration::minutes(state.settings.stale_intent_minutes);
    let mut report = SweepReport::default();

    let stale = state
        .repo
        .list_stale_transactions(stale_before, now, SWEEP_BATCH)
        .await?;

    for transaction in &stale {
        report.examined += 1;
        match resolve(state, transaction, now).await {
            Ok(Resolution::Reported(ApplyOutcome::Applied { .. })) => report.applied += 1,
            Ok(Resolution::Abandoned) => report.abandoned += 1,
            Ok(Resolution::Deferred) => report.deferred += 1,
            Ok(Resolution::Reported(_)) => {}
            Err(e) => {
                report.errors += 1;
                tracing::warn!(order_id = %transaction.order_id, error = %e, "reconciliation failed");
            }
        }
    }

    let unfinished = state.repo.list_unfinished_cascades(SWEEP_BATCH).await?;
    for transaction in &unfinished {
        report.cascades_retried += 1;
        match retry_cascade(state, transaction).await {
            Ok(true) => report.cascades_completed += 1,
            Ok(false) => {}
            Err(e) => {
                report.errors += 1;
                tracing::warn!(order_id = %transaction.order_id, error = %e, "cascade retry failed");
            }
        }
    }

    Ok(report)
}

/// Run `run_sweep` every `every` until the runtime shuts down.
pub fn spawn_sweeper(state: AppState, every: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            match run_sweep(&state).await {
                Ok(report) if report.examined > 0 || report.cascades_retried > 0 => {
                    tracing::info!(
                        examined = report.examined,
                        applied = report.applied,
                        abandoned = report.abandoned,
                        deferred = report.deferred,
                        cascades_retried = report.cascades_retried,
                        cascades_completed = report.cascades_completed,
                        errors = report.errors,
                        "reconciliation sweep finished"
                    );
                }
                Ok(_) => tracing::debug!("reconciliation sweep found nothing to do"),
                Err(e) => tracing::error!(error = %e, "reconciliation sweep aborted"),
            }
        }
    })
}

async fn guard(
    state: &AppState,
    principal: &Principal,
    order_id: &str,
) -> Result<TransactionBilling, AppError> {
    let transaction = state
        .repo
        .find_transaction(order_id)
        .await?
        .ok_or(AppError::NotFound("Transaction"))?;

    let student = state
        .repo
        .find_student(transaction.student_id)
        .await?
        .ok_or(AppError::NotFound("Student"))?;
    authorize(principal, Capability::ReconcilePayments, student.school_id)?;

    Ok(transaction)
}

async fn summary(state: &AppState, order_id: &str) -> Result<TransactionSummary, AppError> {
    let transaction = state
        .repo
        .find_transaction(order_id)
        .await?
        .ok_or(AppError::NotFound("Transaction"))?;
    let detail = state.repo.find_detail(transaction.id).await?;

    Ok(TransactionSummary::new(&transaction, detail.as_ref()))
}

async fn resolve(
    state: &AppState,
    transaction: &TransactionBilling,
    now: DateTime<Utc>,
) -> Result<Resolution, AppError> {
    match state.gateway.query_status(&transaction.order_id).await {
        Ok(update) => Ok(Resolution::Reported(apply_update(state, &update).await?)),
        // A hosted charge has no status record until the payer picks a
        // channel, so "not found" is only final once the charge has lapsed
        Err(e) if e.is_not_found() => {
            if !charge_lapsed(state, transaction, now) {
                return Ok(Resolution::Deferred);
            }
            match transaction.transaction_status {
                TransactionStatus::Initiating => {
                    abandon(state, transaction, "gateway has no record of the charge").await?;
                    Ok(Resolution::Abandoned)
                }
                TransactionStatus::Pending => {
                    let update = local_status(transaction, "expire", TransactionStatus::Expired);
                    Ok(Resolution::Reported(apply_update(state, &update).await?))
                }
                _ => Ok(Resolution::Deferred),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Whether the payer can no longer complete the charge.
///
/// Rows without an expiry fall back to the stale-intent age.
fn charge_lapsed(state: &AppState, transaction: &TransactionBilling, now: DateTime<Utc>) -> bool {
    match transaction.expiry_time {
        Some(expiry) => expiry < now,
        None => transaction.created_at < now - Duration::minutes(state.settings.stale_intent_minutes),
    }
}

async fn abandon(
    state: &AppState,
    transaction: &TransactionBilling,
    reason: &str,
) -> Result<(), AppError> {
    state.repo.fail_intent(&transaction.order_id, reason).await?;
    tracing::info!(order_id = %transaction.order_id, reason, "intent closed");
    Ok(())
}

/// Status report synthesized when the gateway has no record to report from.
fn local_status(
    transaction: &TransactionBilling,
    gateway_status: &str,
    status: TransactionStatus,
) -> StatusUpdate {
    StatusUpdate {
        order_id: transaction.order_id.clone(),
        reference_number: None,
        gateway_status: gateway_status.to_string(),
        status: Some(status),
        gross_amount: None,
        payment_type: None,
        settlement_time: None,
        va_number: None,
        biller_code: None,
        bill_key: None,
        source: UpdateSource::Reconciliation,
    }
}

async fn retry_cascade(state: &AppState, transaction: &TransactionBilling) -> Result<bool, AppError> {
    let detail = state.repo.find_detail(transaction.id).await?;
    let paid_at = detail
        .and_then(|d| d.settlement_time)
        .unwrap_or(transaction.updated_at);

    Ok(run_cascade(state, transaction, paid_at).await)
}
