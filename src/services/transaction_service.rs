//! Transaction orchestrator - opens payment attempts for fees and donations.
//!
//! This service handles:
//! - Billing selection validation and discount arithmetic
//! - Fee calculation and invoice allocation
//! - Idempotent retries by `orderId`
//! - The intent-then-charge sequence against the gateway
//!
//! # Atomicity Guarantees
//!
//! The intent row, its detail and history, the invoice number and the move of
//! selected lines to `pending` commit together before the gateway is called.
//! A gateway outcome is then written in a second local transaction; if that
//! write fails the reconciliation sweeper resolves the intent.

use chrono::{Duration, Utc};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashSet;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::AppError;
use crate::gateway::ChargeRequest;
use crate::middleware::auth::authorize;
use crate::models::billing::{PaymentStatus, Student};
use crate::models::payment_method::PaymentMethod;
use crate::models::principal::{Capability, Principal};
use crate::models::transaction::{
    BillingStudentIds, CreateDonationRequest, CreateTransactionRequest, DiscountType,
    NewTransactionIntent, TransactionBilling, TransactionStatus, TransactionSummary,
    TransactionView,
};
use crate::services::webhook_service::apply_update;
use crate::services::{fee_service, invoice_service};

/// Attempts at allocating an invoice number before giving up.
const MAX_INVOICE_ATTEMPTS: usize = 3;

const MAX_ORDER_ID_LEN: usize = 50;

/// Everything needed to open one attempt, shared by fees and donations.
struct Attempt {
    student: Student,
    method: PaymentMethod,
    billing_id: Option<Uuid>,
    billing_student_ids: BillingStudentIds,
    is_donation: bool,
    order_id: String,
    item_name: String,
    gross_amount: i64,
    discount: i64,
    change_amount: i64,
}

/// Pay a set of billing-student lines.
///
/// # Process
///
/// 1. Resolve the student and check the caller's capability
/// 2. Return the existing attempt when `orderId` is already known
/// 3. Validate the selected lines and compute `sum - discount`
/// 4. Calculate the admin fee
/// 5. Commit the intent with its invoice number, then open the charge
///
/// # Errors
///
/// - `InvalidBillingSelection`: unknown, foreign, deleted, duplicate, paid lines,
///   or lines another open attempt still holds
/// - `InvalidRequest`: amount mismatch, discount out of range, bad `orderId`
/// - `UnsupportedPaymentMethod` / `InvalidFeeConfiguration`: fee calculation
/// - `InvoiceFormatNotConfigured` / `SequenceParse`: invoice numbering
/// - `Gateway`: the charge could not be opened
pub async fn create_transaction(
    state: &AppState,
    principal: &Principal,
    request: CreateTransactionRequest,
) -> Result<TransactionSummary, AppError> {
    let student = find_active_student(state, request.student_id).await?;
    authorize(principal, Capability::CreateTransaction, student.school_id)?;

    if let Some(summary) = existing_attempt(state, &student, request.order_id.as_deref()).await? {
        return Ok(summary);
    }

    if request.billing_student_ids.is_empty() {
        return Err(AppError::InvalidBillingSelection(
            "no billing lines selected".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    if let Some(duplicate) = request
        .billing_student_ids
        .iter()
        .find(|id| !seen.insert(**id))
    {
        return Err(AppError::InvalidBillingSelection(format!(
            "line {} selected twice",
            duplicate
        )));
    }

    let lines = state
        .repo
        .find_billing_students(&request.billing_student_ids)
        .await?;

    for id in &request.billing_student_ids {
        let line = lines
            .iter()
            .find(|line| line.id == *id)
            .ok_or_else(|| AppError::InvalidBillingSelection(format!("line {} not found", id)))?;

        if line.student_id != student.id {
            return Err(AppError::InvalidBillingSelection(format!(
                "line {} belongs to another student",
                id
            )));
        }
        if line.is_deleted() {
            return Err(AppError::InvalidBillingSelection(format!(
                "line {} was removed",
                id
            )));
        }
        match line.payment_status {
            PaymentStatus::Unpaid => {}
            PaymentStatus::Pending => {
                return Err(AppError::InvalidBillingSelection(format!(
                    "line {} is held by another open payment",
                    id
                )));
            }
            PaymentStatus::Paid => {
                return Err(AppError::InvalidBillingSelection(format!(
                    "line {} is already paid",
                    id
                )));
            }
        }
    }

    let selected_sum = lines
        .iter()
        .try_fold(0i64, |acc, line| acc.checked_add(line.amount))
        .ok_or_else(|| AppError::InvalidRequest("Selected amount overflows".to_string()))?;

    if let Some(amount) = request.amount {
        if amount != selected_sum {
            return Err(AppError::InvalidRequest(format!(
                "amount {} does not match selected total {}",
                amount, selected_sum
            )));
        }
    }

    let discount = resolve_discount(selected_sum, request.discount, request.discount_type)?;
    if request.change_amount < 0 {
        return Err(AppError::InvalidRequest(
            "changeAmount must not be negative".to_string(),
        ));
    }

    let method = find_method(state, request.payment_method_id).await?;
    let order_id = match request.order_id {
        Some(order_id) => order_id,
        None => generate_order_id(),
    };

    let item_name = lines
        .iter()
        .map(|line| line.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    open_attempt(
        state,
        Attempt {
            student,
            method,
            billing_id: None,
            billing_student_ids: BillingStudentIds(request.billing_student_ids),
            is_donation: false,
            order_id,
            item_name,
            gross_amount: selected_sum - discount,
            discount,
            change_amount: request.change_amount,
        },
    )
    .await
}

/// Make a free-form donation against a donation billing of the student's school.
pub async fn create_donation(
    state: &AppState,
    principal: &Principal,
    request: CreateDonationRequest,
) -> Result<TransactionSummary, AppError> {
    let student = find_active_student(state, request.student_id).await?;
    authorize(principal, Capability::CreateDonation, student.school_id)?;

    if let Some(summary) = existing_attempt(state, &student, request.order_id.as_deref()).await? {
        return Ok(summary);
    }

    let billing = state
        .repo
        .find_billing(request.billing_id)
        .await?
        .filter(|billing| billing.is_donation && billing.school_id == student.school_id)
        .ok_or_else(|| {
            AppError::InvalidBillingSelection(format!(
                "billing {} is not a donation of this school",
                request.billing_id
            ))
        })?;

    if request.amount <= 0 {
        return Err(AppError::InvalidRequest(
            "Amount must be positive".to_string(),
        ));
    }

    let method = find_method(state, request.payment_method_id).await?;
    let order_id = match request.order_id {
        Some(order_id) => order_id,
        None => generate_order_id(),
    };

    open_attempt(
        state,
        Attempt {
            student,
            method,
            billing_id: Some(billing.id),
            billing_student_ids: BillingStudentIds::default(),
            is_donation: true,
            order_id,
            item_name: billing.name,
            gross_amount: request.amount,
            discount: 0,
            change_amount: 0,
        },
    )
    .await
}

/// Transaction with its detail and full history.
///
/// Staff who may reconcile the school's payments also get the gateway log.
pub async fn get_transaction(
    state: &AppState,
    principal: &Principal,
    order_id: &str,
) -> Result<TransactionView, AppError> {
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
    authorize(principal, Capability::ViewTransaction, student.school_id)?;

    let detail = state.repo.find_detail(transaction.id).await?;
    let history = state.repo.list_history(transaction.id).await?;
    let gateway_logs = if principal.allows(Capability::ReconcilePayments, student.school_id) {
        state.repo.list_gateway_logs(order_id).await?
    } else {
        Vec::new()
    };

    Ok(TransactionView {
        transaction,
        detail,
        history,
        gateway_logs,
    })
}

async fn find_active_student(state: &AppState, student_id: Uuid) -> Result<Student, AppError> {
    state
        .repo
        .find_student(student_id)
        .await?
        .filter(|student| student.deleted_at.is_none())
        .ok_or(AppError::NotFound("Student"))
}

async fn find_method(state: &AppState, payment_method_id: Uuid) -> Result<PaymentMethod, AppError> {
    state
        .repo
        .find_payment_method(payment_method_id)
        .await?
        .ok_or_else(|| {
            AppError::UnsupportedPaymentMethod(format!("{} does not exist", payment_method_id))
        })
}

/// Idempotent retry: a known `orderId` returns its attempt instead of a new one.
///
/// An intent still `initiating` never got a charge confirmed. The gateway is
/// asked first; only when it has no record is the charge issued again under
/// the same `orderId`.
async fn existing_attempt(
    state: &AppState,
    student: &Student,
    order_id: Option<&str>,
) -> Result<Option<TransactionSummary>, AppError> {
    let Some(order_id) = order_id else {
        return Ok(None);
    };
    validate_order_id(order_id)?;

    let Some(existing) = state.repo.find_transaction(order_id).await? else {
        return Ok(None);
    };

    if existing.student_id != student.id {
        return Err(AppError::InvalidRequest(format!(
            "orderId {} is already in use",
            order_id
        )));
    }

    let detail = state.repo.find_detail(existing.id).await?;

    if existing.transaction_status != TransactionStatus::Initiating {
        tracing::info!(order_id = %order_id, status = %existing.transaction_status, "returning existing attempt");
        return Ok(Some(TransactionSummary::new(&existing, detail.as_ref())));
    }

    let detail = detail.ok_or_else(|| {
        AppError::Internal(format!("intent {} has no detail row", order_id))
    })?;

    match state.gateway.query_status(order_id).await {
        Ok(update) => {
            let outcome = apply_update(state, &update).await?;
            tracing::info!(
                order_id = %order_id,
                status = %outcome.transaction().transaction_status,
                "initiating intent resolved from gateway status"
            );
            return Ok(Some(TransactionSummary::new(
                outcome.transaction(),
                Some(&detail),
            )));
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let method = find_method(state, detail.payment_method_id).await?;

    tracing::info!(order_id = %order_id, "resuming initiating intent");

    let summary = charge_intent(
        state,
        existing,
        &method,
        &student.name,
        &format!("Payment {}", order_id),
        detail.gross_amount,
        detail.admin_fee,
    )
    .await?;

    Ok(Some(summary))
}

async fn open_attempt(state: &AppState, attempt: Attempt) -> Result<TransactionSummary, AppError> {
    validate_order_id(&attempt.order_id)?;

    let fee = fee_service::calculate(&attempt.method, attempt.gross_amount)?;
    let kind = attempt
        .method
        .kind()
        .map_err(|e| AppError::UnsupportedPaymentMethod(e.to_string()))?;

    let now = Utc::now();
    let intent = NewTransactionIntent {
        student_id: attempt.student.id,
        billing_id: attempt.billing_id,
        order_id: attempt.order_id.clone(),
        billing_student_ids: attempt.billing_student_ids,
        is_donation: attempt.is_donation,
        payment_method_id: attempt.method.id,
        payment_method_type: kind,
        bank_code: attempt.method.bank_code.clone(),
        gross_amount: fee.gross_amount,
        discount: attempt.discount,
        admin_fee: fee.admin_fee,
        change_amount: attempt.change_amount,
        total_amount: fee.total_amount,
        expiry_time: now + Duration::minutes(state.settings.charge_expiry_minutes),
    };

    let mut attempt_no = 0;
    let transaction = loop {
        attempt_no += 1;
        let scope = invoice_service::resolve_scope(
            state.repo.as_ref(),
            attempt.student.school_id,
            Utc::now(),
            state.settings.invoice_offset,
        )
        .await?;

        match state.repo.create_intent(&scope, &intent).await {
            Ok(transaction) => break transaction,
            Err(AppError::InvoiceNumberConflict(number)) if attempt_no < MAX_INVOICE_ATTEMPTS => {
                tracing::warn!(
                    order_id = %intent.order_id,
                    invoice_number = %number,
                    attempt = attempt_no,
                    "invoice number taken, retrying allocation"
                );
            }
            Err(e) => return Err(e),
        }
    };

    tracing::info!(
        order_id = %transaction.order_id,
        invoice_number = %transaction.invoice_number,
        total_amount = transaction.total_amount,
        is_donation = transaction.is_donation,
        "payment intent recorded"
    );

    charge_intent(
        state,
        transaction,
        &attempt.method,
        &attempt.student.name,
        &attempt.item_name,
        fee.gross_amount,
        fee.admin_fee,
    )
    .await
}

/// Open the gateway charge for a committed intent and record the outcome.
async fn charge_intent(
    state: &AppState,
    transaction: TransactionBilling,
    method: &PaymentMethod,
    customer_name: &str,
    item_name: &str,
    gross_amount: i64,
    admin_fee: i64,
) -> Result<TransactionSummary, AppError> {
    let charge = ChargeRequest {
        order_id: transaction.order_id.clone(),
        gross_amount: transaction.total_amount,
        method: method.clone(),
        customer_name: customer_name.to_string(),
        item_name: item_name.to_string(),
        expiry_minutes: state.settings.charge_expiry_minutes,
    };

    let summary_of = |t: &TransactionBilling| TransactionSummary {
        gross_amount,
        admin_fee,
        ..TransactionSummary::new(t, None)
    };

    match state.gateway.create_charge(&charge).await {
        Ok(opened) => {
            match state
                .repo
                .finalize_intent(&transaction.order_id, &opened.token, &opened.redirect_url)
                .await
            {
                Ok(updated) => Ok(summary_of(&updated)),
                Err(e) => {
                    tracing::error!(
                        order_id = %transaction.order_id,
                        error = %e,
                        "payment initiated, local state missing"
                    );
                    let mut summary = summary_of(&transaction);
                    summary.token = Some(opened.token);
                    summary.redirect_url = Some(opened.redirect_url);
                    summary.status = TransactionStatus::Pending;
                    Ok(summary)
                }
            }
        }
        Err(e) if e.is_ambiguous() => {
            // The charge may exist at the gateway; the sweeper settles the question
            tracing::warn!(
                order_id = %transaction.order_id,
                error = %e,
                "gateway outcome unknown, intent left initiating"
            );
            Err(e.into())
        }
        Err(e) => {
            tracing::warn!(order_id = %transaction.order_id, error = %e, "gateway refused charge");
            if let Err(fail_err) = state
                .repo
                .fail_intent(&transaction.order_id, &e.to_string())
                .await
            {
                tracing::error!(
                    order_id = %transaction.order_id,
                    error = %fail_err,
                    "failed to mark intent failed"
                );
            }
            Err(e.into())
        }
    }
}

/// Discount in currency units, validated against the selected sum.
fn resolve_discount(sum: i64, discount: i64, discount_type: DiscountType) -> Result<i64, AppError> {
    let amount = match discount_type {
        DiscountType::Nominal => discount,
        DiscountType::Percentage => {
            if !(0..=100).contains(&discount) {
                return Err(AppError::InvalidRequest(
                    "percentage discount must be between 0 and 100".to_string(),
                ));
            }
            (Decimal::from(sum) * Decimal::from(discount) / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
                .ok_or_else(|| AppError::InvalidRequest("discount overflows".to_string()))?
        }
    };

    if amount < 0 || amount >= sum {
        return Err(AppError::InvalidRequest(format!(
            "discount {} must be at least 0 and below the selected total {}",
            amount, sum
        )));
    }

    Ok(amount)
}

/// `ORD-{yyyymmdd}-{8 hex}`, dated in UTC.
fn generate_order_id() -> String {
    let suffix: u32 = rand::rng().random();
    format!("ORD-{}-{:08x}", Utc::now().format("%Y%m%d"), suffix)
}

/// Client-supplied order ids travel to the gateway verbatim.
fn validate_order_id(order_id: &str) -> Result<(), AppError> {
    let valid = !order_id.is_empty()
        && order_id.len() <= MAX_ORDER_ID_LEN
        && order_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'));

    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidRequest(format!(
            "orderId must be 1 to {} characters of letters, digits, '-', '_', '.', '~'",
            MAX_ORDER_ID_LEN
        )))
    }
}
