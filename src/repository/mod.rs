//! Storage boundary for the payment engine.
//!
//! Every multi-row invariant (invoice allocation with intent insert, status
//! write with its history row, the all-or-nothing settlement cascade) is one
//! method here so that implementations can wrap it in a single local
//! transaction.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::gateway::GatewayAuditLog;
use crate::models::billing::{Billing, BillingStudent, Student};
use crate::models::gateway_log::GatewayLog;
use crate::models::invoice::{InvoiceFormat, InvoiceScope, NewInvoiceFormat};
use crate::models::payment_method::PaymentMethod;
use crate::models::principal::Principal;
use crate::models::transaction::{
    ApplyOutcome, NewHistoryEntry, NewTransactionIntent, StatusUpdate, TransactionBilling,
    TransactionBillingDetail, TransactionBillingHistory,
};

#[async_trait]
pub trait PaymentRepository: GatewayAuditLog + Send + Sync {
    async fn ping(&self) -> Result<(), AppError>;

    /// Resolve an active access token by its SHA-256 hex digest.
    async fn find_principal(&self, token_hash: &str) -> Result<Option<Principal>, AppError>;

    async fn find_student(&self, student_id: Uuid) -> Result<Option<Student>, AppError>;

    async fn find_billing(&self, billing_id: Uuid) -> Result<Option<Billing>, AppError>;

    /// Rows for the ids that exist; missing ids are simply absent.
    async fn find_billing_students(&self, ids: &[Uuid]) -> Result<Vec<BillingStudent>, AppError>;

    async fn find_payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>, AppError>;

    async fn find_invoice_format(&self, school_id: Uuid) -> Result<Option<InvoiceFormat>, AppError>;

    /// Create-or-replace the single format row of a school.
    async fn upsert_invoice_format(&self, format: NewInvoiceFormat) -> Result<InvoiceFormat, AppError>;

    async fn find_transaction(&self, order_id: &str) -> Result<Option<TransactionBilling>, AppError>;

    async fn find_detail(
        &self,
        transaction_billing_id: Uuid,
    ) -> Result<Option<TransactionBillingDetail>, AppError>;

    async fn list_history(
        &self,
        transaction_billing_id: Uuid,
    ) -> Result<Vec<TransactionBillingHistory>, AppError>;

    async fn list_gateway_logs(&self, order_id: &str) -> Result<Vec<GatewayLog>, AppError>;

    /// Allocate the next invoice number in `scope` and persist an `initiating`
    /// transaction with its detail and first history row, moving the selected
    /// billing-student lines from `unpaid` to `pending`. All or nothing.
    ///
    /// Fails with `InvalidBillingSelection` when a line is no longer unpaid.
    /// Fails with `InvoiceNumberConflict` when the school already issued the
    /// number, e.g. after its counter row fell behind; the number is then
    /// consumed, so a retry allocates the next one.
    async fn create_intent(
        &self,
        scope: &InvoiceScope,
        intent: &NewTransactionIntent,
    ) -> Result<TransactionBilling, AppError>;

    /// `initiating -> pending` once the gateway has opened the charge.
    async fn finalize_intent(
        &self,
        order_id: &str,
        token: &str,
        redirect_url: &str,
    ) -> Result<TransactionBilling, AppError>;

    /// `initiating -> failed`, returning pending lines to `unpaid`.
    async fn fail_intent(&self, order_id: &str, reason: &str) -> Result<TransactionBilling, AppError>;

    /// Apply a gateway status report under a per-order lock.
    ///
    /// Fails with `UnknownTransaction` when no row has `update.order_id`.
    async fn apply_status(&self, update: &StatusUpdate) -> Result<ApplyOutcome, AppError>;

    /// Mark every referenced line paid and the cascade done, or change nothing.
    ///
    /// Fails with `CascadeIncomplete` when any line is missing, deleted,
    /// foreign or already paid.
    async fn settle_billing_students(
        &self,
        transaction: &TransactionBilling,
        paid_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Set `cascade_status = failed` and append an anomaly history row.
    async fn flag_cascade_failure(
        &self,
        transaction: &TransactionBilling,
        reason: &str,
    ) -> Result<(), AppError>;

    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<(), AppError>;

    /// Intents still `initiating` from before `created_before`, and `pending`
    /// transactions whose expiry passed before `now`.
    async fn list_stale_transactions(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionBilling>, AppError>;

    /// Settled transactions whose cascade is `pending` or `failed`.
    async fn list_unfinished_cascades(&self, limit: i64) -> Result<Vec<TransactionBilling>, AppError>;
}
