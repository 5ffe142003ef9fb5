//! Payer-facing settlement notices.
//!
//! Dispatch is best-effort and runs off the request path: a failed notice is
//! logged and never affects the payment state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::transaction::TransactionBilling;

/// What a payer is told once a payment settles.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementNotice {
    pub student_id: Uuid,
    pub order_id: String,
    pub invoice_number: String,
    pub total_amount: i64,
    pub is_donation: bool,
    pub settled_at: DateTime<Utc>,
}

impl SettlementNotice {
    pub fn new(transaction: &TransactionBilling, settled_at: DateTime<Utc>) -> Self {
        Self {
            student_id: transaction.student_id,
            order_id: transaction.order_id.clone(),
            invoice_number: transaction.invoice_number.clone(),
            total_amount: transaction.total_amount,
            is_donation: transaction.is_donation,
            settled_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn payment_settled(&self, notice: &SettlementNotice) -> Result<(), NotifyError>;
}

/// Writes notices to the log. Stands in until a push channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn payment_settled(&self, notice: &SettlementNotice) -> Result<(), NotifyError> {
        tracing::info!(
            order_id = %notice.order_id,
            invoice_number = %notice.invoice_number,
            student_id = %notice.student_id,
            total_amount = notice.total_amount,
            is_donation = notice.is_donation,
            "payment settled notice"
        );
        Ok(())
    }
}
