//! Payment attempt models and API request/response types.
//!
//! This module defines:
//! - `TransactionBilling`: one payment attempt against the gateway
//! - `TransactionBillingDetail`: the charge composition of an attempt
//! - `TransactionBillingHistory`: the append-only status ledger
//! - The status state machine shared by webhooks and reconciliation
//! - Request and response bodies for the transaction endpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::UnknownVariant;
use super::gateway_log::GatewayLog;
use super::payment_method::PaymentMethodKind;

/// Status of a payment attempt.
///
/// `initiating` is local only: the intent row exists but the gateway has not
/// yet confirmed the charge. Everything after `pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Initiating,
    Pending,
    Settled,
    Expired,
    Cancelled,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Initiating => "initiating",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Settled => "settled",
            TransactionStatus::Expired => "expired",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Settled
                | TransactionStatus::Expired
                | TransactionStatus::Cancelled
                | TransactionStatus::Failed
        )
    }

    /// Translate the gateway's `transaction_status` vocabulary.
    ///
    /// Card captures are only settled when the fraud check accepted them.
    /// Refund statuses and anything unknown have no internal counterpart and
    /// return `None`.
    pub fn from_gateway(status: &str, fraud_status: Option<&str>) -> Option<Self> {
        match status {
            "settlement" => Some(TransactionStatus::Settled),
            "capture" => match fraud_status {
                Some("challenge") => Some(TransactionStatus::Pending),
                Some("deny") => Some(TransactionStatus::Failed),
                _ => Some(TransactionStatus::Settled),
            },
            "pending" | "authorize" => Some(TransactionStatus::Pending),
            "deny" | "failure" => Some(TransactionStatus::Failed),
            "cancel" => Some(TransactionStatus::Cancelled),
            "expire" => Some(TransactionStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for TransactionStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "initiating" => Ok(TransactionStatus::Initiating),
            "pending" => Ok(TransactionStatus::Pending),
            "settled" => Ok(TransactionStatus::Settled),
            "expired" => Ok(TransactionStatus::Expired),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            "failed" => Ok(TransactionStatus::Failed),
            _ => Err(UnknownVariant::new("transaction_status", value)),
        }
    }
}

/// What a status report does to a stored transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Write the new status
    Apply(TransactionStatus),
    /// Same non-terminal status; only refresh echoed payment details
    Refresh,
    /// Same terminal status delivered again; nothing to do
    Replay,
    /// Conflicts with a terminal status or has no internal meaning; record, never apply
    Anomaly,
}

/// State machine for `pending -> {settled | expired | cancelled | failed}`.
pub fn decide_transition(
    current: TransactionStatus,
    incoming: Option<TransactionStatus>,
) -> Transition {
    match incoming {
        None => Transition::Anomaly,
        Some(incoming) if current.is_terminal() => {
            if incoming == current {
                Transition::Replay
            } else {
                Transition::Anomaly
            }
        }
        Some(TransactionStatus::Pending) if current == TransactionStatus::Pending => {
            Transition::Refresh
        }
        Some(incoming) => Transition::Apply(incoming),
    }
}

/// Progress of the billing-student cascade that follows settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStatus {
    /// Donations and unsettled attempts
    NotRequired,
    /// Settled, cascade not yet committed
    Pending,
    Done,
    /// Cascade rolled back; needs follow-up
    Failed,
}

impl CascadeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CascadeStatus::NotRequired => "not_required",
            CascadeStatus::Pending => "pending",
            CascadeStatus::Done => "done",
            CascadeStatus::Failed => "failed",
        }
    }
}

impl TryFrom<String> for CascadeStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "not_required" => Ok(CascadeStatus::NotRequired),
            "pending" => Ok(CascadeStatus::Pending),
            "done" => Ok(CascadeStatus::Done),
            "failed" => Ok(CascadeStatus::Failed),
            _ => Err(UnknownVariant::new("cascade_status", value)),
        }
    }
}

/// Billing-student references of a transaction, stored comma-joined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BillingStudentIds(pub Vec<Uuid>);

impl BillingStudentIds {
    pub fn to_column(&self) -> String {
        self.0
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl TryFrom<String> for BillingStudentIds {
    type Error = uuid::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Uuid::parse_str)
            .collect::<Result<Vec<_>, _>>()
            .map(BillingStudentIds)
    }
}

/// Represents a row of the `transaction_billings` table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TransactionBilling {
    pub id: Uuid,

    /// Owner of the invoice number sequence
    pub school_id: Uuid,
    pub student_id: Uuid,

    /// Donation billing paid against; `None` for itemized payments
    pub billing_id: Option<Uuid>,

    /// Payer-side idempotency key sent to the gateway
    pub order_id: String,
    pub invoice_number: String,

    /// Amount charged at the gateway, admin fee included
    pub total_amount: i64,

    #[sqlx(try_from = "String")]
    pub transaction_status: TransactionStatus,

    #[sqlx(try_from = "String")]
    pub billing_student_ids: BillingStudentIds,

    pub is_donation: bool,

    /// Virtual account number echoed by the gateway
    pub account_number: Option<String>,
    pub snap_token: Option<String>,
    pub redirect_url: Option<String>,
    pub expiry_time: Option<DateTime<Utc>>,

    #[sqlx(try_from = "String")]
    pub cascade_status: CascadeStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Represents a row of the `transaction_billing_details` table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TransactionBillingDetail {
    pub id: Uuid,
    pub transaction_billing_id: Uuid,
    pub payment_method_id: Uuid,
    pub payment_method_type: String,
    pub bank_code: Option<String>,

    /// Selected total minus discount
    pub gross_amount: i64,
    pub discount: i64,
    pub admin_fee: i64,
    pub change_amount: i64,
    pub is_donation: bool,

    /// Gateway payment type reported on notification, e.g. "bank_transfer"
    pub payment_type: Option<String>,
    pub va_number: Option<String>,
    pub biller_code: Option<String>,
    pub bill_key: Option<String>,
    pub settlement_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Represents a row of the append-only `transaction_billing_histories` table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TransactionBillingHistory {
    pub id: Uuid,
    pub transaction_billing_id: Uuid,

    /// Gateway-side transaction id, when known
    pub reference_number: Option<String>,
    pub order_id: String,
    pub invoice_number: String,

    /// Internal status, or the raw gateway status for unmapped reports
    pub transaction_status: String,

    pub is_anomaly: bool,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// History row written outside a status transition (refund requests, notes).
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub transaction_billing_id: Uuid,
    pub reference_number: Option<String>,
    pub order_id: String,
    pub invoice_number: String,
    pub transaction_status: String,
    pub is_anomaly: bool,
    pub note: Option<String>,
}

/// Everything persisted for a new payment attempt before the gateway is called.
#[derive(Debug, Clone)]
pub struct NewTransactionIntent {
    pub student_id: Uuid,
    pub billing_id: Option<Uuid>,
    pub order_id: String,
    pub billing_student_ids: BillingStudentIds,
    pub is_donation: bool,
    pub payment_method_id: Uuid,
    pub payment_method_type: PaymentMethodKind,
    pub bank_code: Option<String>,
    pub gross_amount: i64,
    pub discount: i64,
    pub admin_fee: i64,
    pub change_amount: i64,
    pub total_amount: i64,
    pub expiry_time: DateTime<Utc>,
}

/// Where a status report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Webhook,
    Reconciliation,
}

impl UpdateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSource::Webhook => "webhook",
            UpdateSource::Reconciliation => "reconciliation",
        }
    }
}

/// A gateway status report in internal terms, from a webhook or a status query.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub order_id: String,
    pub reference_number: Option<String>,

    /// Status as the gateway spelled it
    pub gateway_status: String,

    /// Internal status, `None` when the gateway status has no mapping
    pub status: Option<TransactionStatus>,

    pub gross_amount: Option<i64>,
    pub payment_type: Option<String>,
    pub settlement_time: Option<DateTime<Utc>>,
    pub va_number: Option<String>,
    pub biller_code: Option<String>,
    pub bill_key: Option<String>,
    pub source: UpdateSource,
}

/// Result of applying a `StatusUpdate` under the per-order lock.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    Applied {
        transaction: TransactionBilling,
        previous: TransactionStatus,
    },
    Refreshed(TransactionBilling),
    Replayed(TransactionBilling),
    Anomaly(TransactionBilling),
}

impl ApplyOutcome {
    pub fn transaction(&self) -> &TransactionBilling {
        match self {
            ApplyOutcome::Applied { transaction, .. } => transaction,
            ApplyOutcome::Refreshed(transaction)
            | ApplyOutcome::Replayed(transaction)
            | ApplyOutcome::Anomaly(transaction) => transaction,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied { .. } => "applied",
            ApplyOutcome::Refreshed(_) => "refreshed",
            ApplyOutcome::Replayed(_) => "replayed",
            ApplyOutcome::Anomaly(_) => "anomaly",
        }
    }
}

/// How `discount` in a create request is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// Discount is an amount in the smallest currency unit
    #[default]
    Nominal,
    /// Discount is a whole percentage of the selected total
    Percentage,
}

/// Request to pay a set of billing-student lines.
///
/// # JSON Example
///
/// ```json
/// {
///   "studentId": "550e8400-e29b-41d4-a716-446655440000",
///   "billingStudentIds": ["660e8400-e29b-41d4-a716-446655440001"],
///   "paymentMethodId": "770e8400-e29b-41d4-a716-446655440002",
///   "amount": 80000,
///   "discount": 0,
///   "discountType": "nominal",
///   "changeAmount": 0,
///   "orderId": "ORD-20240309-0001"
/// }
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub student_id: Uuid,
    pub billing_student_ids: Vec<Uuid>,
    pub payment_method_id: Uuid,

    /// Client-side total of the selected lines; must match when present
    pub amount: Option<i64>,

    #[serde(default)]
    pub discount: i64,

    #[serde(default)]
    pub discount_type: DiscountType,

    #[serde(default)]
    pub change_amount: i64,

    /// Reuse to retry the same logical payment idempotently
    pub order_id: Option<String>,
}

/// Request to make a free-form donation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDonationRequest {
    pub student_id: Uuid,
    pub billing_id: Uuid,
    pub amount: i64,
    pub payment_method_id: Uuid,
    pub order_id: Option<String>,
}

/// Response for transaction and donation creation.
///
/// ```json
/// {
///   "orderId": "ORD-20240309-a1b2c3d4",
///   "invoiceNumber": "INV032400001",
///   "redirectUrl": "https://app.sandbox.midtrans.com/snap/v2/vtweb/...",
///   "token": "66e4fa55-...",
///   "grossAmount": 80000,
///   "adminFee": 4000,
///   "totalAmount": 84000,
///   "status": "pending"
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub order_id: String,
    pub invoice_number: String,
    pub redirect_url: Option<String>,
    pub token: Option<String>,
    pub gross_amount: i64,
    pub admin_fee: i64,
    pub total_amount: i64,
    pub status: TransactionStatus,
    pub expiry_time: Option<DateTime<Utc>>,
}

impl TransactionSummary {
    pub fn new(transaction: &TransactionBilling, detail: Option<&TransactionBillingDetail>) -> Self {
        Self {
            order_id: transaction.order_id.clone(),
            invoice_number: transaction.invoice_number.clone(),
            redirect_url: transaction.redirect_url.clone(),
            token: transaction.snap_token.clone(),
            gross_amount: detail
                .map(|d| d.gross_amount)
                .unwrap_or(transaction.total_amount),
            admin_fee: detail.map(|d| d.admin_fee).unwrap_or_default(),
            total_amount: transaction.total_amount,
            status: transaction.transaction_status,
            expiry_time: transaction.expiry_time,
        }
    }
}

/// Full view of one attempt for `GET /api/v1/transactions/{order_id}`.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub transaction: TransactionBilling,
    pub detail: Option<TransactionBillingDetail>,
    pub history: Vec<TransactionBillingHistory>,

    /// Raw gateway exchanges; only filled for school staff
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gateway_logs: Vec<GatewayLog>,
}

/// Request body for the internal refund operation.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount: i64,
    pub reason: String,
}

/// Gateway acknowledgement of a refund request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub order_id: String,
    pub refund_key: String,
    pub amount: i64,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::*;

    #[test]
    fn pending_moves_to_any_terminal_status() {
        for terminal in [Settled, Expired, Cancelled, Failed] {
            assert_eq!(
                decide_transition(Pending, Some(terminal)),
                Transition::Apply(terminal)
            );
        }
    }

    #[test]
    fn initiating_accepts_gateway_pending() {
        assert_eq!(
            decide_transition(Initiating, Some(Pending)),
            Transition::Apply(Pending)
        );
        assert_eq!(decide_transition(Pending, Some(Pending)), Transition::Refresh);
    }

    #[test]
    fn terminal_status_is_never_left() {
        assert_eq!(decide_transition(Settled, Some(Settled)), Transition::Replay);
        assert_eq!(decide_transition(Settled, Some(Expired)), Transition::Anomaly);
        assert_eq!(decide_transition(Expired, Some(Pending)), Transition::Anomaly);
        assert_eq!(decide_transition(Failed, None), Transition::Anomaly);
    }

    #[test]
    fn unmapped_gateway_status_is_an_anomaly() {
        assert_eq!(decide_transition(Pending, None), Transition::Anomaly);
    }

    #[test]
    fn gateway_vocabulary_maps_to_internal_status() {
        assert_eq!(TransactionStatus::from_gateway("settlement", None), Some(Settled));
        assert_eq!(TransactionStatus::from_gateway("capture", Some("accept")), Some(Settled));
        assert_eq!(TransactionStatus::from_gateway("capture", Some("challenge")), Some(Pending));
        assert_eq!(TransactionStatus::from_gateway("deny", None), Some(Failed));
        assert_eq!(TransactionStatus::from_gateway("expire", None), Some(Expired));
        assert_eq!(TransactionStatus::from_gateway("cancel", None), Some(Cancelled));
        assert_eq!(TransactionStatus::from_gateway("refund", None), None);
    }

    #[test]
    fn billing_student_ids_round_trip_through_column() {
        let ids = BillingStudentIds(vec![Uuid::new_v4(), Uuid::new_v4()]);
        let parsed = BillingStudentIds::try_from(ids.to_column()).unwrap();
        assert_eq!(parsed, ids);
        assert_eq!(BillingStudentIds::try_from(String::new()).unwrap().0.len(), 0);
        assert!(BillingStudentIds::try_from("not-a-uuid".to_string()).is_err());
    }
}
