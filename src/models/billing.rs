//! Fee obligations owned by the back-office side of the platform.
//!
//! Schools, students and billings are administered elsewhere; this service
//! only reads them, and mutates `BillingStudent.payment_status` when a
//! payment attempt starts, settles or ends without settlement.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnknownVariant;

/// Payment state of one billing-student line.
///
/// Lines move `unpaid -> pending -> paid`. A line only becomes `pending` when a
/// `TransactionBilling` referencing it is created, and only becomes `paid`
/// through the settlement cascade of that transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Pending,
    Paid,
}

impl TryFrom<String> for PaymentStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            _ => Err(UnknownVariant::new("payment_status", value)),
        }
    }
}

/// A student record, read to resolve the owning school.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Student {
    pub id: Uuid,
    pub school_id: Uuid,
    pub name: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A school-defined fee template.
///
/// Donation billings have no per-student lines; parents pay a free-form amount
/// against them.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Billing {
    pub id: Uuid,
    pub school_id: Uuid,
    pub name: String,
    pub amount: i64,
    pub is_donation: bool,
    /// Settlement bank account for the school
    pub bank_account_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One student's obligation for one billing line.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct BillingStudent {
    pub id: Uuid,
    pub billing_id: Uuid,
    pub student_id: Uuid,
    pub name: String,
    pub amount: i64,
    pub due_date: Option<NaiveDate>,
    #[sqlx(try_from = "String")]
    pub payment_status: PaymentStatus,
    pub payment_date: Option<DateTime<Utc>>,
    /// Soft-delete marker; paid lines are never physically removed
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BillingStudent {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
