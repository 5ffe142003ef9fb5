//! Gateway status notification payloads.
//!
//! The gateway POSTs this body to `/api/v1/payments/notification` whenever a
//! charge changes state, and returns the same shape from its status, cancel
//! and refund endpoints.
//!
//! # Example
//!
//! ```json
//! {
//!   "transaction_time": "2024-03-09 10:15:00",
//!   "transaction_status": "settlement",
//!   "transaction_id": "9aed5972-5b6a-401e-894b-a32c91ed1a3a",
//!   "status_message": "midtrans payment notification",
//!   "status_code": "200",
//!   "signature_key": "fe5f725ea770c451017e9d6300af72b830a668d2f7d5da9b778ec2c4f9177efe5127d492d9ddfbcf6806ea5cd7dc1a7337c674d6139026b28f49ad0ea1ce5107",
//!   "settlement_time": "2024-03-09 10:20:00",
//!   "payment_type": "bank_transfer",
//!   "order_id": "ORD-20240309-a1b2c3d4",
//!   "gross_amount": "84000.00",
//!   "fraud_status": "accept",
//!   "currency": "IDR",
//!   "va_numbers": [{ "bank": "bca", "va_number": "12345678901" }]
//! }
//! ```

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use std::str::FromStr;

use crate::models::transaction::{StatusUpdate, TransactionStatus, UpdateSource};

/// The gateway reports local times in GMT+7.
const GATEWAY_UTC_OFFSET_SECS: i32 = 7 * 3600;

#[derive(Debug, Clone, Deserialize)]
pub struct VaNumber {
    pub bank: String,
    pub va_number: String,
}

/// Notification / status body as sent by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct MidtransNotification {
    pub transaction_id: Option<String>,
    pub order_id: String,
    pub transaction_status: String,
    pub status_code: String,
    pub gross_amount: String,

    #[serde(default)]
    pub signature_key: String,

    pub payment_type: Option<String>,
    pub fraud_status: Option<String>,
    pub status_message: Option<String>,
    pub transaction_time: Option<String>,
    pub settlement_time: Option<String>,

    #[serde(default)]
    pub va_numbers: Vec<VaNumber>,
    pub permata_va_number: Option<String>,
    pub biller_code: Option<String>,
    pub bill_key: Option<String>,
}

/// A field of an authenticated notification could not be interpreted.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("gross_amount {0:?} is not a whole currency amount")]
    InvalidGrossAmount(String),
    #[error("settlement_time {0:?} is not a gateway timestamp")]
    InvalidSettlementTime(String),
}

impl MidtransNotification {
    /// Whether `transaction_status` and `fraud_status` fall in the class of the
    /// signed `status_code`.
    ///
    /// Only `status_code` is covered by the signature; the status fields are
    /// trusted only when they agree with it. Statuses without an internal
    /// counterpart are never applied and pass unchecked.
    pub fn status_matches_code(&self) -> bool {
        let allowed: &[&str] = match (
            self.transaction_status.as_str(),
            self.fraud_status.as_deref(),
        ) {
            ("capture", Some("challenge")) => &["201"],
            ("capture", Some("deny")) => &["202"],
            ("settlement" | "capture" | "authorize", _) => &["200"],
            ("pending", _) => &["201"],
            ("deny" | "cancel" | "failure", _) => &["202"],
            ("expire", _) => &["202", "407"],
            _ => return true,
        };
        allowed.contains(&self.status_code.as_str())
    }

    /// Convert into the gateway-neutral status report.
    pub fn to_status_update(&self, source: UpdateSource) -> Result<StatusUpdate, NotificationError> {
        let gross_amount = parse_gross_amount(&self.gross_amount)?;
        let settlement_time = self
            .settlement_time
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .map(parse_gateway_time)
            .transpose()?;

        let va_number = self
            .va_numbers
            .first()
            .map(|va| va.va_number.clone())
            .or_else(|| self.permata_va_number.clone());

        Ok(StatusUpdate {
            order_id: self.order_id.clone(),
            reference_number: self.transaction_id.clone(),
            gateway_status: self.transaction_status.clone(),
            status: TransactionStatus::from_gateway(
                &self.transaction_status,
                self.fraud_status.as_deref(),
            ),
            gross_amount: Some(gross_amount),
            payment_type: self.payment_type.clone(),
            settlement_time,
            va_number,
            biller_code: self.biller_code.clone(),
            bill_key: self.bill_key.clone(),
            source,
        })
    }
}

/// Parse "84000.00" into 84000; fractional amounts are rejected.
pub fn parse_gross_amount(value: &str) -> Result<i64, NotificationError> {
    let invalid = || NotificationError::InvalidGrossAmount(value.to_string());
    let decimal = Decimal::from_str(value.trim()).map_err(|_| invalid())?;
    if !decimal.fract().is_zero() {
        return Err(invalid());
    }
    decimal.trunc().to_i64().ok_or_else(invalid)
}

fn parse_gateway_time(value: &str) -> Result<DateTime<Utc>, NotificationError> {
    let invalid = || NotificationError::InvalidSettlementTime(value.to_string());
    let naive = NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S")
        .map_err(|_| invalid())?;
    let offset = FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS).ok_or_else(invalid)?;
    naive
        .and_local_timezone(offset)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(invalid)
}
