//! Payment methods a school has enabled for parents.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

/// Fee-relevant category of a payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    VirtualAccount,
    CreditCard,
    Qris,
}

impl PaymentMethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodKind::VirtualAccount => "virtual_account",
            PaymentMethodKind::CreditCard => "credit_card",
            PaymentMethodKind::Qris => "qris",
        }
    }
}

impl FromStr for PaymentMethodKind {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "virtual_account" | "va" | "bank_transfer" => Ok(PaymentMethodKind::VirtualAccount),
            "credit_card" | "card" => Ok(PaymentMethodKind::CreditCard),
            "qris" | "qr" => Ok(PaymentMethodKind::Qris),
            _ => Err(UnknownVariant::new("payment_method_type", value)),
        }
    }
}

/// Represents a row of the `payment_methods` table.
///
/// `method_type` is kept as the raw column value: an unsupported type is a
/// per-request failure (`UnsupportedPaymentMethod`), not a decode failure of
/// the whole listing.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub name: String,
    pub method_type: String,

    /// Bank or wallet code, e.g. "bca", "mandiri", "gopay"
    pub bank_code: Option<String>,

    /// Flat admin fee in the smallest currency unit
    pub flat_fee: i64,

    /// Percentage admin fee as a decimal string in percent units ("2.9" = 2.9%)
    pub percentage_fee: Option<String>,

    pub is_active: bool,
}

impl PaymentMethod {
    pub fn kind(&self) -> Result<PaymentMethodKind, UnknownVariant> {
        self.method_type.parse()
    }
}
