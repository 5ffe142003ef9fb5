//! Payment gateway boundary.
//!
//! The engine talks to the hosted payment gateway only through the
//! `PaymentGateway` trait. Implementations normalize every gateway failure
//! into `GatewayError` and record each raw exchange through `GatewayAuditLog`.

pub mod midtrans;
pub mod signature;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::gateway_log::NewGatewayLog;
use crate::models::payment_method::PaymentMethod;
use crate::models::transaction::StatusUpdate;

/// Uniform error shape for all gateway operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The payment method has no gateway channel.
    #[error("No gateway channel for payment method {0}")]
    UnsupportedChannel(String),

    /// The gateway answered and refused the request.
    #[error("Gateway rejected the request: {message}")]
    Rejected {
        message: String,
        status_code: Option<String>,
    },

    /// Timeout, connection failure or gateway-side 5xx. Safe to retry.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    /// The gateway answered with a body we cannot interpret.
    #[error("Unexpected gateway response: {0}")]
    InvalidResponse(String),

    /// A charge already exists under this order id. It may be live.
    #[error("Gateway already holds a charge for order {0}")]
    DuplicateOrder(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }

    /// The charge may or may not exist at the gateway.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            GatewayError::Unavailable(_)
                | GatewayError::InvalidResponse(_)
                | GatewayError::DuplicateOrder(_)
        )
    }

    /// The gateway has no record of the order.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GatewayError::Rejected { status_code: Some(code), .. } if code == "404"
        )
    }
}

/// A charge to open at the gateway.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub order_id: String,
    pub gross_amount: i64,
    pub method: PaymentMethod,
    pub customer_name: String,
    pub item_name: String,
    pub expiry_minutes: i64,
}

/// Hosted payment page handed back to the payer.
#[derive(Debug, Clone)]
pub struct ChargeResponse {
    pub token: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone)]
pub struct RefundReceipt {
    pub refund_key: String,
    pub message: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError>;

    /// Read-only; the caller decides whether to apply the snapshot.
    async fn query_status(&self, order_id: &str) -> Result<StatusUpdate, GatewayError>;

    async fn cancel_charge(&self, order_id: &str) -> Result<StatusUpdate, GatewayError>;

    async fn refund_charge(
        &self,
        order_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<RefundReceipt, GatewayError>;
}

/// Append-only sink for raw gateway exchanges.
#[async_trait]
pub trait GatewayAuditLog: Send + Sync {
    async fn record_exchange(&self, entry: NewGatewayLog) -> Result<(), AppError>;
}
