//! Midtrans adapter: Snap for opening charges, Core API for status,
//! cancellation and refunds.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::{
    ChargeRequest, ChargeResponse, GatewayAuditLog, GatewayError, PaymentGateway, RefundReceipt,
};
use crate::models::gateway_log::NewGatewayLog;
use crate::models::payment_method::{PaymentMethod, PaymentMethodKind};
use crate::models::transaction::{StatusUpdate, UpdateSource};
use crate::models::webhook::MidtransNotification;

/// Snap rejects item names longer than this.
const MAX_ITEM_NAME_LEN: usize = 50;

#[derive(Debug, Clone)]
pub struct MidtransConfig {
    pub server_key: String,

    /// Full Snap transactions endpoint
    pub snap_url: Url,

    /// Core API base URL
    pub api_url: Url,

    pub timeout: Duration,
}

pub struct MidtransGateway {
    config: MidtransConfig,
    client: Client,
    audit: Arc<dyn GatewayAuditLog>,
}

impl MidtransGateway {
    pub fn new(config: MidtransConfig, audit: Arc<dyn GatewayAuditLog>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            config,
            client,
            audit,
        })
    }

    fn core_endpoint(&self, order_id: &str, action: &str) -> Result<Url, GatewayError> {
        self.config
            .api_url
            .join(&format!("v2/{}/{}", order_id, action))
            .map_err(|e| GatewayError::InvalidResponse(format!("bad endpoint: {}", e)))
    }

    /// Send one request, record the exchange, and classify transport failures.
    async fn exchange(
        &self,
        operation: &'static str,
        order_id: &str,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let mut request = self
            .client
            .request(method, url)
            .basic_auth(&self.config.server_key, Some(""))
            .header("Accept", "application/json");
        if let Some(ref payload) = body {
            request = request.json(payload);
        }

        let (outcome, response, http_status) = match request.send().await {
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                let value = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
                let outcome = if status.is_server_error() {
                    Err(GatewayError::Unavailable(format!("HTTP {}", status)))
                } else if !status.is_success() {
                    Err(GatewayError::Rejected {
                        message: extract_error_message(&value),
                        status_code: Some(status.as_u16().to_string()),
                    })
                } else {
                    Ok(value.clone())
                };
                (outcome, Some(value), Some(i32::from(status.as_u16())))
            }
            Err(e) => {
                tracing::warn!(order_id = %order_id, operation, error = %e, "gateway call failed");
                (Err(GatewayError::Unavailable(e.to_string())), None, None)
            }
        };

        let entry = NewGatewayLog {
            order_id: order_id.to_string(),
            operation,
            request: body.unwrap_or(Value::Null),
            response,
            http_status,
        };
        if let Err(e) = self.audit.record_exchange(entry).await {
            tracing::warn!(order_id = %order_id, operation, error = %e, "failed to record gateway exchange");
        }

        outcome
    }

    /// Core API answers 200 with the real outcome in the body's `status_code`.
    fn check_core_status(value: &Value) -> Result<(), GatewayError> {
        let code = value
            .get("status_code")
            .and_then(Value::as_str)
            .unwrap_or("200");
        match code.as_bytes().first() {
            Some(b'2') => Ok(()),
            Some(b'5') => Err(GatewayError::Unavailable(extract_error_message(value))),
            _ => Err(GatewayError::Rejected {
                message: extract_error_message(value),
                status_code: Some(code.to_string()),
            }),
        }
    }

    fn to_snapshot(value: Value) -> Result<StatusUpdate, GatewayError> {
        let body: MidtransNotification = serde_json::from_value(value)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        body.to_status_update(UpdateSource::Reconciliation)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for MidtransGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        let channel = snap_channel(&request.method)?;
        let item_name: String = request.item_name.chars().take(MAX_ITEM_NAME_LEN).collect();

        let payload = json!({
            "transaction_details": {
                "order_id": request.order_id,
                "gross_amount": request.gross_amount,
            },
            "enabled_payments": [channel],
            "item_details": [{
                "id": request.order_id,
                "price": request.gross_amount,
                "quantity": 1,
                "name": item_name,
            }],
            "customer_details": {
                "first_name": request.customer_name,
            },
            "expiry": {
                "unit": "minute",
                "duration": request.expiry_minutes,
            },
        });

        let value = self
            .exchange(
                "create_charge",
                &request.order_id,
                Method::POST,
                self.config.snap_url.clone(),
                Some(payload),
            )
            .await
            .map_err(|e| match e {
                GatewayError::Rejected { ref message, .. } if is_duplicate_order(message) => {
                    GatewayError::DuplicateOrder(request.order_id.clone())
                }
                other => other,
            })?;

        let token = value.get("token").and_then(Value::as_str);
        let redirect_url = value.get("redirect_url").and_then(Value::as_str);
        match (token, redirect_url) {
            (Some(token), Some(redirect_url)) => {
                tracing::info!(order_id = %request.order_id, channel, "gateway charge opened");
                Ok(ChargeResponse {
                    token: token.to_string(),
                    redirect_url: redirect_url.to_string(),
                })
            }
            _ => Err(GatewayError::InvalidResponse(
                "charge response lacks token or redirect_url".to_string(),
            )),
        }
    }

    async fn query_status(&self, order_id: &str) -> Result<StatusUpdate, GatewayError> {
        let url = self.core_endpoint(order_id, "status")?;
        let value = self
            .exchange("query_status", order_id, Method::GET, url, None)
            .await?;
        Self::check_core_status(&value)?;
        Self::to_snapshot(value)
    }

    async fn cancel_charge(&self, order_id: &str) -> Result<StatusUpdate, GatewayError> {
        let url = self.core_endpoint(order_id, "cancel")?;
        let value = self
            .exchange("cancel_charge", order_id, Method::POST, url, None)
            .await?;
        Self::check_core_status(&value)?;
        Self::to_snapshot(value)
    }

    async fn refund_charge(
        &self,
        order_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<RefundReceipt, GatewayError> {
        let url = self.core_endpoint(order_id, "refund")?;
        let refund_key = format!("{}-refund-{}", order_id, chrono::Utc::now().timestamp());
        let payload = json!({
            "refund_key": refund_key,
            "amount": amount,
            "reason": reason,
        });

        let value = self
            .exchange("refund_charge", order_id, Method::POST, url, Some(payload))
            .await?;
        Self::check_core_status(&value)?;

        Ok(RefundReceipt {
            refund_key,
            message: extract_error_message(&value),
        })
    }
}

/// Map a payment method record to the Snap `enabled_payments` channel.
pub fn snap_channel(method: &PaymentMethod) -> Result<&'static str, GatewayError> {
    let unsupported = || {
        GatewayError::UnsupportedChannel(format!(
            "{}/{}",
            method.method_type,
            method.bank_code.as_deref().unwrap_or("-")
        ))
    };

    let kind = method.kind().map_err(|_| unsupported())?;
    let bank = method
        .bank_code
        .as_deref()
        .map(|code| code.trim().to_ascii_lowercase());

    match (kind, bank.as_deref()) {
        (PaymentMethodKind::VirtualAccount, Some("bca")) => Ok("bca_va"),
        (PaymentMethodKind::VirtualAccount, Some("bni")) => Ok("bni_va"),
        (PaymentMethodKind::VirtualAccount, Some("bri")) => Ok("bri_va"),
        (PaymentMethodKind::VirtualAccount, Some("permata")) => Ok("permata_va"),
        (PaymentMethodKind::VirtualAccount, Some("cimb")) => Ok("cimb_va"),
        (PaymentMethodKind::VirtualAccount, Some("mandiri")) => Ok("echannel"),
        (PaymentMethodKind::CreditCard, _) => Ok("credit_card"),
        (PaymentMethodKind::Qris, None | Some("qris")) => Ok("other_qris"),
        (PaymentMethodKind::Qris, Some("gopay")) => Ok("gopay"),
        (PaymentMethodKind::Qris, Some("shopeepay")) => Ok("shopeepay"),
        _ => Err(unsupported()),
    }
}

/// Snap refuses a second charge under an order id it has seen, in English or
/// Indonesian depending on the merchant locale.
fn is_duplicate_order(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("order_id")
        && (message.contains("already been taken") || message.contains("sudah digunakan"))
}

/// Pull the human-readable message out of a gateway error body.
pub fn extract_error_message(value: &Value) -> String {
    if let Some(messages) = value.get("error_messages").and_then(Value::as_array) {
        let joined = messages
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; ");
        if !joined.is_empty() {
            return joined;
        }
    }

    value
        .get("status_message")
        .and_then(Value::as_str)
        .or_else(|| value.as_str().filter(|s| !s.is_empty()))
        .unwrap_or("unknown gateway error")
        .to_string()
}
