//! Raw gateway exchange capture, kept for dispute resolution.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Represents a row of the append-only `gateway_logs` table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct GatewayLog {
    pub id: Uuid,
    pub order_id: String,

    /// "create_charge", "query_status", "cancel_charge", "refund_charge" or
    /// "notification" for inbound webhooks
    pub operation: String,
    pub request: serde_json::Value,

    /// `None` when the call never produced a response (timeout, connection error)
    pub response: Option<serde_json::Value>,
    pub http_status: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGatewayLog {
    pub order_id: String,
    pub operation: &'static str,
    pub request: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub http_status: Option<i32>,
}
