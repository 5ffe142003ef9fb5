//! Data models representing database entities and API payloads.
//!
//! Status-like columns are stored as TEXT and converted with `TryFrom<String>`
//! so that an unexpected value in the database surfaces as a decode error
//! instead of being silently coerced.

/// Students, billings and billing-student obligations
pub mod billing;
/// Raw gateway request/response audit records
pub mod gateway_log;
/// Per-school invoice numbering
pub mod invoice;
/// Enabled payment methods and their fee settings
pub mod payment_method;
/// Authenticated principals and capabilities
pub mod principal;
/// Payment attempts, their detail and history
pub mod transaction;
/// Gateway status notifications
pub mod webhook;

/// A TEXT column held a value that does not map to any known variant.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
